//! The outbound write stage.
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{ByteReceiver, latch::TransportLatch};
use crate::{common::verbose, error::TransportError};

/// Drains the outbound byte queue into the socket.
///
/// Each queued buffer is written in full before the next is taken, so the
/// bytes of two submissions never interleave. The first io failure latches
/// and the stage exits.
pub(crate) async fn run<W>(mut io: W, mut outbound: ByteReceiver, latch: Arc<TransportLatch>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let buf = tokio::select! {
            buf = outbound.recv() => match buf {
                Some(buf) => buf,
                None => break,
            },
            _ = latch.tripped() => break,
        };

        verbose!("(F) {} bytes", buf.len());

        // write_all retries partial writes until the buffer is exhausted
        if let Err(err) = io.write_all(&buf).await {
            latch.set(TransportError::new(err));
            break;
        }
    }
}
