//! The inbound read stage.
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc::UnboundedSender,
};

use super::latch::TransportLatch;
use crate::{common::verbose, error::TransportError};

/// Reads the socket into fixed-size chunks for the slicer.
///
/// Chunk boundaries are wherever the os cuts them; the slicer reassembles
/// frames. EOF and io errors latch and end the stage.
pub(crate) async fn run<R>(
    mut io: R,
    chunks: UnboundedSender<Bytes>,
    latch: Arc<TransportLatch>,
    read_buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        buf.reserve(read_buffer_size);

        let read = tokio::select! {
            read = io.read_buf(&mut buf) => read,
            _ = latch.tripped() => break,
        };

        match read {
            Ok(0) => {
                latch.set(TransportError::closed_by_peer());
                break;
            }
            Ok(_n) => {
                verbose!("(B) {_n} bytes");
                if chunks.send(buf.split().freeze()).is_err() {
                    break;
                }
            }
            Err(err) => {
                latch.set(TransportError::new(err));
                break;
            }
        }
    }
}
