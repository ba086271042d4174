//! The encoder stage.
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::SendError};

use super::{BoxProcessor, ByteSender, Submission, latch::TransportLatch};
use crate::error::TransportError;

/// Runs encoder jobs into byte buffers, in submission order.
///
/// Each submission's processor is forwarded *before* its bytes go to the
/// sender: replies can only exist after the bytes are on the wire, so the
/// interpreter always finds the matching processor already queued. Jobs are
/// never coalesced; each gets a fresh, uniquely owned buffer.
pub(crate) async fn run(
    mut submissions: UnboundedReceiver<Submission>,
    processors: UnboundedSender<BoxProcessor>,
    outbound: ByteSender,
    latch: Arc<TransportLatch>,
) {
    loop {
        let submission = tokio::select! {
            submission = submissions.recv() => match submission {
                Some(submission) => submission,
                // every facade handle is gone: tear the dispatcher down
                None => {
                    latch.set(TransportError::stopped());
                    break;
                }
            },
            _ = latch.tripped() => break,
        };

        let Submission { encode, processor } = submission;
        let mut buf = BytesMut::new();
        encode(&mut buf);

        if let Err(SendError(mut processor)) = processors.send(processor) {
            let err = latch.get().unwrap_or_else(TransportError::stopped);
            processor.fail(err.into());
            break;
        }

        let send = tokio::select! {
            send = outbound.send(buf.freeze()) => send,
            _ = latch.tripped() => break,
        };
        if send.is_err() {
            break;
        }
    }

    // whatever is still queued resolves with the latched error
    let err = latch.get().unwrap_or_else(TransportError::stopped);
    while let Ok(Submission { mut processor, .. }) = submissions.try_recv() {
        processor.fail(err.clone().into());
    }
}
