//! The framing stage.
use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    error::ProtocolError,
    frame::{Frame, Slicer},
};

/// Slices inbound chunks into frames, in wire order.
///
/// A malformed length is unrecoverable: the error is forwarded as a
/// sentinel in place of a frame and the stage stops.
pub(crate) async fn run(
    mut chunks: UnboundedReceiver<Bytes>,
    frames: UnboundedSender<Result<Frame, ProtocolError>>,
) {
    let mut slicer = Slicer::new();
    while let Some(chunk) = chunks.recv().await {
        slicer.extend(&chunk);
        loop {
            match slicer.next() {
                Ok(Some(frame)) => {
                    if frames.send(Ok(frame)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = frames.send(Err(err));
                    return;
                }
            }
        }
    }
}
