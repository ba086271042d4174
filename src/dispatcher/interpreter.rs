//! The routing core.
use std::sync::Arc;

use either::Either;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{BoxProcessor, Offered, UnaffiliatedSink, latch::TransportLatch};
use crate::{
    common::{verbose, warning},
    error::{Error, ProtocolError, TransportError},
    frame::Frame,
    message::{BackendError, Notification, NoticeResponse},
};

/// Routes each inbound frame to the request at the head of the pipeline,
/// or to the unaffiliated sink.
///
/// Frames are consumed strictly in arrival order, processors strictly in
/// submission order, and a resolved processor is never re-entered. The
/// interpreter holds at most one frame and one processor at a time.
pub(crate) async fn run(
    mut frames: UnboundedReceiver<Result<Frame, ProtocolError>>,
    mut processors: UnboundedReceiver<BoxProcessor>,
    mut sink: UnaffiliatedSink,
    latch: Arc<TransportLatch>,
    strict: bool,
) {
    let mut current: Option<BoxProcessor> = None;

    while let Some(item) = frames.recv().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                // the framing is corrupt; no later frame can be trusted
                let text = err.to_string();
                sink(Either::Left(err.into()));
                latch.set(TransportError::new(text));
                break;
            }
        };

        if current.is_none() {
            current = next_processor(&mut processors);
        }

        match current.as_mut() {
            Some(processor) => match processor.offer(&frame) {
                Offered::Consumed => {}
                Offered::Finished => current = None,
                Offered::Rejected => route_rejected(&frame, &mut current, &mut sink, strict),
            },
            None => route_unaffiliated(&frame, &mut sink, strict),
        }
    }

    // transport failure or shutdown: everything outstanding resolves with it
    let err = latch.get().unwrap_or_else(TransportError::stopped);
    if let Some(mut processor) = current.take() {
        processor.fail(err.clone().into());
    }
    while let Some(mut processor) = processors.recv().await {
        processor.fail(err.clone().into());
    }
}

/// Pop the next pending processor, non-blocking. A frame arriving while
/// nothing is pending is unaffiliated by definition.
fn next_processor(processors: &mut UnboundedReceiver<BoxProcessor>) -> Option<BoxProcessor> {
    while let Ok(mut processor) = processors.try_recv() {
        // parsers that complete without consuming resolve on installation
        if !processor.try_finish() {
            return Some(processor);
        }
    }
    None
}

/// The current processor did not recognize the frame.
fn route_rejected(
    frame: &Frame,
    current: &mut Option<BoxProcessor>,
    sink: &mut UnaffiliatedSink,
    strict: bool,
) {
    match frame.tag {
        // an error reply belongs to the request in flight
        BackendError::MSGTYPE => {
            let outcome = match BackendError::decode(frame.payload.clone()) {
                Ok(fields) => Error::from(fields),
                Err(err) => Error::from(err),
            };
            if let Some(mut processor) = current.take() {
                processor.fail(outcome);
            }
        }
        Notification::MSGTYPE => notify(frame, sink),
        NoticeResponse::MSGTYPE => notice(frame),
        tag => unexpected(tag, sink, strict),
    }
}

/// No processor is pending for this frame at all.
fn route_unaffiliated(frame: &Frame, sink: &mut UnaffiliatedSink, strict: bool) {
    match frame.tag {
        Notification::MSGTYPE => notify(frame, sink),
        BackendError::MSGTYPE => match BackendError::decode(frame.payload.clone()) {
            Ok(fields) => sink(Either::Left(fields.into())),
            Err(err) => sink(Either::Left(err.into())),
        },
        NoticeResponse::MSGTYPE => notice(frame),
        tag => unexpected(tag, sink, strict),
    }
}

fn notify(frame: &Frame, sink: &mut UnaffiliatedSink) {
    match Notification::decode(frame.payload.clone()) {
        Ok(notification) => sink(Either::Right(notification)),
        Err(err) => sink(Either::Left(err.into())),
    }
}

fn notice(_frame: &Frame) {
    warning!("{}", NoticeResponse { body: _frame.payload.clone() });
}

fn unexpected(tag: u8, sink: &mut UnaffiliatedSink, strict: bool) {
    if strict {
        sink(Either::Left(ProtocolError::unexpected(tag).into()));
    } else {
        verbose!("dropped unexpected message: tag={tag}");
    }
}
