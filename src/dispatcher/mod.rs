//! The dispatcher facade and its stages.
//!
//! A [`Dispatcher`] multiplexes pipelined requests onto one duplex byte
//! stream. Five tasks cooperate around FIFO queues:
//!
//! ```text
//! submit ─▶ [serializer] ─▶ bytes ─▶ [sender] ─▶ socket
//! result ◀─ [interpreter] ◀─ frames ◀─ [slicer] ◀─ chunks ◀─ [receiver] ◀─ socket
//! ```
//!
//! The serializer forwards each submission's result processor to the
//! interpreter before its bytes reach the wire, which keeps the `k`-th
//! reply stream paired with the `k`-th request no matter how many callers
//! submit concurrently. Server events that belong to no request go to the
//! unaffiliated sink. A single transport failure latches and resolves
//! every pending and future submission.
use std::{
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use either::Either;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::DispatcherConfig,
    error::{Error, TransportError},
    frame::Frame,
    message::Notification,
    parser::stream::{Step, StreamParse},
};

mod latch;

mod interpreter;
mod receiver;
mod sender;
mod serializer;
mod slicer;

use latch::TransportLatch;

/// Receives everything the backend sends outside any request: asynchronous
/// notifications, stray errors, protocol violations.
pub type UnaffiliatedSink = Box<dyn FnMut(Either<Error, Notification>) + Send>;

/// An encoder job: appends the wire bytes of one request batch.
pub(crate) type EncoderJob = Box<dyn FnOnce(&mut BytesMut) + Send>;

/// One submission: the encoder job paired with its result processor.
///
/// Both travel in a single queue item, so their relative order with any
/// other pair is identical on the write path and the read path.
pub(crate) struct Submission {
    pub encode: EncoderJob,
    pub processor: BoxProcessor,
}

/// What the interpreter learns from offering a frame to a processor.
pub(crate) enum Offered {
    /// Frame consumed, the processor stays current.
    Consumed,
    /// Frame consumed and the caller has its outcome.
    Finished,
    /// Frame not consumed, route it unaffiliated.
    Rejected,
}

/// A type-erased pending request: a stream parser plus the reply channel
/// of the caller awaiting it.
pub(crate) trait Processor: Send {
    /// Resolve without consuming a frame, if the parser can. Returns
    /// whether the processor is finished.
    fn try_finish(&mut self) -> bool;

    fn offer(&mut self, frame: &Frame) -> Offered;

    /// Resolve with `err` (backend error, or the latch fanning out).
    fn fail(&mut self, err: Error);
}

pub(crate) type BoxProcessor = Box<dyn Processor>;

struct ProcessorSlot<P: StreamParse> {
    parse: P,
    reply: Option<oneshot::Sender<Result<P::Output, Error>>>,
}

impl<P: StreamParse> ProcessorSlot<P> {
    fn deliver(&mut self, outcome: Result<P::Output, Error>) {
        if let Some(reply) = self.reply.take() {
            // the caller may have dropped its future; nothing to do then
            let _ = reply.send(outcome);
        }
    }
}

impl<P> Processor for ProcessorSlot<P>
where
    P: StreamParse,
    P::Output: Send,
{
    fn try_finish(&mut self) -> bool {
        if self.reply.is_none() {
            return true;
        }
        match self.parse.try_finish() {
            Some(outcome) => {
                self.deliver(outcome.map_err(Error::from));
                true
            }
            None => false,
        }
    }

    fn offer(&mut self, frame: &Frame) -> Offered {
        match self.parse.offer(frame) {
            Step::NeedMore => Offered::Consumed,
            Step::Rejected => Offered::Rejected,
            Step::Done(value) => {
                self.deliver(Ok(value));
                Offered::Finished
            }
            Step::Failed(err) => {
                self.deliver(Err(err.into()));
                Offered::Finished
            }
        }
    }

    fn fail(&mut self, err: Error) {
        self.deliver(Err(err));
    }
}

/// Outbound byte queue, bounded when the config asks for backpressure.
pub(crate) enum ByteSender {
    Bounded(mpsc::Sender<Bytes>),
    Unbounded(mpsc::UnboundedSender<Bytes>),
}

pub(crate) enum ByteReceiver {
    Bounded(mpsc::Receiver<Bytes>),
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
}

impl ByteSender {
    pub async fn send(&self, bytes: Bytes) -> Result<(), ()> {
        match self {
            Self::Bounded(tx) => tx.send(bytes).await.map_err(|_| ()),
            Self::Unbounded(tx) => tx.send(bytes).map_err(|_| ()),
        }
    }
}

impl ByteReceiver {
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

fn byte_channel(depth: Option<NonZeroUsize>) -> (ByteSender, ByteReceiver) {
    match depth {
        Some(depth) => {
            let (tx, rx) = mpsc::channel(depth.get());
            (ByteSender::Bounded(tx), ByteReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (ByteSender::Unbounded(tx), ByteReceiver::Unbounded(rx))
        }
    }
}

/// Latches if the owning stage unwinds, so callers are never left waiting
/// on a dead pipeline.
struct PanicGuard(Arc<TransportLatch>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set(TransportError::new("dispatcher task panicked"));
        }
    }
}

fn spawn_stage(
    latch: &Arc<TransportLatch>,
    stage: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    let guard = PanicGuard(latch.clone());
    tokio::spawn(async move {
        let _guard = guard;
        stage.await;
    })
}

async fn supervise(stages: Vec<JoinHandle<()>>) {
    for stage in stages {
        let _ = stage.await;
    }
}

struct Shared {
    submit: mpsc::UnboundedSender<Submission>,
    latch: Arc<TransportLatch>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Pipelined request dispatcher over one duplex byte stream.
///
/// Cheap to clone; all clones share the same pipeline. Requests submitted
/// concurrently are written in submission order and their replies are
/// matched back in that same order.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Start a dispatcher over an already-connected stream.
    ///
    /// Must be called within a tokio runtime; the five stages are spawned
    /// immediately.
    pub fn new<S>(
        io: S,
        sink: impl FnMut(Either<Error, Notification>) + Send + 'static,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_config(io, sink, DispatcherConfig::default())
    }

    /// Start a dispatcher with explicit configuration.
    pub fn with_config<S>(
        io: S,
        sink: impl FnMut(Either<Error, Notification>) + Send + 'static,
        config: DispatcherConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let latch = Arc::new(TransportLatch::new());
        let (read_half, write_half) = tokio::io::split(io);

        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (processor_tx, processor_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = byte_channel(config.outbound_queue_depth);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let stages = vec![
            spawn_stage(&latch, serializer::run(
                submit_rx,
                processor_tx,
                outbound_tx,
                latch.clone(),
            )),
            spawn_stage(&latch, sender::run(write_half, outbound_rx, latch.clone())),
            spawn_stage(&latch, receiver::run(
                read_half,
                chunk_tx,
                latch.clone(),
                config.read_buffer_size,
            )),
            spawn_stage(&latch, slicer::run(chunk_rx, frame_tx)),
            spawn_stage(&latch, interpreter::run(
                frame_rx,
                processor_rx,
                Box::new(sink),
                latch.clone(),
                config.strict_protocol,
            )),
        ];
        let supervisor = tokio::spawn(supervise(stages));

        Self {
            shared: Arc::new(Shared {
                submit: submit_tx,
                latch,
                supervisor: Mutex::new(Some(supervisor)),
            }),
        }
    }

    /// Submit one request: an encoder job producing the outbound bytes and
    /// a stream parser for its reply frames.
    ///
    /// The pair is enqueued before this returns; the returned future only
    /// waits for the outcome. Every submission resolves eventually: with
    /// the parsed value, a parse or backend error, or the transport error.
    pub fn submit<E, P>(&self, encode: E, parse: P) -> Submit<P::Output>
    where
        E: FnOnce(&mut BytesMut) + Send + 'static,
        P: StreamParse + 'static,
        P::Output: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submit = Submit {
            reply: reply_rx,
            latch: self.shared.latch.clone(),
        };

        if let Some(err) = self.shared.latch.get() {
            let _ = reply_tx.send(Err(err.into()));
            return submit;
        }

        let submission = Submission {
            encode: Box::new(encode),
            processor: Box::new(ProcessorSlot { parse, reply: Some(reply_tx) }),
        };

        if let Err(mpsc::error::SendError(submission)) = self.shared.submit.send(submission) {
            let mut processor = submission.processor;
            let err = self.shared.latch.get().unwrap_or_else(TransportError::stopped);
            processor.fail(err.into());
        }

        submit
    }

    /// Whether the transport has failed or the dispatcher was stopped.
    pub fn is_stopped(&self) -> bool {
        self.shared.latch.get().is_some()
    }

    /// Stop the dispatcher.
    ///
    /// Idempotent. Latches "dispatcher stopped", which unblocks and joins
    /// every stage; all outstanding and future submissions resolve with
    /// the transport error.
    pub async fn stop(&self) {
        self.shared.latch.set(TransportError::stopped());
        let supervisor = self
            .shared
            .supervisor
            .lock()
            .expect("dispatcher supervisor lock poisoned")
            .take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The pending outcome of one [`submit`][Dispatcher::submit].
pub struct Submit<R> {
    reply: oneshot::Receiver<Result<R, Error>>,
    latch: Arc<TransportLatch>,
}

impl<R> Future for Submit<R> {
    type Output = Result<R, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        match Pin::new(&mut me.reply).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                // the pipeline died without delivering; the latch says why
                let err = me.latch.get().unwrap_or_else(TransportError::stopped);
                Poll::Ready(Err(err.into()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
