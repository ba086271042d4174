//! Pipelined dispatcher for the postgres backend protocol.
//!
//! A [`Dispatcher`] multiplexes concurrent requests onto a single duplex
//! stream of tagged, length-prefixed messages. Replies come back in
//! submission order; server-initiated events (notifications, stray errors)
//! go to a side channel.
//!
//! # Examples
//!
//! Pipeline two statements over one connection:
//!
//! ```no_run
//! use pgpipe::{Dispatcher, frontend, parser::flow};
//!
//! # async fn app(socket: tokio::net::TcpStream) -> pgpipe::Result<()> {
//! let dispatcher = Dispatcher::new(socket, |event| println!("{event:?}"));
//!
//! let first = dispatcher.submit(
//!     |buf| frontend::write(frontend::Query { sql: "DELETE FROM outbox" }, buf),
//!     flow::rows_affected(),
//! );
//! let second = dispatcher.submit(
//!     |buf| frontend::write(frontend::Query { sql: "DELETE FROM inbox" }, buf),
//!     flow::rows_affected(),
//! );
//!
//! // both requests are on the wire; replies resolve in order
//! let outbox = first.await?;
//! let inbox = second.await?;
//! println!("cleared {outbox} + {inbox} rows");
//!
//! dispatcher.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Collect rows with a stream parser:
//!
//! ```no_run
//! use pgpipe::{Dispatcher, ParseError, frontend, parser::flow};
//! # async fn app(dispatcher: Dispatcher) -> pgpipe::Result<()> {
//!
//! let names = dispatcher.submit(
//!     |buf| frontend::write(frontend::Query { sql: "SELECT name FROM users" }, buf),
//!     flow::rows(
//!         |row| match row.get(0) {
//!             Some(Some(name)) => Ok(String::from_utf8_lossy(name).into_owned()),
//!             _ => Err(ParseError::new("name column missing")),
//!         },
//!         Vec::new(),
//!         |acc, name| acc.push(name),
//!     ),
//! ).await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;

// Protocol
pub mod frame;
pub mod message;
pub mod frontend;

// Parsing
pub mod parser;

// Dispatch
mod config;
pub mod dispatcher;

mod error;

#[doc(inline)]
pub use dispatcher::{Dispatcher, Submit, UnaffiliatedSink};
#[doc(inline)]
pub use config::DispatcherConfig;
#[doc(inline)]
pub use frame::Frame;
#[doc(inline)]
pub use message::{BackendError, Notification};
#[doc(inline)]
pub use parser::stream::{StreamParse, StreamParseExt};
#[doc(inline)]
pub use error::{Error, ErrorKind, ParseError, ProtocolError, Result, TransportError};

pub use either::Either;
