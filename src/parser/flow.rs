//! Stream parsers for the common reply shapes.
use crate::{
    common::ByteStr,
    error::ParseError,
    frame::Frame,
    message::Authentication,
    parser::{
        self, Parsed, RawRow,
        stream::{BoxStreamParse, Step, StreamParse, StreamParseExt, pure, single},
    },
};

/// Folds every `DataRow` of a query reply until the terminating
/// `CommandComplete` or `EmptyQueryResponse`, then yields the fold state.
pub fn rows<P, R, T, F>(parse_row: P, init: T, fold: F) -> Rows<P, F, T>
where
    P: Fn(RawRow) -> Result<R, ParseError> + Send,
    F: FnMut(&mut T, R) + Send,
    T: Send,
{
    Rows { parse_row, fold, acc: Some(init) }
}

pub struct Rows<P, F, T> {
    parse_row: P,
    fold: F,
    acc: Option<T>,
}

impl<P, R, T, F> StreamParse for Rows<P, F, T>
where
    P: Fn(RawRow) -> Result<R, ParseError> + Send,
    F: FnMut(&mut T, R) + Send,
    T: Send,
{
    type Output = T;

    fn offer(&mut self, frame: &Frame) -> Step<T> {
        let acc = self.acc.as_mut().expect("stream parser resumed after completion");
        match parser::data_row(frame, &self.parse_row) {
            Parsed::Matched(row) => {
                (self.fold)(acc, row);
                Step::NeedMore
            }
            Parsed::Failed(err) => Step::Failed(err),
            Parsed::Rejected => match parser::command_complete(frame) {
                Parsed::Matched(_) => Step::Done(self.take_acc()),
                Parsed::Failed(err) => Step::Failed(err),
                Parsed::Rejected => match parser::empty_query(frame) {
                    Parsed::Matched(()) => Step::Done(self.take_acc()),
                    Parsed::Failed(err) => Step::Failed(err),
                    Parsed::Rejected => Step::Rejected,
                },
            },
        }
    }
}

impl<P, F, T> Rows<P, F, T> {
    fn take_acc(&mut self) -> T {
        self.acc.take().expect("stream parser resumed after completion")
    }
}

/// Affected-row count of a statement reply: the `CommandComplete` count,
/// or `0` for `EmptyQueryResponse`.
pub fn rows_affected() -> impl StreamParse<Output = u64> {
    single(parser::command_complete).or(single(parser::empty_query).map(|()| 0))
}

/// Run-time parameters reported by the server.
#[derive(Debug)]
pub struct ServerParams {
    /// Whether the server transmits timestamps as 64-bit integers.
    pub integer_datetimes: bool,
    /// Every `(name, value)` pair reported before `ReadyForQuery`.
    pub settings: Vec<(ByteStr, ByteStr)>,
}

/// Loops over `ParameterStatus` reports until `ReadyForQuery`.
///
/// The server must have reported `integer_datetimes` by then; a reply
/// stream that never carries it fails the parser.
pub fn params() -> Params {
    Params { integer_datetimes: None, settings: Vec::new() }
}

pub struct Params {
    integer_datetimes: Option<bool>,
    settings: Vec<(ByteStr, ByteStr)>,
}

impl StreamParse for Params {
    type Output = ServerParams;

    fn offer(&mut self, frame: &Frame) -> Step<ServerParams> {
        match parser::parameter_status(frame) {
            Parsed::Matched((name, value)) => {
                if name == "integer_datetimes" {
                    self.integer_datetimes = Some(value == "on");
                }
                self.settings.push((name, value));
                Step::NeedMore
            }
            Parsed::Failed(err) => Step::Failed(err),
            Parsed::Rejected => match parser::ready_for_query(frame) {
                Parsed::Matched(()) => match self.integer_datetimes {
                    Some(integer_datetimes) => Step::Done(ServerParams {
                        integer_datetimes,
                        settings: std::mem::take(&mut self.settings),
                    }),
                    None => Step::Failed(ParseError::new(
                        "server never reported integer_datetimes",
                    )),
                },
                Parsed::Failed(err) => Step::Failed(err),
                Parsed::Rejected => Step::Rejected,
            },
        }
    }
}

/// Outcome of the authentication exchange.
#[derive(Debug)]
pub enum Handshake {
    /// Authentication succeeded; parameter reports followed.
    Ready(ServerParams),
    /// The server wants a clear-text password.
    Password,
    /// The server wants an MD5-encrypted password.
    Md5 { salt: [u8; 4] },
}

/// Parses one `Authentication` reply; on `Ok` continues with [`params`],
/// otherwise completes so the session layer can answer the challenge.
pub fn handshake() -> impl StreamParse<Output = Handshake> {
    single(parser::authentication).then(|auth| -> BoxStreamParse<Handshake> {
        match auth {
            Authentication::Ok => params().map(Handshake::Ready).boxed(),
            Authentication::CleartextPassword => pure(Handshake::Password).boxed(),
            Authentication::Md5Password { salt } => pure(Handshake::Md5 { salt }).boxed(),
        }
    })
}
