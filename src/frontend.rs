//! Frontend message encoding.
//!
//! The dispatcher itself never builds protocol messages; encoder jobs are
//! opaque closures. These helpers are how a session layer (and the tests)
//! produce well-formed frontend bytes inside such a closure.
use bytes::{BufMut, BytesMut};

use crate::ext::{BufMutExt, StrExt};

/// write a frontend message to `buf`
pub fn write<F: FrontendMessage>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "[BUG] Frontend Message body not equal to size hint"
    );
}

/// A type which can be encoded into a postgres frontend message.
pub trait FrontendMessage {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual
    /// postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    fn encode(self, buf: impl BufMut);
}

/// Simple-query execution of one or more SQL statements.
#[derive(Debug)]
pub struct Query<'a> {
    /// The query string itself.
    pub sql: &'a str,
}

impl FrontendMessage for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Closes the current extended-query cycle; the backend answers with
/// `ReadyForQuery` after it.
#[derive(Debug)]
pub struct Sync;

impl FrontendMessage for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> i32 {
        0
    }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination.
#[derive(Debug)]
pub struct Terminate;

impl FrontendMessage for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> i32 {
        0
    }

    fn encode(self, _: impl BufMut) { }
}

/// A password response, encrypted if the server requested so.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendMessage for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}
