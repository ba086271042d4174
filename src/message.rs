//! Backend messages the dispatcher decodes itself.
//!
//! Reply payloads belonging to a request are handed to that request's
//! stream parser untouched; the messages here are the ones the routing
//! core must understand on its own: asynchronous notifications, error
//! responses, notices, and authentication requests.
//!
//! All communication is through a stream of messages. The first byte of a
//! message identifies the message type, and the next four bytes specify
//! the length of the rest of the message (this length count includes
//! itself, but not the message-type byte).
use bytes::Bytes;

use crate::{common::ByteStr, error::ProtocolError, ext::BytesExt};

/// Identifies the message as a notification response.
///
/// Sent by the backend for every `NOTIFY` on a channel the session is
/// listening on, possibly between replies of an unrelated request.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The process ID of the notifying backend process.
    pub pid: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The "payload" string passed from the notifying process.
    pub payload: ByteStr,
}

impl Notification {
    pub const MSGTYPE: u8 = b'A';

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            pid: body.try_get_u32("NotificationResponse pid")?,
            channel: body.get_nul_bytestr("NotificationResponse channel")?,
            payload: body.get_nul_bytestr("NotificationResponse payload")?,
        })
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order.
///
/// For each field there is a code byte identifying the field type and a
/// nul terminated string value. Fields of unrecognized type are ignored.
#[derive(Debug, Clone)]
pub struct BackendError {
    /// The `S` field: ERROR, FATAL, PANIC or a localized translation.
    pub severity: ByteStr,
    /// The `C` field: the SQLSTATE code.
    pub code: ByteStr,
    /// The `M` field: the primary human-readable error message.
    pub message: ByteStr,
}

impl BackendError {
    pub const MSGTYPE: u8 = b'E';

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut severity = ByteStr::default();
        let mut code = ByteStr::default();
        let mut message = ByteStr::default();

        loop {
            match body.try_get_u8("ErrorResponse field code")? {
                0 => break,
                field => {
                    let value = body.get_nul_bytestr("ErrorResponse field value")?;
                    match field {
                        b'S' => severity = value,
                        b'C' => code = value,
                        b'M' => message = value,
                        _ => {}
                    }
                }
            }
        }

        Ok(Self { severity, code, message })
    }
}

impl std::error::Error for BackendError { }

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if !self.code.is_empty() {
            write!(f, " ({})", self.code)?;
        }
        Ok(())
    }
}

/// A warning message from the backend.
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl std::fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // notices share the ErrorResponse field layout
        match BackendError::decode(self.body.clone()) {
            Ok(fields) => fields.fmt(f),
            Err(_) => write!(f, "unreadable notice"),
        }
    }
}

/// Identifies the message as an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    Md5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let auth = match body.try_get_i32("Authentication method")? {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => Authentication::Md5Password {
                salt: body.try_get_u32("Authentication salt")?.to_be_bytes(),
            },
            method => return Err(ProtocolError::UnknownAuth { method }),
        };
        Ok(auth)
    }
}
