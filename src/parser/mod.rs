//! Single-frame reply parsers.
//!
//! A [`ParseMessage`]-shaped parser looks at exactly one [`Frame`] and
//! either matches it, rejects it (wrong tag, the frame belongs to someone
//! else), or fails. Multi-frame parsing is built on top of these in
//! [`stream`] and [`flow`].
use bytes::Bytes;

use crate::{
    common::ByteStr,
    error::{ParseError, ProtocolError},
    ext::BytesExt,
    frame::Frame,
    message::{Authentication, BackendError},
};

pub mod stream;
pub mod flow;

/// Outcome of offering one frame to a single-frame parser.
#[derive(Debug)]
pub enum Parsed<R> {
    /// The frame matched and produced a value.
    Matched(R),
    /// Wrong tag; offer the frame to an alternative branch.
    Rejected,
    /// The tag matched but the payload could not be read.
    Failed(ParseError),
}

impl<R> Parsed<R> {
    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Parsed<T> {
        match self {
            Self::Matched(v) => Parsed::Matched(f(v)),
            Self::Rejected => Parsed::Rejected,
            Self::Failed(e) => Parsed::Failed(e),
        }
    }
}

fn failed<R>(err: ProtocolError) -> Parsed<R> {
    Parsed::Failed(err.into())
}

/// `CommandComplete`: returns the affected row count from the textual
/// command tag, the last integer token, `0` when the tag carries none.
pub fn command_complete(frame: &Frame) -> Parsed<u64> {
    if frame.tag != b'C' {
        return Parsed::Rejected;
    }
    let mut body = frame.payload.clone();
    let tag = match body.get_nul_bytestr("CommandComplete tag") {
        Ok(tag) => tag,
        Err(err) => return failed(err),
    };
    let count = tag
        .split_whitespace()
        .last()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0);
    Parsed::Matched(count)
}

/// `EmptyQueryResponse`: substitutes for `CommandComplete` on an empty
/// query string.
pub fn empty_query(frame: &Frame) -> Parsed<()> {
    match frame.tag {
        b'I' => Parsed::Matched(()),
        _ => Parsed::Rejected,
    }
}

/// `ParseComplete`.
pub fn parse_complete(frame: &Frame) -> Parsed<()> {
    match frame.tag {
        b'1' => Parsed::Matched(()),
        _ => Parsed::Rejected,
    }
}

/// `BindComplete`.
pub fn bind_complete(frame: &Frame) -> Parsed<()> {
    match frame.tag {
        b'2' => Parsed::Matched(()),
        _ => Parsed::Rejected,
    }
}

/// `ReadyForQuery`. The transaction status byte is ignored.
pub fn ready_for_query(frame: &Frame) -> Parsed<()> {
    match frame.tag {
        b'Z' => Parsed::Matched(()),
        _ => Parsed::Rejected,
    }
}

/// `ParameterStatus`: a `(name, value)` run-time parameter report.
pub fn parameter_status(frame: &Frame) -> Parsed<(ByteStr, ByteStr)> {
    if frame.tag != b'S' {
        return Parsed::Rejected;
    }
    let mut body = frame.payload.clone();
    let name = match body.get_nul_bytestr("ParameterStatus name") {
        Ok(name) => name,
        Err(err) => return failed(err),
    };
    let value = match body.get_nul_bytestr("ParameterStatus value") {
        Ok(value) => value,
        Err(err) => return failed(err),
    };
    Parsed::Matched((name, value))
}

/// `DataRow`: decodes the column buffer and feeds it to `row`.
pub fn data_row<R>(
    frame: &Frame,
    row: impl FnOnce(RawRow) -> Result<R, ParseError>,
) -> Parsed<R> {
    if frame.tag != b'D' {
        return Parsed::Rejected;
    }
    let mut body = frame.payload.clone();
    let column_len = match body.try_get_u16("DataRow column count") {
        Ok(len) => len,
        Err(err) => return failed(err),
    };
    let raw = match RawRow::decode(column_len, body) {
        Ok(raw) => raw,
        Err(err) => return failed(err),
    };
    match row(raw) {
        Ok(value) => Parsed::Matched(value),
        Err(err) => Parsed::Failed(err),
    }
}

/// `ErrorResponse`: the identified error fields.
pub fn backend_error(frame: &Frame) -> Parsed<BackendError> {
    if frame.tag != BackendError::MSGTYPE {
        return Parsed::Rejected;
    }
    match BackendError::decode(frame.payload.clone()) {
        Ok(err) => Parsed::Matched(err),
        Err(err) => failed(err),
    }
}

/// `Authentication`: Ok, CleartextPassword or MD5Password.
pub fn authentication(frame: &Frame) -> Parsed<Authentication> {
    if frame.tag != Authentication::MSGTYPE {
        return Parsed::Rejected;
    }
    match Authentication::decode(frame.payload.clone()) {
        Ok(auth) => Parsed::Matched(auth),
        Err(err) => failed(err),
    }
}

/// An undecoded row.
///
/// Columns are in wire order; a NULL column (length −1 on the wire) is
/// `None`. Value bytes are shared slices of the frame payload.
#[derive(Debug)]
pub struct RawRow {
    columns: Vec<Option<Bytes>>,
}

impl RawRow {
    fn decode(column_len: u16, mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut columns = Vec::with_capacity(column_len as usize);
        for _ in 0..column_len {
            // The length of the column value, in bytes (this count does not
            // include itself). Can be zero. As a special case, -1 indicates
            // a NULL column value. No value bytes follow in the NULL case.
            let len = body.try_get_i32("DataRow column length")?;
            let column = match len {
                -1 => None,
                len => Some(body.try_split_to(len as usize, "DataRow column value")?),
            };
            columns.push(column);
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at `index`. `Some(None)` is a NULL column; `None` is out of
    /// range.
    pub fn get(&self, index: usize) -> Option<Option<&[u8]>> {
        self.columns.get(index).map(|c| c.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&[u8]>> {
        self.columns.iter().map(|c| c.as_deref())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(tag: u8, payload: &'static [u8]) -> Frame {
        Frame::new(tag, payload)
    }

    #[test]
    fn command_complete_counts() {
        let cases: &[(&[u8], u64)] = &[
            (b"SELECT 1\0", 1),
            (b"INSERT 0 5\0", 5),
            (b"UPDATE 42\0", 42),
            (b"BEGIN\0", 0),
        ];
        for (payload, want) in cases {
            match command_complete(&Frame::new(b'C', *payload)) {
                Parsed::Matched(n) => assert_eq!(n, *want),
                other => panic!("{payload:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_tag_rejects() {
        assert!(matches!(command_complete(&frame(b'Z', b"I")), Parsed::Rejected));
        assert!(matches!(empty_query(&frame(b'C', b"")), Parsed::Rejected));
        assert!(matches!(ready_for_query(&frame(b'D', b"")), Parsed::Rejected));
        assert!(matches!(authentication(&frame(b'S', b"")), Parsed::Rejected));
        assert!(matches!(parse_complete(&frame(b'2', b"")), Parsed::Rejected));
        assert!(matches!(bind_complete(&frame(b'1', b"")), Parsed::Rejected));
    }

    #[test]
    fn extended_query_acknowledgements() {
        assert!(matches!(parse_complete(&frame(b'1', b"")), Parsed::Matched(())));
        assert!(matches!(bind_complete(&frame(b'2', b"")), Parsed::Matched(())));
    }

    #[test]
    fn data_row_single_field() {
        let f = frame(b'D', b"\x00\x01\x00\x00\x00\x01A");
        let value = match data_row(&f, |row| {
            assert_eq!(row.len(), 1);
            Ok(row.get(0).unwrap().unwrap().to_vec())
        }) {
            Parsed::Matched(v) => v,
            other => panic!("{other:?}"),
        };
        assert_eq!(value, b"A");
    }

    #[test]
    fn data_row_null_field() {
        let f = frame(b'D', b"\x00\x02\xff\xff\xff\xff\x00\x00\x00\x02hi");
        match data_row(&f, |row| {
            assert_eq!(row.get(0), Some(None));
            assert_eq!(row.get(1), Some(Some(&b"hi"[..])));
            Ok(())
        }) {
            Parsed::Matched(()) => {}
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn data_row_truncated_fails() {
        let f = frame(b'D', b"\x00\x02\x00\x00\x00\x01A");
        assert!(matches!(data_row(&f, |_| Ok(())), Parsed::Failed(_)));
    }

    #[test]
    fn parameter_status_pair() {
        let f = frame(b'S', b"integer_datetimes\0on\0");
        match parameter_status(&f) {
            Parsed::Matched((name, value)) => {
                assert_eq!(name, "integer_datetimes");
                assert_eq!(value, "on");
            }
            other => panic!("{other:?}"),
        }
    }
}
