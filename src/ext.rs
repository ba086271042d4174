use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, error::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// length is usize in rust, while postgres want i32,
    /// this will panic when overflow instead of wrapping
    fn to_i32(self) -> i32;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait StrExt {
    /// postgres String must be nul terminated
    fn nul_string_len(&self) -> i32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> i32 {
        self.len().to_i32() + 1/* nul */
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// Checked reads from an untrusted message body.
pub trait BytesExt: Sized {
    fn get_nul_bytes(&mut self, context: &'static str) -> Result<Self, ProtocolError>;

    fn get_nul_bytestr(&mut self, context: &'static str) -> Result<ByteStr, ProtocolError>;

    fn try_get_u8(&mut self, context: &'static str) -> Result<u8, ProtocolError>;

    fn try_get_u16(&mut self, context: &'static str) -> Result<u16, ProtocolError>;

    fn try_get_u32(&mut self, context: &'static str) -> Result<u32, ProtocolError>;

    fn try_get_i32(&mut self, context: &'static str) -> Result<i32, ProtocolError>;

    fn try_split_to(&mut self, at: usize, context: &'static str) -> Result<Self, ProtocolError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self, context: &'static str) -> Result<Self, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::truncated(context));
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self, context: &'static str) -> Result<ByteStr, ProtocolError> {
        ByteStr::from_utf8(self.get_nul_bytes(context)?)
            .map_err(|_| ProtocolError::utf8(context))
    }

    fn try_get_u8(&mut self, context: &'static str) -> Result<u8, ProtocolError> {
        if self.remaining() < 1 {
            return Err(ProtocolError::truncated(context));
        }
        Ok(self.get_u8())
    }

    fn try_get_u16(&mut self, context: &'static str) -> Result<u16, ProtocolError> {
        if self.remaining() < 2 {
            return Err(ProtocolError::truncated(context));
        }
        Ok(self.get_u16())
    }

    fn try_get_u32(&mut self, context: &'static str) -> Result<u32, ProtocolError> {
        if self.remaining() < 4 {
            return Err(ProtocolError::truncated(context));
        }
        Ok(self.get_u32())
    }

    fn try_get_i32(&mut self, context: &'static str) -> Result<i32, ProtocolError> {
        if self.remaining() < 4 {
            return Err(ProtocolError::truncated(context));
        }
        Ok(self.get_i32())
    }

    fn try_split_to(&mut self, at: usize, context: &'static str) -> Result<Self, ProtocolError> {
        if self.remaining() < at {
            return Err(ProtocolError::truncated(context));
        }
        Ok(self.split_to(at))
    }
}
