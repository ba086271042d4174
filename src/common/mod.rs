//! Supporting utility type.
mod bytestr;
pub use bytestr::ByteStr;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!($($tt)*)
    };
}

/// Warn when `verbose` feature enabled.
macro_rules! warning {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::warn!($($tt)*)
    };
}

pub(crate) use verbose;
pub(crate) use warning;
