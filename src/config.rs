//! Dispatcher configuration.
use std::num::NonZeroUsize;

/// Tuning knobs for a [`Dispatcher`][crate::Dispatcher].
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Size of the receiver's read buffer.
    pub read_buffer_size: usize,
    /// Depth of the outbound byte queue; `None` is unbounded.
    pub outbound_queue_depth: Option<NonZeroUsize>,
    /// When `false`, an unexpected tag with no pending request is silently
    /// dropped instead of reported to the sink. Not recommended.
    pub strict_protocol: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            outbound_queue_depth: None,
            strict_protocol: true,
        }
    }
}

impl DispatcherConfig {
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = NonZeroUsize::new(depth);
        self
    }

    pub fn strict_protocol(mut self, strict: bool) -> Self {
        self.strict_protocol = strict;
        self
    }
}
