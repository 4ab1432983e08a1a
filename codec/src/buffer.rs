//! Sample buffers exchanged with codecs and containers.

use crate::Frame;

bitflags::bitflags! {
    /// Per-sample flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SampleFlags: u32 {
        /// The sample can be decoded without reference to other samples.
        const KEY_FRAME = 1;
        /// The sample carries codec configuration rather than media data.
        const CODEC_CONFIG = 2;
        /// Last sample of the stream.
        const END_OF_STREAM = 4;
    }
}

/// Metadata describing one sample inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of the valid data in the buffer.
    pub offset: usize,
    /// Number of valid bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Sample flags.
    pub flags: SampleFlags,
}

impl BufferInfo {
    /// Info for a sample of `size` bytes starting at offset zero.
    #[must_use]
    pub const fn new(size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Zero-length end-of-stream marker.
    #[must_use]
    pub const fn end_of_stream() -> Self {
        Self::new(0, 0, SampleFlags::END_OF_STREAM)
    }

    /// Whether the end-of-stream flag is set.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    /// Whether this buffer holds codec configuration.
    #[must_use]
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }
}

/// Result of polling a codec's output queue.
#[derive(Debug)]
pub enum Dequeue<T> {
    /// An output buffer is ready.
    Ready(T),
    /// Nothing ready within the timeout. Not an error; poll again later.
    Empty,
    /// The output format changed (or became known). Query it before the next
    /// buffer is consumed.
    FormatChanged,
}

impl<T> Dequeue<T> {
    /// Whether nothing was ready.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A free codec input slot, owned by the caller until it is queued back.
#[derive(Debug)]
pub struct InputBuffer {
    index: usize,
    data: Vec<u8>,
}

impl InputBuffer {
    pub(crate) fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            data: vec![0; capacity],
        }
    }

    /// Slot index inside the codec.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Writable storage, sized to the slot capacity.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Slot capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A filled codec output slot.
///
/// Encoders fill [`data`](Self::data); decoders rendering to a surface carry
/// the decoded [`Frame`] instead.
pub struct OutputBuffer {
    index: usize,
    info: BufferInfo,
    data: Vec<u8>,
    frame: Option<Frame>,
}

impl OutputBuffer {
    pub(crate) fn encoded(index: usize, info: BufferInfo, data: Vec<u8>) -> Self {
        Self {
            index,
            info,
            data,
            frame: None,
        }
    }

    pub(crate) fn decoded(index: usize, info: BufferInfo, frame: Option<Frame>) -> Self {
        Self {
            index,
            info,
            data: Vec::new(),
            frame,
        }
    }

    /// Slot index inside the codec.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Sample metadata.
    #[must_use]
    pub const fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// Valid encoded bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        let end = (self.info.offset + self.info.size).min(self.data.len());
        &self.data[self.info.offset.min(end)..end]
    }

    pub(crate) fn take_frame(&mut self) -> Option<Frame> {
        self.frame.take()
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("index", &self.index)
            .field("info", &self.info)
            .field("has_frame", &self.frame.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_container_values() {
        assert_eq!(SampleFlags::KEY_FRAME.bits(), 1);
        assert_eq!(SampleFlags::CODEC_CONFIG.bits(), 2);
        assert_eq!(SampleFlags::END_OF_STREAM.bits(), 4);
    }

    #[test]
    fn end_of_stream_marker_is_empty() {
        let info = BufferInfo::end_of_stream();
        assert_eq!(info.size, 0);
        assert!(info.is_end_of_stream());
        assert!(!info.is_codec_config());

        let key = BufferInfo::new(10, 40, SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM);
        assert!(key.is_end_of_stream());
        assert_eq!(key.flags - SampleFlags::END_OF_STREAM, SampleFlags::KEY_FRAME);
    }
}
