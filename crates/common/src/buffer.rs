//! Buffer metadata exchanged with hardware components.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::types::{FrameGeometry, PortIndex};

/// In-flight identity of an input buffer.
///
/// Assigned when the engine acquires a buffer for filling and carried
/// through submission until the hardware hands the buffer back. Only
/// meaningful while the buffer is in flight.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub usize);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by a component when a buffer is registered on a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Opaque handle of a render-target image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Per-buffer flags.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const END_OF_STREAM: Self = Self(0x0001);
    pub const END_OF_FRAME: Self = Self(0x0010);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::END_OF_STREAM) {
            names.push("EOS");
        }
        if self.contains(Self::END_OF_FRAME) {
            names.push("EOF");
        }
        write!(f, "BufferFlags({})", names.join("|"))
    }
}

/// Metadata describing one input buffer submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    /// Registration handle on the component's input port.
    pub handle: BufferHandle,
    /// In-flight identity, echoed back on return.
    pub id: BufferId,
    /// Allocated size of the backing region.
    pub alloc_len: usize,
    /// Offset of the first valid byte.
    pub offset: usize,
    /// Number of valid bytes starting at `offset`.
    pub filled_len: usize,
    pub flags: BufferFlags,
}

impl BufferHeader {
    /// Reset the per-submission metadata, keeping handle and capacity.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
        self.flags = BufferFlags::NONE;
    }
}

/// Descriptor of an application-owned memory region handed to a component
/// at registration time.
///
/// The component may read `len` bytes starting at `ptr` whenever the
/// buffer registered from this region is in flight.
#[derive(Copy, Clone, Debug)]
pub struct MemoryRegion {
    pub ptr: *mut u8,
    pub len: usize,
    pub alignment: usize,
}

// SAFETY: a MemoryRegion is a plain descriptor. Access to the memory it
// points at follows the buffer ownership protocol: only the engine writes
// while the buffer is released, only the component reads while it is in
// flight.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    pub fn address(&self) -> usize {
        self.ptr as usize
    }
}

/// Hardware-reported definition of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub port: PortIndex,
    /// Number of buffers the port requires.
    pub buffer_count: usize,
    /// Minimum size of each buffer.
    pub buffer_size: usize,
    /// Required alignment of each buffer's memory.
    pub buffer_alignment: usize,
    pub enabled: bool,
    /// Frame geometry (meaningful on uncompressed ports).
    pub frame: FrameGeometry,
}

/// Buffer requirements of the decoder input port, queried once and cached
/// across sessions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferRequirements {
    pub count: usize,
    pub size: usize,
    pub alignment: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = BufferFlags::END_OF_STREAM | BufferFlags::END_OF_FRAME;
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(flags.contains(BufferFlags::END_OF_FRAME));
        assert_eq!(flags.bits(), 0x11);
        assert!(BufferFlags::NONE.is_empty());
    }

    #[test]
    fn flags_debug_lists_names() {
        let flags = BufferFlags::END_OF_STREAM | BufferFlags::END_OF_FRAME;
        assert_eq!(format!("{flags:?}"), "BufferFlags(EOS|EOF)");
    }

    #[test]
    fn header_clear_keeps_identity() {
        let mut header = BufferHeader {
            handle: BufferHandle(9),
            id: BufferId(2),
            alloc_len: 4096,
            offset: 16,
            filled_len: 100,
            flags: BufferFlags::END_OF_STREAM,
        };
        header.clear();
        assert_eq!(header.handle, BufferHandle(9));
        assert_eq!(header.alloc_len, 4096);
        assert_eq!(header.offset, 0);
        assert_eq!(header.filled_len, 0);
        assert!(header.flags.is_empty());
    }
}
