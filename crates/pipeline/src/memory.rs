//! Hardware-aligned host memory for input buffers.
//!
//! RAII wrapper around an aligned heap allocation. The decoder reads the
//! region directly while a buffer registered from it is in flight, so the
//! allocation never moves and is freed only on drop.

use std::alloc::{self, Layout, LayoutError};
use std::ptr::NonNull;

use ip_common::MemoryRegion;
use tracing::debug;

/// A zero-initialized, aligned, fixed-size memory block.
pub struct AlignedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region uniquely owns its allocation. Concurrent access by the
// hardware is governed by the buffer pool's released/in-flight protocol.
unsafe impl Send for AlignedRegion {}
unsafe impl Sync for AlignedRegion {}

impl AlignedRegion {
    /// Allocate `size` zeroed bytes aligned to `alignment`.
    ///
    /// An alignment of 0 is treated as 1.
    ///
    /// # Errors
    ///
    /// Fails if `alignment` is not a power of two or the rounded size
    /// overflows `isize`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize, alignment: usize) -> Result<Self, LayoutError> {
        assert!(size > 0, "region size must be > 0");
        let layout = Layout::from_size_align(size, alignment.max(1))?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };

        debug!(size, alignment = layout.align(), "Allocated aligned input region");
        Ok(Self { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `len` initialized bytes for our lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for `len` bytes and `&mut self` is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Descriptor handed to the component at registration.
    pub fn descriptor(&self) -> MemoryRegion {
        MemoryRegion {
            ptr: self.ptr.as_ptr(),
            len: self.layout.size(),
            alignment: self.layout.align(),
        }
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for AlignedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedRegion")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_aligned_and_zeroed() {
        let region = AlignedRegion::new(1000, 64).unwrap();
        assert_eq!(region.len(), 1000);
        assert_eq!(region.alignment(), 64);
        assert_eq!(region.address() % 64, 0);
        assert!(region.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_alignment_means_byte_aligned() {
        let region = AlignedRegion::new(16, 0).unwrap();
        assert_eq!(region.alignment(), 1);
    }

    #[test]
    fn writes_are_visible_through_descriptor() {
        let mut region = AlignedRegion::new(8, 16).unwrap();
        region.as_mut_slice().copy_from_slice(b"abcdefgh");
        let desc = region.descriptor();
        assert_eq!(desc.len, 8);
        assert_eq!(desc.alignment, 16);
        assert_eq!(desc.address(), region.address());
        // SAFETY: descriptor points at the live region.
        let bytes = unsafe { std::slice::from_raw_parts(desc.ptr, desc.len) };
        assert_eq!(bytes, b"abcdefgh");
    }

    #[test]
    #[should_panic(expected = "region size must be > 0")]
    fn zero_size_panics() {
        let _ = AlignedRegion::new(0, 16);
    }

    #[test]
    fn non_power_of_two_alignment_is_an_error() {
        assert!(AlignedRegion::new(64, 24).is_err());
    }
}
