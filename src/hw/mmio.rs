//! Memory-mapped I/O region helper, built on top of `/dev/mem` the way a hosted Raspberry Pi
//! peripheral driver has to be (the teacher's bare-metal equivalent maps physical addresses
//! directly; under Linux userspace we have to `mmap` them first).

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// A page-aligned window onto a block of physical memory, mapped into this process.
pub struct MmioRegion {
    virtual_base: NonNull<u32>,
    len: usize,
}

// SAFETY: all accesses go through volatile reads/writes on a `mmap`ed region; there is no
// interior mutability that would be unsound to share the pointer value (not the access) across
// threads.
unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// Maps `len` bytes of physical memory starting at `phys_base` for volatile read/write
    /// access.
    ///
    /// # Errors
    /// Returns the underlying I/O error if `/dev/mem` cannot be opened or the mapping fails.
    pub fn map(phys_base: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
        // SAFETY: `mmap` is called with a valid fd, a non-zero length, and `MAP_SHARED` so that
        // writes are visible to the peripheral; the resulting pointer is checked before use.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                #[expect(clippy::cast_possible_wrap, reason = "physical addresses fit in i64")]
                {
                    phys_base as i64
                },
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let virtual_base = NonNull::new(addr.cast::<u32>()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "mmap returned a null pointer")
        })?;
        Ok(Self { virtual_base, len })
    }

    /// Returns a pointer to the 32-bit register at `byte_offset` within this region.
    ///
    /// # Safety
    /// `byte_offset` must be a multiple of 4 and within the mapped length.
    #[must_use]
    pub unsafe fn register(&self, byte_offset: usize) -> NonNull<u32> {
        debug_assert!(byte_offset % 4 == 0, "register offsets must be word-aligned");
        debug_assert!(byte_offset < self.len, "register offset out of bounds");
        // SAFETY: the caller guarantees `byte_offset` is in-bounds and aligned.
        unsafe { NonNull::new_unchecked(self.virtual_base.as_ptr().cast::<u8>().add(byte_offset).cast::<u32>()) }
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        // SAFETY: `virtual_base`/`len` were returned together by a successful `mmap` above.
        unsafe {
            libc::munmap(self.virtual_base.as_ptr().cast(), self.len);
        }
    }
}
