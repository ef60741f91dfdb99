//! DMA-visible "uncached" memory allocation, built on top of [`crate::hw::mailbox`]'s memory
//! tags and a `/dev/mem` mapping of the bus address the firmware hands back.
//!
//! There is no bare-metal equivalent of this in the sibling bootloader: it runs with identity
//! mapped, already-known physical memory. A hosted process has no such guarantee, so control
//! blocks and their data have to be allocated through the VideoCore firmware, which is the only
//! party that can hand out memory the DMA engine can address and that survives being read back
//! uncached.

use std::io;
use std::ptr::NonNull;

use thiserror::Error;

use crate::hw::mailbox::{AllocFlags, Mailbox, MemoryHandle};

/// Bus addresses above this bit are aliased onto the ARM physical range through the "L2 cache
/// disabled" alias window; masking it off yields the address `/dev/mem` expects.
const BUS_TO_PHYS_MASK: u32 = !0xC000_0000;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("VideoCore firmware refused to allocate {requested} bytes")]
    FirmwareRefused { requested: u32 },
    #[error("VideoCore firmware refused to lock the allocated region")]
    LockRefused,
    #[error("failed to map the locked region into this process: {0}")]
    Mmap(#[source] io::Error),
}

/// A region of memory allocated through the VideoCore firmware, locked to a fixed bus address,
/// and mapped into this process -- the only kind of memory the compiled control-block graph and
/// its data may live in.
pub struct UncachedRegion {
    mailbox_handle: MemoryHandle,
    bus_address: u32,
    virtual_base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by this `UncachedRegion` and all access goes through
// volatile reads/writes; there is no thread-affinity requirement on the underlying mapping.
unsafe impl Send for UncachedRegion {}

impl UncachedRegion {
    /// Allocates, locks, and maps `len` bytes of direct (non-cacheable) memory, aligned to
    /// `alignment`.
    ///
    /// # Errors
    /// Returns [`AllocError`] if the firmware refuses the allocation or the lock, or if mapping
    /// the resulting bus address through `/dev/mem` fails.
    pub fn allocate(mailbox: &mut Mailbox, len: usize, alignment: u32) -> Result<Self, AllocError> {
        #[expect(clippy::cast_possible_truncation, reason = "control-block graphs are well under 4 GiB")]
        let requested = len as u32;
        let mailbox_handle = mailbox
            .allocate_memory(requested, alignment, AllocFlags::DIRECT)
            .ok_or(AllocError::FirmwareRefused { requested })?;

        let bus_address = match mailbox.lock_memory(mailbox_handle) {
            Some(address) => address,
            None => {
                mailbox.release_memory(mailbox_handle);
                return Err(AllocError::LockRefused);
            }
        };

        let phys_address = u64::from(bus_address & BUS_TO_PHYS_MASK);
        let region = crate::hw::mmio::MmioRegion::map(phys_address, len).map_err(|error| {
            mailbox.unlock_memory(mailbox_handle);
            mailbox.release_memory(mailbox_handle);
            AllocError::Mmap(error)
        })?;

        // SAFETY: `region`'s base is a valid, non-null mapping of exactly `len` bytes; we take
        // ownership of the mapping by forgetting `region` after copying its base pointer out.
        let virtual_base = unsafe { region.register(0) }.cast::<u8>();
        std::mem::forget(region);

        Ok(Self {
            mailbox_handle,
            bus_address,
            virtual_base,
            len,
        })
    }

    /// The bus address the DMA engine must use to reach this region (as opposed to the ARM
    /// physical address used to `mmap` it).
    #[must_use]
    pub const fn bus_address(&self) -> u32 {
        self.bus_address
    }

    /// A pointer to the start of the mapped region, valid for `self.len()` bytes.
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.virtual_base
    }

    /// The length of the mapped region, in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapped region is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Releases the region back to the firmware. Requires the mailbox used to allocate it, since
    /// the unlock/release tags are sent over the same channel.
    pub fn free(self, mailbox: &mut Mailbox) {
        // SAFETY: `virtual_base`/`len` describe exactly the mapping created in `allocate`.
        unsafe {
            libc::munmap(self.virtual_base.as_ptr().cast(), self.len);
        }
        mailbox.unlock_memory(self.mailbox_handle);
        mailbox.release_memory(self.mailbox_handle);
    }
}
