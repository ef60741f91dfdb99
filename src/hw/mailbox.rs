//! Mailbox driver for the VideoCore property interface.
//!
//! See <https://github.com/raspberrypi/firmware/wiki/Mailbox-property-interface> for the wire
//! format. Grounded directly on the sibling bootloader's `mailbox.rs`: the same tagged-buffer
//! macro and `send` protocol, extended here with the memory-allocation tags the bootloader never
//! needed (it only queries/sets clocks).

use std::mem;
use std::num::NonZeroU32;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::hw::mmio::MmioRegion;

register_bitfields! {
    u32,
    DATA [
        DATA OFFSET(4) NUMBITS(28) [],
        CHANNEL OFFSET(0) NUMBITS(4) [
            PropertyTagsToVc = 8,
        ]
    ],
    STATUS [
        FULL OFFSET(31) NUMBITS(1) [],
        EMPTY OFFSET(30) NUMBITS(1) []
    ]
}

register_structs! {
    Registers {
        (0x00 => data: ReadWrite<u32, DATA::Register>),
        (0x04 => _unused0),
        (0x18 => status: ReadWrite<u32, STATUS::Register>),
        (0x1C => _unused1),
        (0x20 => write: ReadWrite<u32, DATA::Register>),
        (0x24 => @END),
    }
}

#[repr(u32)]
enum BufferStatus {
    Request = 0,
}

/// Clocks that can be queried/set via the mailbox.
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    /// The PWM peripheral clock.
    Pwm = 10,
}

/// Flags requested for an allocated memory region, per the `mem_alloc` tag's `flags` argument.
#[derive(Debug, Clone, Copy)]
pub struct AllocFlags(u32);

impl AllocFlags {
    /// Normal, non-cacheable, non-coherent direct-access memory -- the "uncached" region DMA
    /// needs to avoid needing explicit cache maintenance around every transfer.
    pub const DIRECT: Self = Self(0x0000_0004);
}

#[repr(u32)]
enum Tag {
    AllocateMemory = 0x3_000C,
    LockMemory = 0x3_000D,
    UnlockMemory = 0x3_000E,
    ReleaseMemory = 0x3_000F,
    GetClockRate = 0x3_0047,
    SetClockRate = 0x3_8002,
}

#[bitfield_struct::bitfield(u32)]
struct TagStatus {
    #[bits(31)]
    length: u32,
    is_response: bool,
}

macro_rules! count_tts {
    () => {0};
    ($_head:tt $($tail:tt)*) => {1 + count_tts!($($tail)*)};
}

macro_rules! buffer {
    ($name: ident, $tag: expr, $($field: ident: $type:ty,)+) => {
        #[repr(C, align(16))]
        struct $name {
            size: u32,
            status: u32,
            tag: u32,
            value_size: u32,
            tag_status: TagStatus,
            $($field: $type,)+
            end: u32,
        }

        impl $name {
            const fn new($($field: $type,)+) -> Self {
                Self {
                    size: mem::size_of::<Self>() as u32,
                    status: BufferStatus::Request as u32,
                    tag: $tag as u32,
                    tag_status: TagStatus::new().with_is_response(false),
                    value_size: 4 * count_tts!($($type )+),
                    $($field,)+
                    end: 0,
                }
            }
        }
    };
}

buffer! {
    GetClockRateBuffer,
    Tag::GetClockRate,
    clock: Clock,
    rate: u32,
}

buffer! {
    SetClockRateBuffer,
    Tag::SetClockRate,
    clock: Clock,
    rate: u32,
    skip_setting_turbo: u32,
}

buffer! {
    AllocateMemoryBuffer,
    Tag::AllocateMemory,
    size_or_handle: u32,
    alignment: u32,
    flags: u32,
}

buffer! {
    LockMemoryBuffer,
    Tag::LockMemory,
    handle: u32,
}

buffer! {
    UnlockMemoryBuffer,
    Tag::UnlockMemory,
    handle: u32,
}

buffer! {
    ReleaseMemoryBuffer,
    Tag::ReleaseMemory,
    handle: u32,
}

/// A handle to a region allocated through the mailbox's `mem_alloc` tag. Opaque to callers:
/// obtained from [`Mailbox::allocate_memory`] and consumed by
/// [`Mailbox::lock_memory`]/[`Mailbox::release_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle(u32);

/// A driver for the VideoCore property mailbox.
pub struct Mailbox {
    region: MmioRegion,
}

impl Mailbox {
    /// Maps the mailbox registers at `phys_base`.
    ///
    /// # Errors
    /// Propagates `mmap` failures from [`MmioRegion::map`].
    pub fn map(phys_base: u64) -> std::io::Result<Self> {
        Ok(Self {
            region: MmioRegion::map(phys_base, std::mem::size_of::<Registers>())?,
        })
    }

    fn registers(&self) -> &Registers {
        // SAFETY: mapped with exactly `size_of::<Registers>()` bytes at construction.
        unsafe { &*self.region.register(0).as_ptr().cast::<Registers>() }
    }

    /// Sends a tagged buffer and waits for the synchronous response. Returns whether the
    /// round-trip's channel/address echo matched what was sent.
    fn send<T>(&mut self, buffer: &mut T) -> bool {
        let registers = self.registers();
        let Ok(buffer_addr) = u32::try_from(std::ptr::from_mut(buffer).addr()) else {
            return false;
        };
        if buffer_addr % 16 != 0 {
            return false;
        }

        while registers.status.matches_any(STATUS::FULL::SET) {
            std::hint::spin_loop();
        }
        registers
            .write
            .write(DATA::DATA.val(buffer_addr >> 4) + DATA::CHANNEL::PropertyTagsToVc);

        while registers.status.matches_any(STATUS::EMPTY::SET) {
            std::hint::spin_loop();
        }
        let data = registers.data.extract();
        data.matches_all(DATA::DATA.val(buffer_addr >> 4) + DATA::CHANNEL::PropertyTagsToVc)
    }

    /// Returns the current clock rate for `clock`, in Hz.
    #[must_use]
    pub fn get_clock_rate(&mut self, clock: Clock) -> Option<NonZeroU32> {
        let mut buffer = GetClockRateBuffer::new(clock, 0);
        self.send(&mut buffer).then(|| NonZeroU32::new(buffer.rate)).flatten()
    }

    /// Sets the clock rate for `clock`, in Hz. Returns the rate actually applied, which may be
    /// clamped to a supported value.
    #[must_use]
    pub fn set_clock_rate(&mut self, clock: Clock, rate: NonZeroU32) -> Option<NonZeroU32> {
        let mut buffer = SetClockRateBuffer::new(clock, rate.get(), 0);
        self.send(&mut buffer).then(|| NonZeroU32::new(buffer.rate)).flatten()
    }

    /// Allocates `size` bytes of GPU-visible memory, aligned to `alignment`, with the given
    /// flags. Returns an opaque handle, or `None` if the firmware refused.
    #[must_use]
    pub fn allocate_memory(&mut self, size: u32, alignment: u32, flags: AllocFlags) -> Option<MemoryHandle> {
        let mut buffer = AllocateMemoryBuffer::new(size, alignment, flags.0);
        self.send(&mut buffer)
            .then(|| (buffer.size_or_handle != 0).then_some(MemoryHandle(buffer.size_or_handle)))
            .flatten()
    }

    /// Locks a previously allocated region, returning its bus address.
    #[must_use]
    pub fn lock_memory(&mut self, handle: MemoryHandle) -> Option<u32> {
        let mut buffer = LockMemoryBuffer::new(handle.0);
        self.send(&mut buffer).then_some(buffer.handle)
    }

    /// Unlocks a region previously returned by [`Self::lock_memory`].
    pub fn unlock_memory(&mut self, handle: MemoryHandle) {
        let mut buffer = UnlockMemoryBuffer::new(handle.0);
        self.send(&mut buffer);
    }

    /// Releases a region allocated via [`Self::allocate_memory`] back to the firmware.
    pub fn release_memory(&mut self, handle: MemoryHandle) {
        let mut buffer = ReleaseMemoryBuffer::new(handle.0);
        self.send(&mut buffer);
    }
}
