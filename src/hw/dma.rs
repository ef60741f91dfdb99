//! Driver for a BCM283x/BCM2711 DMA Lite engine, used here purely as a register-level sink: the
//! compiler (`crate::compiler`) builds the control-block graph off target, and this module only
//! has to reproduce the hardware's control-and-status register semantics exactly.
//!
//! Grounded on the sibling bootloader's `dma.rs`, adapted from a single bare-metal UART transfer
//! to driving a free-running, DREQ-paced PWM FIFO feed.

use std::num::NonZeroU64;

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use crate::hw::mmio::MmioRegion;

register_bitfields! {
    u32,
    /// DMA Control and Status register.
    CS [
        /// DMA Channel Reset. Cannot be read; self-clears.
        RESET OFFSET(31) NUMBITS(1) [
            Reset = 0b1,
        ],
        /// Abort the current CB; the DMA loads the next CB and continues.
        ABORT OFFSET(30) NUMBITS(1) [
            AbortCurrent = 0b1,
        ],
        WAIT_FOR_OUTSTANDING_WRITES OFFSET(28) NUMBITS(1) [
            NoPause = 0b0,
            PauseForOutstandingWrites = 0b1,
        ],
        /// DMA Error. Indicates a latched error flag in `DEBUG`.
        ERROR OFFSET(8) NUMBITS(1) [
            NoError = 0b0,
            Error = 0b1,
        ],
        /// Interrupt status. Set when the CB's transfer ends and `INTEN` was set. Write to clear.
        INT OFFSET(2) NUMBITS(1) [
            NoInterrupt = 0b0,
            Interrupt = 0b1,
        ],
        /// Set when the transfer described by the current CB is complete. Write to clear.
        END OFFSET(1) NUMBITS(1) [
            InProgress = 0b0,
            End = 0b1,
        ],
        /// Activates the DMA; self-clears once `NEXTCONBK = 0` is loaded.
        ACTIVE OFFSET(0) NUMBITS(1) [
            Idle = 0b0,
            Active = 0b1,
        ]
    ],
    CONBLK_AD [
        SCB_ADDR OFFSET(0) NUMBITS(32) []
    ],
    /// Latched error flags, cleared by writing 1 to the corresponding bit.
    DEBUG [
        READ_LAST_NOT_SET_ERROR OFFSET(2) NUMBITS(1) [],
        FIFO_ERROR OFFSET(1) NUMBITS(1) [],
        READ_ERROR OFFSET(0) NUMBITS(1) []
    ]
}

register_structs! {
    Registers {
        (0x00 => cs: ReadWrite<u32, CS::Register>),
        (0x04 => conblk_ad: ReadWrite<u32, CONBLK_AD::Register>),
        (0x08 => _unused0),
        (0x20 => debug: ReadWrite<u32, DEBUG::Register>),
        (0x24 => _unused1),
        (0xFE0 => int_status: ReadOnly<u32>),
        (0xFE4 => _unused2),
        (0xFF0 => enable: ReadWrite<u32>),
        (0xFF4 => @END),
    }
}

/// Peripherals that can pace a DMA Lite transfer via `DREQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Peripheral {
    /// Unpaced, free-running transfer.
    Unpaced = 0,
    /// PWM channel 1/2 FIFO `DREQ`.
    Pwm = 5,
}

/// Transient error flags latched in the `DEBUG` register, as consumed by the watchdog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaErrors {
    /// A read from the source address was refused by the bus.
    pub read_error: bool,
    /// A write response indicated the FIFO was not able to accept data in time.
    pub fifo_error: bool,
    /// The last AXI read was not flagged before a new one began.
    pub read_last_not_set_error: bool,
}

impl DmaErrors {
    /// Whether any error flag is set.
    #[must_use]
    pub const fn any(self) -> bool {
        self.read_error || self.fifo_error || self.read_last_not_set_error
    }
}

/// A driver for one BCM283x/BCM2711 DMA Lite channel.
pub struct Dma {
    region: MmioRegion,
}

impl Dma {
    /// Byte offset, within the DMA channel's register window, of a channel's `CONBLK_AD`
    /// register -- used by the compiler to know nothing (the compiler never touches hardware
    /// directly), and by the driver to kick off a chain.
    pub const CONBLK_AD_OFFSET: usize = 0x04;

    /// Maps the registers for a single DMA Lite channel at `phys_base`.
    ///
    /// # Errors
    /// Propagates `mmap` failures from [`MmioRegion::map`].
    pub fn map(phys_base: u64) -> std::io::Result<Self> {
        Ok(Self {
            region: MmioRegion::map(phys_base, std::mem::size_of::<Registers>())?,
        })
    }

    fn registers(&self) -> &Registers {
        // SAFETY: `region` was mapped with exactly `size_of::<Registers>()` bytes at construction.
        unsafe { &*self.region.register(0).as_ptr().cast::<Registers>() }
    }

    /// Resets the channel and configures it to ignore the shared AXI-write-response pause (the
    /// generator never needs to know write completion, only that a CB finished loading).
    pub fn reset_and_enable(&mut self) {
        let registers = self.registers();
        registers.cs.write(CS::RESET::Reset);
        registers
            .cs
            .write(CS::WAIT_FOR_OUTSTANDING_WRITES::NoPause);
    }

    /// Programs the address of the first control block and activates the channel.
    pub fn start(&mut self, first_cb_bus_address: NonZeroU64) {
        let registers = self.registers();
        #[expect(clippy::unwrap_used, reason = "bus addresses always fit in 32 bits on this platform")]
        registers
            .conblk_ad
            .write(CONBLK_AD::SCB_ADDR.val(u32::try_from(first_cb_bus_address.get()).unwrap()));
        registers.cs.modify(CS::ACTIVE::Active);
    }

    /// Returns whether the channel currently has an active transfer in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registers().cs.matches_any(CS::ACTIVE::Active)
    }

    /// Aborts the in-flight CB (the DMA proceeds to the next linked CB).
    pub fn abort(&mut self) {
        self.registers().cs.modify(CS::ABORT::AbortCurrent);
    }

    /// Reads and clears any latched transient error flags.
    pub fn take_errors(&mut self) -> DmaErrors {
        let registers = self.registers();
        let debug = registers.debug.extract();
        let errors = DmaErrors {
            read_error: debug.matches_all(DEBUG::READ_ERROR::SET),
            fifo_error: debug.matches_all(DEBUG::FIFO_ERROR::SET),
            read_last_not_set_error: debug.matches_all(DEBUG::READ_LAST_NOT_SET_ERROR::SET),
        };
        if errors.any() {
            registers.debug.set(debug.get());
        }
        if registers.cs.matches_any(CS::ERROR::Error) {
            registers.cs.modify(CS::INT::Interrupt + CS::END::End);
        }
        errors
    }
}

/// Transfer-info flags for a Data control block, matching §4.4's `Data CB` flag set exactly.
#[bitfield_struct::bitfield(u32)]
pub struct TransferInfo {
    pub inten: bool,
    pub tdmode: bool,
    #[bits(1)]
    _res0: u8,
    pub wait_resp: bool,
    pub dest_inc: bool,
    pub dest_width: bool,
    pub dest_dreq: bool,
    pub dest_ignore: bool,
    pub src_inc: bool,
    pub src_width: bool,
    pub src_dreq: bool,
    pub src_ignore: bool,
    #[bits(4)]
    pub burst_length: u8,
    #[bits(5)]
    pub permap: u8,
    #[bits(5)]
    pub waits: u8,
    pub no_wide_bursts: bool,
    #[bits(5)]
    _res1: u8,
}

/// One DMA Lite control block: 8 32-bit words, 256-bit (32-byte) aligned, exactly as the hardware
/// requires.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy)]
pub struct ControlBlock {
    pub transfer_info: TransferInfo,
    pub src_addr: u32,
    pub dest_addr: u32,
    pub transfer_len: u32,
    pub stride: u32,
    pub next_block_addr: u32,
    _res0: u32,
    _res1: u32,
}

impl ControlBlock {
    /// Builds a control block from its logical fields; `_res*` are always zero per the hardware
    /// spec.
    #[must_use]
    pub const fn new(
        transfer_info: TransferInfo,
        src_addr: u32,
        dest_addr: u32,
        transfer_len: u32,
        stride: u32,
        next_block_addr: u32,
    ) -> Self {
        Self {
            transfer_info,
            src_addr,
            dest_addr,
            transfer_len,
            stride,
            next_block_addr,
            _res0: 0,
            _res1: 0,
        }
    }
}

/// Packs the `TXFR_LEN` register for a 2D-mode (`TDMODE = 1`) transfer: `x_len` bytes per row,
/// `y_count` rows.
///
/// # Panics
/// Panics if `y_count == 0` (the register encodes `y_count - 1`).
#[must_use]
pub const fn pack_2d_transfer_len(x_len: u16, y_count: u16) -> u32 {
    assert!(y_count > 0, "2D transfers need at least one row");
    (x_len as u32) | (((y_count - 1) as u32) << 16)
}

/// Packs the `STRIDE` register for a 2D-mode transfer: signed byte strides applied to the source
/// and destination addresses after each row.
#[must_use]
pub const fn pack_2d_stride(src_stride: i16, dest_stride: i16) -> u32 {
    (src_stride as u16 as u32) | ((dest_stride as u16 as u32) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_is_32_bytes_and_aligned() {
        assert_eq!(std::mem::size_of::<ControlBlock>(), 32);
        assert_eq!(std::mem::align_of::<ControlBlock>(), 32);
    }

    #[test]
    fn transfer_info_round_trips_dreq_fields() {
        let info = TransferInfo::new()
            .with_dest_dreq(true)
            .with_src_dreq(false)
            .with_permap(Peripheral::Pwm as u8)
            .with_no_wide_bursts(true);
        assert!(info.dest_dreq());
        assert!(!info.src_dreq());
        assert_eq!(info.permap(), 5);
        assert!(info.no_wide_bursts());
    }

    #[test]
    fn two_word_gpio_row_pair_packs_as_expected() {
        assert_eq!(pack_2d_transfer_len(4, 2), 0x0001_0004);
        assert_eq!(pack_2d_stride(0, 8), 0x0008_0000);
    }
}
