//! Driver for the BCM283x/BCM2711 PWM peripheral, used in serialiser mode: channel 1 is fed from
//! the DMA engine and simply shifts out whatever bit pattern the control-block graph supplies,
//! at a rate set by the attached clock divisor.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::hw::mmio::MmioRegion;

register_bitfields! {
    u32,
    CTL [
        /// Channel 2 serialiser mode: shift out MSB-first from `FIF2`.
        MODE2 OFFSET(9) NUMBITS(1) [],
        /// Channel 2 uses the FIFO rather than `DAT2`.
        USEF2 OFFSET(13) NUMBITS(1) [],
        PWEN2 OFFSET(8) NUMBITS(1) [],
        /// Clears the FIFO. Self-clearing.
        CLRF1 OFFSET(6) NUMBITS(1) [
            Clear = 0b1,
        ],
        /// Channel 1 uses the FIFO rather than `DAT1`.
        USEF1 OFFSET(5) NUMBITS(1) [],
        /// Channel 1 serialiser mode: shift out MSB-first from `FIF1`.
        MODE1 OFFSET(1) NUMBITS(1) [],
        PWEN1 OFFSET(0) NUMBITS(1) []
    ],
    STA [
        /// Channel 1 bus error.
        BERR OFFSET(8) NUMBITS(1) [],
        /// Channel 1 FIFO read error (underrun).
        GAPO1 OFFSET(4) NUMBITS(1) [],
        RERR1 OFFSET(3) NUMBITS(1) [],
        WERR1 OFFSET(2) NUMBITS(1) [],
        FULL1 OFFSET(0) NUMBITS(1) []
    ],
    DMAC [
        ENAB OFFSET(31) NUMBITS(1) [],
        #[expect(clippy::upper_case_acronyms, reason = "matches datasheet naming")]
        PANIC OFFSET(8) NUMBITS(8) [],
        DREQ OFFSET(0) NUMBITS(8) []
    ]
}

register_structs! {
    Registers {
        (0x00 => ctl: ReadWrite<u32, CTL::Register>),
        (0x04 => sta: ReadWrite<u32, STA::Register>),
        (0x08 => dmac: ReadWrite<u32, DMAC::Register>),
        (0x0C => _unused0),
        (0x10 => rng1: ReadWrite<u32>),
        (0x14 => dat1: ReadWrite<u32>),
        (0x18 => fif1: ReadWrite<u32>),
        (0x1C => _unused1),
        (0x20 => rng2: ReadWrite<u32>),
        (0x24 => dat2: ReadWrite<u32>),
        (0x28 => @END),
    }
}

/// Transient PWM error flags, cleared by the watchdog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PwmErrors {
    /// An AXI bus error occurred.
    pub bus_error: bool,
    /// The FIFO was read from while empty (the serialiser ran ahead of the DMA feed: an
    /// underrun, which glitches the track signal).
    pub fifo_read_error: bool,
    /// A write was attempted while the FIFO was full.
    pub fifo_write_error: bool,
    /// Channel 1 underran and produced a gap in the serialised output.
    pub gap_error: bool,
}

impl PwmErrors {
    /// Whether any error flag is set.
    #[must_use]
    pub const fn any(self) -> bool {
        self.bus_error || self.fifo_read_error || self.fifo_write_error || self.gap_error
    }
}

/// A driver for the PWM peripheral's channel 1, operated as a DMA-fed serialiser.
pub struct Pwm {
    region: MmioRegion,
}

impl Pwm {
    /// Byte offset of the FIFO register, as used by Data control blocks emitted by the compiler.
    pub const FIFO_OFFSET: usize = 0x18;
    /// Byte offset of channel 1's range register, as used by Range control blocks.
    pub const RANGE1_OFFSET: usize = 0x10;

    /// Maps the PWM peripheral's registers at `phys_base`.
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

    /// Disables both channels.
    pub fn disable(&mut self) {
        self.registers().ctl.set(0);
    }

    /// Clears channel 1's latched error status bits.
    pub fn clear_status(&mut self) {
        self.registers()
            .sta
            .write(STA::BERR::SET + STA::GAPO1::SET + STA::RERR1::SET + STA::WERR1::SET);
    }

    /// Clears channel 1's FIFO.
    pub fn clear_fifo(&mut self) {
        self.registers().ctl.modify(CTL::CLRF1::Clear);
    }

    /// Sets channel 1's range register (the serialiser bit count per word).
    pub fn set_range(&mut self, range: u32) {
        self.registers().rng1.set(range);
    }

    /// Sets the DMA DREQ threshold and enables the PWM's DMA request line.
    pub fn enable_dma(&mut self, threshold: u8) {
        self.registers()
            .dmac
            .write(DMAC::ENAB::SET + DMAC::DREQ.val(u32::from(threshold)) + DMAC::PANIC.val(u32::from(threshold)));
    }

    /// Enables channel 1 in FIFO-fed serialiser mode.
    pub fn enable_channel_1_serializer(&mut self) {
        self.registers()
            .ctl
            .modify(CTL::PWEN1::SET + CTL::MODE1::SET + CTL::USEF1::SET);
    }

    /// Reads and clears channel 1's transient error flags.
    #[must_use]
    pub fn take_errors(&mut self) -> PwmErrors {
        let sta = self.registers().sta.extract();
        let errors = PwmErrors {
            bus_error: sta.matches_all(STA::BERR::SET),
            fifo_read_error: sta.matches_all(STA::RERR1::SET),
            fifo_write_error: sta.matches_all(STA::WERR1::SET),
            gap_error: sta.matches_all(STA::GAPO1::SET),
        };
        if errors.any() {
            self.clear_status();
        }
        errors
    }
}
