//! Driver for the BCM283x clock manager's PWM clock generator.
//!
//! Writes to these registers require the clock manager password (`0x5A`) in the top byte, per
//! the datasheet; every write helper here bakes that in so callers cannot forget it.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::hw::mmio::MmioRegion;

/// Clock manager password required in bits `[31:24]` of every write to `CTL`/`DIV`.
const PASSWORD: u32 = 0x5A;

register_bitfields! {
    u32,
    CTL [
        PASSWD OFFSET(24) NUMBITS(8) [],
        /// Set while the clock generator is running.
        BUSY OFFSET(7) NUMBITS(1) [],
        /// Kills the clock generator immediately, glitch or not.
        KILL OFFSET(5) NUMBITS(1) [],
        ENAB OFFSET(4) NUMBITS(1) [],
        #[expect(clippy::upper_case_acronyms, reason = "matches datasheet naming")]
        SRC OFFSET(0) NUMBITS(4) [
            GroundOscillator = 0,
            Oscillator = 1,
            Plld = 6,
        ]
    ],
    DIV [
        PASSWD OFFSET(24) NUMBITS(8) [],
        DIVI OFFSET(12) NUMBITS(12) [],
        DIVF OFFSET(0) NUMBITS(12) []
    ]
}

register_structs! {
    Registers {
        (0x00 => ctl: ReadWrite<u32, CTL::Register>),
        (0x04 => div: ReadWrite<u32, DIV::Register>),
        (0x08 => @END),
    }
}

/// A named oscillator source for the PWM clock generator, with its nominal frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// The 19.2 MHz crystal oscillator.
    Oscillator,
    /// The PLLD clock, typically 500 MHz, used when a finer divisor is needed.
    Plld,
}

impl ClockSource {
    /// The nominal source frequency, in Hz.
    #[must_use]
    pub const fn frequency_hz(self) -> u32 {
        match self {
            Self::Oscillator => 19_200_000,
            Self::Plld => 500_000_000,
        }
    }

    const fn register_value(self) -> u32 {
        match self {
            Self::Oscillator => 1,
            Self::Plld => 6,
        }
    }
}

/// A driver for the PWM clock generator.
pub struct Clock {
    region: MmioRegion,
}

impl Clock {
    /// Maps the PWM clock generator's registers at `phys_base`.
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

    /// Stops the clock generator, waiting for it to report idle.
    pub fn disable(&mut self) {
        let registers = self.registers();
        registers.ctl.write(CTL::PASSWD.val(PASSWORD));
        while registers.ctl.matches_any(CTL::BUSY::SET) {
            std::hint::spin_loop();
        }
    }

    /// Selects `source` and an integer divisor, then enables the clock generator.
    ///
    /// `divisor` must be in `1..=4095`; the fractional divisor stage is left at zero, matching
    /// §4.6's "integer divisor" requirement.
    pub fn enable(&mut self, source: ClockSource, divisor: u16) {
        let registers = self.registers();
        registers
            .div
            .write(DIV::PASSWD.val(PASSWORD) + DIV::DIVI.val(u32::from(divisor)));
        registers.ctl.write(
            CTL::PASSWD.val(PASSWORD)
                + CTL::SRC.val(source.register_value())
                + CTL::ENAB::SET,
        );
        while !registers.ctl.matches_any(CTL::BUSY::SET) {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_frequencies_match_datasheet() {
        assert_eq!(ClockSource::Oscillator.frequency_hz(), 19_200_000);
        assert_eq!(ClockSource::Plld.frequency_hz(), 500_000_000);
    }
}
