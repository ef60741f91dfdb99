//! Typed, clamped configuration values.
//!
//! These mirror the source's property-wrapper style: rather than passing raw floats and pin
//! numbers around and validating them ad hoc at every call site, each value is constructed once
//! through a clamping or checked constructor and is valid for the rest of its lifetime.

use crate::hw::gpio::Gpio;

/// Physical bit duration `D`, in microseconds.
///
/// Clamped to a range that keeps both the logical-1 half (`round(58 / D)`) and the logical-0 half
/// (`round(100 / D)`, legal over NMRA S-9.1's 99-9900 us zero-half range) representable as at
/// least one physical bit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, derive_more::Into)]
pub struct BitDuration(f64);

impl BitDuration {
    /// The production target bit duration: 14.5 us.
    pub const DEFAULT: Self = Self(14.5);

    /// Smallest representable duration: below this, a logical-0 half cycle would have to exceed
    /// the NMRA S-9.1 legal zero range (9900 us) to stay at a whole number of physical bits.
    const MIN_US: f64 = 100.0 / 9900.0;
    /// Largest duration for which a logical-0 half cycle stays within the NMRA S-9.1 legal zero
    /// range (9900 us per half).
    const MAX_US: f64 = 9900.0;

    /// Constructs a bit duration, clamping to the representable range.
    #[must_use]
    pub fn new(microseconds: f64) -> Self {
        Self(microseconds.clamp(Self::MIN_US, Self::MAX_US))
    }

    /// The duration, in microseconds.
    #[must_use]
    pub const fn as_micros(self) -> f64 {
        self.0
    }

    /// Number of physical bits per half of a logical 1 (`round(58 / D)`, minimum 1).
    #[must_use]
    pub fn logical_one_half_bits(self) -> u32 {
        round_half_bits(58.0, self.0)
    }

    /// Number of physical bits per half of a logical 0 (`round(100 / D)`, minimum 1).
    #[must_use]
    pub fn logical_zero_half_bits(self) -> u32 {
        round_half_bits(100.0, self.0)
    }
}

impl Default for BitDuration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rounds `target_us / duration_us` to the nearest integer, never below 1.
fn round_half_bits(target_us: f64, duration_us: f64) -> u32 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "bit counts are always small positive integers in practice"
    )]
    #[expect(clippy::cast_sign_loss, reason = "target_us / duration_us is always positive")]
    let bits = (target_us / duration_us).round() as u32;
    bits.max(1)
}

/// A GPIO pin number, clamped to the Raspberry Pi's valid pin range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Into)]
pub struct GpioPin(u8);

impl GpioPin {
    /// Constructs a pin number, clamping to the valid range of the GPIO controller.
    #[must_use]
    pub fn new(pin: u8) -> Self {
        Self(pin.min(Gpio::NUM_PINS - 1))
    }

    /// The raw pin number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

/// Preamble length, in logical-1 bits. Clamped to the NMRA-minimum of 14 bits for operations
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Into)]
pub struct PreambleLength(u8);

impl PreambleLength {
    /// The NMRA S-9.2 minimum preamble length for operations-mode packets.
    pub const MINIMUM: u8 = 14;

    /// Constructs a preamble length, clamping up to the NMRA minimum.
    #[must_use]
    pub fn new(length: u8) -> Self {
        Self(length.max(Self::MINIMUM))
    }

    /// The preamble length, in bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl Default for PreambleLength {
    fn default() -> Self {
        Self::new(Self::MINIMUM)
    }
}

/// Top-level configuration for a [`crate::driver::Generator`].
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Physical bit duration `D`.
    pub bit_duration: BitDuration,
    /// GPIO pin carrying the serialised DCC signal (routed to the PWM alternate function).
    pub dcc_pin: GpioPin,
    /// GPIO pin gating track power / signalling the RailCom cutout window.
    pub railcom_pin: GpioPin,
    /// GPIO pin toggled to bracket packets under test, for scope triggering.
    pub debug_pin: GpioPin,
    /// Default preamble length for operations-mode packets.
    pub preamble_length: PreambleLength,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            bit_duration: BitDuration::DEFAULT,
            dcc_pin: GpioPin::new(18),
            railcom_pin: GpioPin::new(17),
            debug_pin: GpioPin::new(27),
            preamble_length: PreambleLength::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_duration_matches_spec_example() {
        let d = BitDuration::DEFAULT;
        assert_eq!(d.logical_one_half_bits(), 4);
        assert_eq!(d.logical_zero_half_bits(), 7);
    }

    #[test]
    fn gpio_pin_clamps_out_of_range() {
        assert_eq!(GpioPin::new(255).number(), Gpio::NUM_PINS - 1);
        assert_eq!(GpioPin::new(3).number(), 3);
    }

    #[test]
    fn preamble_length_clamps_below_minimum() {
        assert_eq!(PreambleLength::new(2).bits(), PreambleLength::MINIMUM);
        assert_eq!(PreambleLength::new(20).bits(), 20);
    }
}
