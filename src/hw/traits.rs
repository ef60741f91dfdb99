//! Trait seams separating the compiler/driver logic from the concrete register drivers in this
//! module, so the compiler and the dispatch queue can be exercised against fakes in tests without
//! `/dev/mem` access.

use std::num::NonZeroU64;

use crate::hw::clock::ClockSource;
use crate::hw::dma::DmaErrors;
use crate::hw::gpio::{FunctionSelect, Pull};
use crate::hw::pwm::PwmErrors;

/// Everything the generator driver needs from a DMA channel.
pub trait DmaSink {
    fn reset_and_enable(&mut self);
    fn start(&mut self, first_cb_bus_address: NonZeroU64);
    fn is_active(&self) -> bool;
    fn abort(&mut self);
    fn take_errors(&mut self) -> DmaErrors;
}

impl DmaSink for crate::hw::dma::Dma {
    fn reset_and_enable(&mut self) {
        Self::reset_and_enable(self);
    }

    fn start(&mut self, first_cb_bus_address: NonZeroU64) {
        Self::start(self, first_cb_bus_address);
    }

    fn is_active(&self) -> bool {
        Self::is_active(self)
    }

    fn abort(&mut self) {
        Self::abort(self);
    }

    fn take_errors(&mut self) -> DmaErrors {
        Self::take_errors(self)
    }
}

/// Everything the generator driver needs from the PWM peripheral.
pub trait PwmSink {
    fn disable(&mut self);
    fn clear_status(&mut self);
    fn clear_fifo(&mut self);
    fn set_range(&mut self, range: u32);
    fn enable_dma(&mut self, threshold: u8);
    fn enable_channel_1_serializer(&mut self);
    fn take_errors(&mut self) -> PwmErrors;
}

impl PwmSink for crate::hw::pwm::Pwm {
    fn disable(&mut self) {
        Self::disable(self);
    }

    fn clear_status(&mut self) {
        Self::clear_status(self);
    }

    fn clear_fifo(&mut self) {
        Self::clear_fifo(self);
    }

    fn set_range(&mut self, range: u32) {
        Self::set_range(self, range);
    }

    fn enable_dma(&mut self, threshold: u8) {
        Self::enable_dma(self, threshold);
    }

    fn enable_channel_1_serializer(&mut self) {
        Self::enable_channel_1_serializer(self);
    }

    fn take_errors(&mut self) -> PwmErrors {
        Self::take_errors(self)
    }
}

/// Everything the generator driver needs from the PWM clock generator.
pub trait ClockSink {
    fn disable(&mut self);
    fn enable(&mut self, source: ClockSource, divisor: u16);
}

impl ClockSink for crate::hw::clock::Clock {
    fn disable(&mut self) {
        Self::disable(self);
    }

    fn enable(&mut self, source: ClockSource, divisor: u16) {
        Self::enable(self, source, divisor);
    }
}

/// Everything the generator driver needs from the GPIO controller during startup/shutdown (the
/// compiler emits bus addresses of `GPSET0`/`GPCLR0` directly, bypassing this trait at runtime).
pub trait GpioSink {
    fn select_function(&mut self, pin: u8, function: FunctionSelect);
    fn select_pull(&mut self, pin: u8, pull: Pull);
    fn set_high(&mut self, pin: u8);
    fn set_low(&mut self, pin: u8);
}

impl GpioSink for crate::hw::gpio::Gpio {
    fn select_function(&mut self, pin: u8, function: FunctionSelect) {
        Self::select_function(self, pin, function);
    }

    fn select_pull(&mut self, pin: u8, pull: Pull) {
        Self::select_pull(self, pin, pull);
    }

    fn set_high(&mut self, pin: u8) {
        Self::set_high(self, pin);
    }

    fn set_low(&mut self, pin: u8) {
        Self::set_low(self, pin);
    }
}
