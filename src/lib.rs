//! Hard-real-time DCC (Digital Command Control) signal generator for the Raspberry Pi PWM/DMA
//! engine.
//!
//! A DCC packet is turned into a sequence of physical PWM-serialiser bits by [`bitstream`], the
//! bit sequence is compiled into a graph of DMA control blocks by [`compiler`], the graph is
//! committed into DMA-visible memory and spliced onto a running transfer by [`transfer`], and
//! [`driver`] owns the PWM/clock/DMA/GPIO peripherals and exposes a queue of bitstreams to
//! transmit.

pub mod bitstream;
pub mod compiler;
pub mod config;
pub mod driver;
pub mod error;
pub mod hw;
pub mod transfer;
