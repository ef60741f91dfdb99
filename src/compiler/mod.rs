//! The DMA control-block compiler (§4.4): turns a [`crate::bitstream::Bitstream`] into a graph of
//! [`control_block::LogicalControlBlock`]s, tracking PWM range changes, the two-DREQ GPIO event
//! delay, coalescing, and loop closure via [`state::StateTable`].

mod compile;
mod control_block;
mod state;

pub use compile::{compile, CompiledGraph, GpioPins, ResumeState};
pub use control_block::{CbKind, LogicalControlBlock};
pub use state::{Breakpoint, PendingEvent, PendingQueue};
