//! Commits compiled control-block graphs into DMA-visible memory and splices successive streams
//! together at their breakpoints (§4.5).

mod compiled;

pub use compiled::{transfer_from, transfer_to, CompiledStream, HardwareTargets};
