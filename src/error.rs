//! Error types returned by the bitstream compiler, commit/splice engine, and configuration
//! constructors.
//!
//! Hardware transient errors (detected and cleared by the watchdog) are not represented here:
//! those are handled in-band and only ever reach the caller as a `log::warn!`/`log::error!` call.

use thiserror::Error;

/// Errors that can occur while compiling a [`crate::bitstream::Bitstream`] into a control-block
/// graph.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CompileError {
    /// The bitstream contained no `Data` event. Recoverable by prepending a preamble.
    #[error("bitstream contains no data events")]
    ContainsNoData,
    /// A `Breakpoint` event occurred before any `Data` control block had been emitted.
    #[error("breakpoint event occurred before any data was emitted")]
    BreakpointAtStart,
}

/// Errors that can occur while committing a compiled stream into DMA-visible memory.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The uncached memory allocator (GPU mailbox) failed to allocate a region.
    #[error("uncached memory allocation failed: {0}")]
    Allocation(#[from] crate::hw::mem::AllocError),
}

/// Errors that can occur while constructing a [`crate::config::GeneratorConfig`] or starting up
/// the [`crate::driver::Generator`].
#[derive(Debug, Error)]
pub enum StartupError {
    /// No integer clock divisor reproduces the requested bit duration from any available clock
    /// source.
    #[error("no clock source/divisor pair reaches a bit duration of {requested_us} us")]
    UnreachableBitDuration {
        /// The bit duration that could not be reached.
        requested_us: f64,
    },
}
