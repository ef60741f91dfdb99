//! The generator driver (§4.6) and its serial dispatch queue (§5).

mod dispatch;
mod generator;

pub use generator::{Completion, Generator};
