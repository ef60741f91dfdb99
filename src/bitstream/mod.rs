//! Logical-to-physical bit encoding: the packer (§4.1), the DCC logical-bit/preamble/packet
//! helpers (§4.2), and the packet framing helper (§4.3).

mod logical;
mod packer;
mod packet;

pub use packer::{Bitstream, Event, EVENT_DELAY};
pub use packet::Packet;
