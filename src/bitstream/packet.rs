//! Packet adapter: accepts already-assembled instruction bytes and produces the operations-mode
//! bitstream segment from §4.2's logical-bit helpers. Address/instruction/CV layout is out of
//! scope here -- callers hand this module bytes that are ready to frame and transmit.

/// A byte sequence terminated by an XOR-of-prior-bytes check byte, the wire shape every DCC
/// packet takes after leaving the (out-of-scope) instruction encoder.
///
/// This is plumbing only: the compiler and generator driver never call it, since real callers are
/// expected to hand [`crate::bitstream::Bitstream::append_operations_mode_packet`] bytes that are
/// already framed. It exists for assembling test fixtures and standalone tools without
/// duplicating the checksum rule at every call site.
pub struct Packet;

impl Packet {
    /// Appends an XOR checksum byte to `instruction_bytes`, returning the complete framed packet.
    #[must_use]
    pub fn framed(instruction_bytes: &[u8]) -> Vec<u8> {
        let checksum = instruction_bytes.iter().fold(0_u8, |acc, byte| acc ^ byte);
        let mut framed = Vec::with_capacity(instruction_bytes.len() + 1);
        framed.extend_from_slice(instruction_bytes);
        framed.push(checksum);
        framed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_packet_checksum_is_xor_of_prior_bytes() {
        let framed = Packet::framed(&[0x03, 0x78]);
        assert_eq!(framed, vec![0x03, 0x78, 0x03 ^ 0x78]);
    }

    #[test]
    fn empty_instruction_frames_to_a_single_zero_checksum_byte() {
        assert_eq!(Packet::framed(&[]), vec![0]);
    }
}
