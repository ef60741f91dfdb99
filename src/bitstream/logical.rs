//! Logical-bit encoder: turns DCC 0/1 symbols, preambles, packet framing, and the RailCom cutout
//! into physical-bit appends on a [`Bitstream`].

use crate::bitstream::packer::{Bitstream, Event};
use crate::config::PreambleLength;

/// Physical-bit delay, after the packet-end bit, before the RailCom cutout gate opens.
const RAILCOM_CUTOUT_DELAY_US: f64 = 26.0;
/// Total physical-bit span, measured from the packet-end bit, that the RailCom cutout gate must
/// remain open for.
const RAILCOM_CUTOUT_TOTAL_US: f64 = 454.0;

impl<const W: u32> Bitstream<W> {
    /// Appends the physical-bit pattern for a single DCC logical bit: a symmetric high/low pulse
    /// pair, `round(58/D)` bits per half for a 1, `round(100/D)` bits per half for a 0.
    pub fn append_logical_bit(&mut self, bit: bool) {
        let half_bits = if bit {
            self.bit_duration().logical_one_half_bits()
        } else {
            self.bit_duration().logical_zero_half_bits()
        };
        self.append_repeating(true, half_bits);
        self.append_repeating(false, half_bits);
    }

    /// Appends `length` consecutive logical 1s.
    pub fn append_preamble(&mut self, length: PreambleLength) {
        for _ in 0..length.bits() {
            self.append_logical_bit(true);
        }
    }

    /// Appends one DCC packet: for each byte, a logical-0 byte-start bit followed by the byte's 8
    /// bits MSB-first, then a single logical-1 packet-end bit.
    pub fn append_packet(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.append_logical_bit(false);
            for bit_index in (0..8).rev() {
                self.append_logical_bit(byte & (1 << bit_index) != 0);
            }
        }
        self.append_logical_bit(true);
    }

    /// Appends the RailCom cutout sequence: a short delay after packet-end, then
    /// `RailComCutoutStart`, enough further bits to reach a total of `ceil(454 us / D)` bits since
    /// packet-end, then `RailComCutoutEnd`.
    pub fn append_railcom_cutout(&mut self) {
        let duration = self.bit_duration().as_micros();
        let delay_bits = ceil_bits(RAILCOM_CUTOUT_DELAY_US, duration);
        let total_bits = ceil_bits(RAILCOM_CUTOUT_TOTAL_US, duration);

        self.append_repeating(true, delay_bits);
        self.append_event(Event::RailComCutoutStart);
        self.append_repeating(true, total_bits.saturating_sub(delay_bits));
        self.append_event(Event::RailComCutoutEnd);
    }

    /// Appends a complete operations-mode packet: preamble, optional debug bracket, the framed
    /// packet bytes, and the RailCom cutout.
    pub fn append_operations_mode_packet(&mut self, bytes: &[u8], preamble_length: PreambleLength, debug: bool) {
        self.append_preamble(preamble_length);
        if debug {
            self.append_event(Event::DebugStart);
        }
        self.append_packet(bytes);
        self.append_railcom_cutout();
        if debug {
            self.append_event(Event::DebugEnd);
        }
    }
}

/// `ceil(target_us / duration_us)`, as a bit count.
fn ceil_bits(target_us: f64, duration_us: f64) -> u32 {
    #[expect(clippy::cast_possible_truncation, reason = "cutout spans are always small bit counts")]
    #[expect(clippy::cast_sign_loss, reason = "target_us / duration_us is always positive")]
    {
        (target_us / duration_us).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitDuration;

    #[test]
    fn logical_one_at_default_duration_is_eight_bits() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_logical_bit(true);
        assert_eq!(bs.duration_us(), 8.0 * BitDuration::DEFAULT.as_micros());
    }

    #[test]
    fn logical_zero_at_default_duration_is_fourteen_bits() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_logical_bit(false);
        assert_eq!(bs.duration_us(), 14.0 * BitDuration::DEFAULT.as_micros());
    }

    #[test]
    fn railcom_cutout_spans_the_datasheet_window() {
        let duration = BitDuration::DEFAULT.as_micros();
        let expected_delay_bits = (RAILCOM_CUTOUT_DELAY_US / duration).ceil() as u32;
        let expected_total_bits = (RAILCOM_CUTOUT_TOTAL_US / duration).ceil() as u32;

        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_railcom_cutout();
        let events = bs.events();
        let start = events.iter().position(|e| *e == Event::RailComCutoutStart).unwrap();
        let end = events.iter().position(|e| *e == Event::RailComCutoutEnd).unwrap();
        assert!(start < end);

        let bits_in = |slice: &[Event]| -> u32 {
            slice
                .iter()
                .map(|e| match e {
                    Event::Data { size, .. } => u32::from(*size),
                    _ => 0,
                })
                .sum()
        };
        assert_eq!(bits_in(&events[..start]), expected_delay_bits);
        assert_eq!(bits_in(&events[..end]), expected_total_bits);
    }

    #[test]
    fn operations_mode_packet_duration_matches_hand_counted_bits() {
        let duration = BitDuration::DEFAULT.as_micros();
        let bytes = [0x03_u8, 0x78, 0x7B];
        let preamble = PreambleLength::default();

        let mut physical_bits = u32::from(preamble.bits()) * 8;
        for &byte in &bytes {
            physical_bits += 14; // byte-start bit is always a logical 0
            for bit_index in (0..8).rev() {
                physical_bits += if byte & (1 << bit_index) != 0 { 8 } else { 14 };
            }
        }
        physical_bits += 8; // packet-end bit is a logical 1
        physical_bits += (RAILCOM_CUTOUT_TOTAL_US / duration).ceil() as u32;

        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet(&bytes, preamble, false);
        assert_eq!(bs.duration_us(), f64::from(physical_bits) * duration);
    }
}
