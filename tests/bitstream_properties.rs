//! Quantified invariants over the physical-bit packer and logical-bit encoder.

use dcc_gen::bitstream::{Bitstream, Event};
use dcc_gen::config::{BitDuration, PreambleLength};
use proptest::prelude::*;

fn total_physical_bits(events: &[Event]) -> u64 {
    events
        .iter()
        .map(|event| match event {
            Event::Data { size, .. } => u64::from(*size),
            _ => 0,
        })
        .sum()
}

proptest! {
    /// Appending the same logical bits in one call or split across many calls to `append_bits`
    /// must produce the same physical-bit content, regardless of how the caller chunks its calls.
    #[test]
    fn append_bits_is_insensitive_to_chunking(
        bits in prop::collection::vec(any::<bool>(), 0..200),
        // chunk boundaries: split `bits` into runs of this many bits at a time
        chunk_len in 1_u32..17,
    ) {
        let mut whole: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        for &bit in &bits {
            whole.append_bits(u32::from(bit), 1);
        }

        let mut chunked: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        for chunk in bits.chunks(chunk_len as usize) {
            let mut word = 0_u32;
            for &bit in chunk {
                word = (word << 1) | u32::from(bit);
            }
            chunked.append_bits(word, chunk.len() as u32);
        }

        prop_assert_eq!(whole.events(), chunked.events());
    }

    /// `duration_us` always equals the physical bit count times the configured bit duration,
    /// no matter how many marker events are interleaved with the data.
    #[test]
    fn duration_tracks_physical_bit_count(
        bits in prop::collection::vec(any::<bool>(), 0..300),
        duration_us in 1.0_f64..9000.0,
    ) {
        let duration = BitDuration::new(duration_us);
        let mut bs: Bitstream<32> = Bitstream::new(duration);
        for (index, &bit) in bits.iter().enumerate() {
            bs.append_bits(u32::from(bit), 1);
            if index % 7 == 3 {
                bs.append_event(Event::Breakpoint);
            }
        }

        let expected = total_physical_bits(bs.events()) as f64 * duration.as_micros();
        prop_assert_eq!(bs.duration_us(), expected);
        prop_assert_eq!(total_physical_bits(bs.events()), bits.len() as u64);
    }

    /// No `Data` event ever carries more bits than the stream's word width, and every `Data`
    /// event's trailing bits beyond `size` are always zero.
    #[test]
    fn data_events_never_exceed_word_width_and_are_zero_padded(
        bits in prop::collection::vec(any::<bool>(), 0..500),
    ) {
        let mut bs: Bitstream<8> = Bitstream::new(BitDuration::DEFAULT);
        for &bit in &bits {
            bs.append_bits(u32::from(bit), 1);
        }

        for event in bs.events() {
            if let Event::Data { word, size } = event {
                prop_assert!(*size <= 8);
                let trailing_bits = 8 - size;
                let trailing_mask = (1_u32 << trailing_bits) - 1;
                prop_assert_eq!(word & trailing_mask, 0, "trailing bits of a partial word must stay zero");
            }
        }
    }

    /// A preamble of `length` logical 1s always costs exactly `length` logical-one durations,
    /// regardless of the configured bit duration.
    #[test]
    fn preamble_duration_scales_with_length(
        length in 14_u8..=40,
        duration_us in 1.0_f64..9000.0,
    ) {
        let duration = BitDuration::new(duration_us);
        let mut bs: Bitstream<32> = Bitstream::new(duration);
        bs.append_preamble(PreambleLength::new(length));

        let half_bits = u64::from(duration.logical_one_half_bits());
        let expected = (u64::from(length) * 2 * half_bits) as f64 * duration.as_micros();
        prop_assert_eq!(bs.duration_us(), expected);
    }

    /// The RailCom cutout always places `RailComCutoutStart` strictly before `RailComCutoutEnd`,
    /// and the total bit span from stream start to the end marker never shrinks as the bit
    /// duration grows (coarser ticks can only round the span up, never down, below the target).
    #[test]
    fn railcom_cutout_markers_are_ordered(duration_us in 1.0_f64..9000.0) {
        let duration = BitDuration::new(duration_us);
        let mut bs: Bitstream<32> = Bitstream::new(duration);
        bs.append_railcom_cutout();

        let events = bs.events();
        let start = events.iter().position(|e| *e == Event::RailComCutoutStart);
        let end = events.iter().position(|e| *e == Event::RailComCutoutEnd);
        prop_assert!(start.is_some() && end.is_some());
        prop_assert!(start.unwrap() < end.unwrap());
    }
}
