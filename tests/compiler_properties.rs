//! Quantified invariants over the DMA control-block compiler's output graph.

use dcc_gen::bitstream::Bitstream;
use dcc_gen::compiler::{compile, CbKind, GpioPins};
use dcc_gen::config::{BitDuration, PreambleLength};
use proptest::prelude::*;

const PINS: GpioPins = GpioPins { railcom: 17, debug: 27 };

fn packet_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..6)
}

proptest! {
    /// Every `next` link in a compiled graph targets an in-bounds control block, and every `Data`
    /// control block's `data_offset..data_offset + word_count` span is in-bounds in the word-data
    /// array -- the compiler must never emit a dangling reference, repeating or not.
    #[test]
    fn control_block_links_and_data_spans_stay_in_bounds(
        bytes in packet_bytes(),
        repeat in any::<bool>(),
        debug in any::<bool>(),
    ) {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet(&bytes, PreambleLength::default(), debug);
        let graph = compile(&bs, None, repeat, PINS).unwrap();

        let cb_count = graph.control_blocks.len();
        for cb in &graph.control_blocks {
            if let Some(next) = cb.next {
                prop_assert!(next < cb_count, "next index {next} out of bounds ({cb_count} control blocks)");
            }
            if let CbKind::Data { data_offset, word_count } = cb.kind {
                prop_assert!(data_offset + word_count <= graph.data.len());
            }
        }
    }

    /// The compiler always emits a `Start` control block first and records at least one
    /// breakpoint (its final `End` control block, if no earlier `Breakpoint` event fired).
    #[test]
    fn graph_always_opens_with_start_and_records_a_breakpoint(
        bytes in packet_bytes(),
        repeat in any::<bool>(),
    ) {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet(&bytes, PreambleLength::default(), false);
        let graph = compile(&bs, None, repeat, PINS).unwrap();

        prop_assert!(matches!(graph.control_blocks[0].kind, CbKind::Start));
        prop_assert!(!graph.breakpoints.is_empty());
    }

    /// A non-repeating compile always terminates the graph at an `End` control block with no
    /// outgoing link; a repeating compile always closes a back-edge somewhere in the graph.
    #[test]
    fn repeat_flag_controls_loop_closure(bytes in packet_bytes()) {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet(&bytes, PreambleLength::default(), false);

        let one_shot = compile(&bs, None, false, PINS).unwrap();
        let has_end = one_shot.control_blocks.iter().any(|cb| matches!(cb.kind, CbKind::End));
        prop_assert!(has_end, "a one-shot stream must contain an End control block");

        let repeating = compile(&bs, None, true, PINS).unwrap();
        let has_back_edge = repeating
            .control_blocks
            .iter()
            .enumerate()
            .any(|(idx, cb)| cb.next.is_some_and(|next| next <= idx));
        prop_assert!(has_back_edge, "a repeating stream must close a loop");
    }

    /// Resuming compilation from an arbitrary non-zero range never produces a leading `Range`
    /// control block when the first data word's size already matches that range -- the compiler
    /// only emits a `Range` change when the PWM range register would actually need to change.
    #[test]
    fn resume_with_matching_range_skips_redundant_range_cb(bytes in packet_bytes()) {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet(&bytes, PreambleLength::default(), false);

        let fresh = compile(&bs, None, false, PINS).unwrap();
        // The stream's steady-state range is whatever the first Range CB (if any) sets, or the
        // native word width (32) if it never needed one.
        let steady_range = fresh
            .control_blocks
            .iter()
            .find_map(|cb| match cb.kind {
                CbKind::Range { range } => Some(range),
                _ => None,
            })
            .unwrap_or(32);

        let resume = dcc_gen::compiler::ResumeState { range: steady_range, pending: Default::default() };
        let resumed = compile(&bs, Some(resume), false, PINS).unwrap();

        // The first control block after Start in a resumed graph that touches data must not be a
        // Range CB re-asserting the same range it was already resumed at.
        if let Some(CbKind::Range { range }) = resumed.control_blocks.get(1).map(|cb| cb.kind) {
            prop_assert_ne!(range, steady_range);
        }
    }
}
