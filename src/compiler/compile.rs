//! DMA control-block compiler: walks a [`Bitstream`]'s events once (twice if it must unroll one
//! loop iteration to reach a stable repeating state) and produces a graph of [`LogicalControlBlock`]s.

use crate::bitstream::{Bitstream, Event};
use crate::compiler::control_block::{CbKind, LogicalControlBlock};
use crate::compiler::state::{Breakpoint, PendingEvent, PendingQueue, StateKey, StateTable};
use crate::error::CompileError;

/// GPIO pins the compiler schedules transitions for; the DCC pin itself never appears here, since
/// it is driven entirely by the PWM serialiser, not by GPIO set/clear control blocks.
#[derive(Debug, Clone, Copy)]
pub struct GpioPins {
    pub railcom: u8,
    pub debug: u8,
}

/// The state to resume compilation from, used when splicing a successor onto a running stream's
/// breakpoint instead of starting fresh at `(index 0, range 0, empty queue)`.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    pub range: u32,
    pub pending: PendingQueue,
}

/// The compiler's output: a control-block graph plus the word-data array (beginning with the
/// sentinel cell at index 0) and the breakpoints recorded along the way.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub control_blocks: Vec<LogicalControlBlock>,
    pub data: Vec<u32>,
    pub breakpoints: Vec<Breakpoint>,
}

/// Bails out of the unrolling loop after this many passes even if no repeating state was found,
/// rather than compiling forever on a pathological input. Real operations-mode streams close
/// within two passes (see the worked example in the module docs below).
const MAX_PASSES: u32 = 16;

struct Builder {
    control_blocks: Vec<LogicalControlBlock>,
    data: Vec<u32>,
}

impl Builder {
    fn new() -> Self {
        Self {
            // A Start CB is always the head of the graph.
            control_blocks: vec![LogicalControlBlock::new(CbKind::Start)],
            // Index 0 is the sentinel cell the Start/End CBs overwrite.
            data: vec![0],
        }
    }

    fn push_word(&mut self, word: u32) -> usize {
        let idx = self.data.len();
        self.data.push(word);
        idx
    }

    fn push_cb(&mut self, kind: CbKind, last_cb: &mut usize) -> usize {
        let idx = self.control_blocks.len();
        self.control_blocks.push(LogicalControlBlock::new(kind));
        self.control_blocks[*last_cb].next = Some(idx);
        *last_cb = idx;
        idx
    }
}

/// Compiles `bitstream` into a [`CompiledGraph`].
///
/// `resume` seeds the initial `(range, pending)` state instead of the fresh-stream default of
/// `(0, empty)`, as used by [`crate::transfer::transfer_from`] when entering at a predecessor's
/// breakpoint. `repeat` controls whether the compiler re-enters the loop body after the first End
/// CB to search for a closing state, or stops there (used for the one-shot power-on/power-off
/// priming streams).
///
/// # Errors
/// Returns [`CompileError::ContainsNoData`] if `bitstream` has no `Data` event, or
/// [`CompileError::BreakpointAtStart`] if a `Breakpoint` event precedes the first `Data` event.
pub fn compile<const W: u32>(
    bitstream: &Bitstream<W>,
    resume: Option<ResumeState>,
    repeat: bool,
    pins: GpioPins,
) -> Result<CompiledGraph, CompileError> {
    let resume = resume.unwrap_or_default();
    let mut builder = Builder::new();
    let mut last_cb = 0_usize; // the Start CB
    let mut open_cb: Option<usize> = None;
    let mut range = resume.range;
    let mut pending = resume.pending;
    let mut state_table = StateTable::new();
    let mut breakpoints = Vec::new();
    let mut any_data = false;

    let events = bitstream.events();
    let body_start = events.iter().position(|event| matches!(event, Event::LoopStart)).map_or(0, |pos| pos + 1);

    let mut pass = 0_u32;
    'passes: loop {
        let scan_start = if pass == 0 { 0 } else { body_start };

        for (index, event) in events.iter().enumerate().skip(scan_start) {
            let in_body = index >= body_start;

            match *event {
                Event::Data { word, size } => {
                    any_data = true;
                    let logical_index = index - body_start.min(index);
                    let candidate_key = in_body.then(|| StateKey {
                        index: logical_index,
                        range,
                        pending: pending.clone(),
                    });

                    if let Some(key) = &candidate_key {
                        if let Some(target) = state_table.find(key) {
                            close_open_cb(&mut open_cb);
                            builder.control_blocks[last_cb].next = Some(target);
                            break 'passes;
                        }
                    }

                    let effective_range = if range == 0 { W } else { range };
                    if effective_range != u32::from(size) {
                        close_open_cb(&mut open_cb);
                        builder.push_cb(CbKind::Range { range: u32::from(size) }, &mut last_cb);
                        range = u32::from(size);
                    } else if range == 0 {
                        range = u32::from(size);
                    }

                    let cb_index = match open_cb {
                        Some(cb) => {
                            builder.push_word(word);
                            let CbKind::Data { word_count, .. } = &mut builder.control_blocks[cb].kind else {
                                unreachable!("open_cb always indexes a Data control block")
                            };
                            *word_count += 1;
                            cb
                        }
                        None => {
                            let data_offset = builder.push_word(word);
                            let cb = builder.push_cb(
                                CbKind::Data {
                                    data_offset,
                                    word_count: 1,
                                },
                                &mut last_cb,
                            );
                            open_cb = Some(cb);
                            cb
                        }
                    };

                    if let Some(key) = candidate_key {
                        state_table.insert(&key, cb_index);
                    }

                    let due = pending.tick();
                    if !due.is_empty() {
                        close_open_cb(&mut open_cb);
                        let (set_mask, clear_mask) = resolve_gpio(&due, pins);
                        builder.push_cb(CbKind::Gpio { set_mask, clear_mask }, &mut last_cb);
                    }
                }
                Event::LoopStart => {}
                Event::Breakpoint => {
                    if last_cb == 0 {
                        return Err(CompileError::BreakpointAtStart);
                    }
                    close_open_cb(&mut open_cb);
                    breakpoints.push(Breakpoint {
                        control_block_index: last_cb,
                        range,
                        pending: pending.clone(),
                    });
                }
                Event::RailComCutoutStart => pending.push(PendingEvent::RailComCutoutStart),
                Event::RailComCutoutEnd => pending.push(PendingEvent::RailComCutoutEnd),
                Event::DebugStart => pending.push(PendingEvent::DebugStart),
                Event::DebugEnd => pending.push(PendingEvent::DebugEnd),
            }
        }

        if !any_data {
            return Err(CompileError::ContainsNoData);
        }

        close_open_cb(&mut open_cb);
        let end_cb = builder.push_cb(CbKind::End, &mut last_cb);
        breakpoints.push(Breakpoint {
            control_block_index: end_cb,
            range,
            pending: pending.clone(),
        });

        if !repeat || pass >= MAX_PASSES {
            break 'passes;
        }
        pass += 1;
    }

    Ok(CompiledGraph {
        control_blocks: builder.control_blocks,
        data: builder.data,
        breakpoints,
    })
}

fn close_open_cb(open_cb: &mut Option<usize>) {
    *open_cb = None;
}

/// Folds every GPIO-affecting event due on the same output word into a pair of pin bitmasks,
/// since more than one transition (e.g. a RailCom cutout end coinciding with a debug bracket end)
/// can be due at once and each must still take effect.
fn resolve_gpio(due: &[PendingEvent], pins: GpioPins) -> (u32, u32) {
    let mut set_mask = 0_u32;
    let mut clear_mask = 0_u32;
    for event in due {
        match event {
            PendingEvent::RailComCutoutStart => set_mask |= 1 << pins.railcom,
            PendingEvent::RailComCutoutEnd => clear_mask |= 1 << pins.railcom,
            PendingEvent::DebugStart => set_mask |= 1 << pins.debug,
            PendingEvent::DebugEnd => clear_mask |= 1 << pins.debug,
        }
    }
    (set_mask, clear_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitDuration;

    const PINS: GpioPins = GpioPins { railcom: 17, debug: 27 };

    #[test]
    fn empty_bitstream_fails_with_contains_no_data() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_bits(0b1, 0);
        assert_eq!(compile(&bs, None, false, PINS).unwrap_err(), CompileError::ContainsNoData);
    }

    #[test]
    fn breakpoint_before_any_data_fails() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_event(Event::Breakpoint);
        bs.append_bits(0b1, 1);
        assert_eq!(compile(&bs, None, false, PINS).unwrap_err(), CompileError::BreakpointAtStart);
    }

    #[test]
    fn single_full_word_needs_no_range_cb() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_repeating(true, 32);
        let graph = compile(&bs, None, false, PINS).unwrap();
        assert!(!graph.control_blocks.iter().any(|cb| matches!(cb.kind, CbKind::Range { .. })));
    }

    #[test]
    fn short_final_word_gets_a_range_cb() {
        let mut bs: Bitstream<3> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_bits(0b101, 3);
        let graph = compile(&bs, None, false, PINS).unwrap();
        assert!(graph.control_blocks.iter().any(|cb| matches!(cb.kind, CbKind::Range { range: 3 })));
    }

    #[test]
    fn consecutive_equal_size_words_coalesce_into_one_data_cb() {
        let mut bs: Bitstream<8> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_repeating(true, 24);
        let graph = compile(&bs, None, false, PINS).unwrap();
        let data_cbs: Vec<_> = graph
            .control_blocks
            .iter()
            .filter(|cb| matches!(cb.kind, CbKind::Data { .. }))
            .collect();
        assert_eq!(data_cbs.len(), 1);
        assert!(matches!(data_cbs[0].kind, CbKind::Data { word_count: 3, .. }));
    }

    #[test]
    fn railcom_cutout_produces_two_gpio_control_blocks() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_operations_mode_packet_for_test();
        let graph = compile(&bs, None, false, PINS).unwrap();
        let gpio_cbs: Vec<_> = graph
            .control_blocks
            .iter()
            .filter(|cb| matches!(cb.kind, CbKind::Gpio { .. }))
            .collect();
        assert_eq!(gpio_cbs.len(), 2);
    }

    #[test]
    fn simultaneously_due_gpio_events_both_take_effect() {
        // RailComCutoutEnd and DebugEnd pushed back-to-back, with no Data event between them, so
        // both are due on the very same output word once their shared countdown elapses.
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_bits(0b1, 1);
        bs.append_event(Event::RailComCutoutEnd);
        bs.append_event(Event::DebugEnd);
        bs.append_bits(0b1, 1);
        bs.append_bits(0b1, 1);

        let graph = compile(&bs, None, false, PINS).unwrap();
        let gpio_cb = graph
            .control_blocks
            .iter()
            .find_map(|cb| match cb.kind {
                CbKind::Gpio { set_mask, clear_mask } => Some((set_mask, clear_mask)),
                _ => None,
            })
            .expect("a Gpio control block must be emitted once both events are due");

        let expected_clear_mask = (1_u32 << PINS.railcom) | (1_u32 << PINS.debug);
        assert_eq!(gpio_cb, (0, expected_clear_mask), "both pins due on the same word must both be cleared");
    }

    #[test]
    fn repeating_stream_closes_into_a_loop() {
        let mut bs: Bitstream<32> = Bitstream::new(BitDuration::DEFAULT);
        bs.append_repeating(true, 64);
        let graph = compile(&bs, None, true, PINS).unwrap();
        let has_back_edge = graph.control_blocks.iter().enumerate().any(|(idx, cb)| cb.next.is_some_and(|next| next < idx));
        assert!(has_back_edge, "a repeating stream must close a loop back to an earlier control block");
    }

    trait TestBitstreamExt {
        fn append_operations_mode_packet_for_test(&mut self);
    }

    impl TestBitstreamExt for Bitstream<32> {
        fn append_operations_mode_packet_for_test(&mut self) {
            use crate::config::PreambleLength;
            self.append_operations_mode_packet(&[0x03, 0x78, 0x7B], PreambleLength::default(), false);
        }
    }
}
