//! Commits a [`CompiledGraph`] into DMA-visible memory with finalised bus addresses, and splices
//! successive compiled streams together at their breakpoints.

use crate::bitstream::Bitstream;
use crate::compiler::{self, Breakpoint, CbKind, CompiledGraph, GpioPins, LogicalControlBlock, ResumeState};
use crate::error::{CommitError, CompileError};
use crate::hw::dma::{self, ControlBlock, TransferInfo};
use crate::hw::mailbox::Mailbox;
use crate::hw::mem::UncachedRegion;

/// Bus addresses of the hardware registers the compiled graph's control blocks target. Computed
/// once at driver startup from the mapped peripherals' physical base addresses.
#[derive(Debug, Clone, Copy)]
pub struct HardwareTargets {
    pub pwm_fifo: u32,
    pub pwm_range: u32,
    pub gpio_set: u32,
    pub gpio_clear: u32,
}

/// Byte offset, from a row's destination address, that BCM2711's `GPCLR0` sits at relative to
/// `GPSET0` -- used to derive the 2D-transfer stride for the combined set/clear GPIO control
/// block.
const GPIO_CLEAR_FROM_SET_OFFSET: i16 = 0x28 - 0x1C;

/// Sentinel value the Start CB writes to mark "transmission has begun".
const TRANSMITTING_SENTINEL: u32 = 1;
/// Sentinel value the End CB writes to mark "the stream has wrapped and is repeating".
const REPEATING_SENTINEL: u32 = u32::MAX; // -1 as i32

/// A compiled stream committed into DMA-visible memory, ready to be chained onto the DMA engine
/// or spliced to/from a neighbour.
pub struct CompiledStream {
    region: UncachedRegion,
    /// Bus address of every control block, indexed by its position in the logical graph --
    /// needed to rewrite `next` fields during splicing.
    cb_bus_addresses: Vec<u32>,
    breakpoints: Vec<Breakpoint>,
}

impl CompiledStream {
    /// Materialises `graph` into a freshly allocated uncached region, rewriting every offset
    /// field into an absolute bus address.
    ///
    /// # Errors
    /// Returns [`CommitError`] if the uncached memory allocator fails.
    pub fn commit(graph: &CompiledGraph, mailbox: &mut Mailbox, targets: HardwareTargets) -> Result<Self, CommitError> {
        let mut scratch = Vec::new();
        let mut scratch_offsets = vec![None; graph.control_blocks.len()];
        for (index, cb) in graph.control_blocks.iter().enumerate() {
            scratch_offsets[index] = match cb.kind {
                CbKind::Start => Some(push_scratch(&mut scratch, &[TRANSMITTING_SENTINEL])),
                CbKind::End => Some(push_scratch(&mut scratch, &[REPEATING_SENTINEL])),
                CbKind::Range { range } => Some(push_scratch(&mut scratch, &[range])),
                CbKind::Gpio { set_mask, clear_mask } => Some(push_scratch(&mut scratch, &[set_mask, clear_mask])),
                CbKind::Data { .. } => None,
            };
        }

        let cb_bytes = graph.control_blocks.len() * std::mem::size_of::<ControlBlock>();
        let data_bytes = graph.data.len() * 4;
        let scratch_bytes = scratch.len() * 4;

        let region = UncachedRegion::allocate(mailbox, cb_bytes + data_bytes + scratch_bytes, 32)
            .map_err(CommitError::Allocation)?;
        let base = region.bus_address();
        let data_base = base + u32::try_from(cb_bytes).expect("stream fits in 32-bit bus space");
        let scratch_base = data_base + u32::try_from(data_bytes).expect("stream fits in 32-bit bus space");

        // SAFETY: `region` was just allocated with exactly `cb_bytes + data_bytes + scratch_bytes`
        // bytes, and these writes stay within that span.
        unsafe {
            let data_ptr = region.as_ptr().as_ptr().add(cb_bytes).cast::<u32>();
            for (index, word) in graph.data.iter().enumerate() {
                data_ptr.add(index).write_volatile(*word);
            }
            let scratch_ptr = region.as_ptr().as_ptr().add(cb_bytes + data_bytes).cast::<u32>();
            for (index, word) in scratch.iter().enumerate() {
                scratch_ptr.add(index).write_volatile(*word);
            }
        }

        let cb_bus_addresses: Vec<u32> = (0..graph.control_blocks.len())
            .map(|index| base + u32::try_from(index * 32).expect("stream fits in 32-bit bus space"))
            .collect();

        let hardware_cbs: Vec<ControlBlock> = graph
            .control_blocks
            .iter()
            .enumerate()
            .map(|(index, cb)| {
                let next = cb.next.map_or(0, |target| cb_bus_addresses[target]);
                build_hardware_cb(cb, index, &scratch_offsets, data_base, scratch_base, next, &targets)
            })
            .collect();

        // SAFETY: the region is 32-byte aligned and sized for exactly `hardware_cbs.len()` control
        // blocks at its start.
        unsafe {
            let cb_ptr = region.as_ptr().as_ptr().cast::<ControlBlock>();
            for (index, cb) in hardware_cbs.iter().enumerate() {
                cb_ptr.add(index).write(*cb);
            }
        }

        Ok(Self {
            region,
            cb_bus_addresses,
            breakpoints: graph.breakpoints.clone(),
        })
    }

    /// The bus address of this stream's first control block, to be loaded into the DMA engine's
    /// `CONBLK_AD` register to start (or splice into) this stream.
    #[must_use]
    pub fn bus_address(&self) -> std::num::NonZeroU64 {
        std::num::NonZeroU64::new(u64::from(self.cb_bus_addresses[0])).expect("bus addresses are never zero")
    }

    fn sentinel_cell(&self) -> i32 {
        // SAFETY: index 0 of the data region is always the live sentinel cell, written at
        // `commit` time and only ever overwritten afterwards by the Start/End control blocks.
        let data_base = self.cb_bus_addresses.len() * std::mem::size_of::<ControlBlock>();
        unsafe { region_word(&self.region, data_base) as i32 }
    }

    /// Whether the Start CB has fired: the DMA engine has begun consuming this stream.
    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        self.sentinel_cell() > 0
    }

    /// Whether the End CB has fired: the stream has wrapped around and is now repeating.
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        self.sentinel_cell() < 0
    }

    /// The breakpoints recorded while compiling this stream.
    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Rewrites the in-memory `next` field of the control block at `breakpoint.control_block_index`
    /// to point at `target_bus_address` instead of looping within this stream.
    fn redirect(&self, breakpoint: &Breakpoint, target_bus_address: u32) {
        let cb_index = breakpoint.control_block_index;
        // SAFETY: `cb_index` was recorded by the same compile pass that produced this stream's
        // control-block count, so it indexes a real, committed control block.
        unsafe {
            let next_field = self
                .region
                .as_ptr()
                .as_ptr()
                .add(cb_index * std::mem::size_of::<ControlBlock>())
                .add(std::mem::offset_of!(ControlBlock, next_block_addr))
                .cast::<u32>();
            next_field.write_volatile(target_bus_address);
        }
    }
}

unsafe fn region_word(region: &UncachedRegion, byte_offset: usize) -> u32 {
    region.as_ptr().as_ptr().add(byte_offset).cast::<u32>().read_volatile()
}

fn push_scratch(scratch: &mut Vec<u32>, words: &[u32]) -> usize {
    let offset = scratch.len();
    scratch.extend_from_slice(words);
    offset
}

fn build_hardware_cb(
    cb: &LogicalControlBlock,
    index: usize,
    scratch_offsets: &[Option<usize>],
    data_base: u32,
    scratch_base: u32,
    next: u32,
    targets: &HardwareTargets,
) -> ControlBlock {
    let scratch_addr = |slot: usize| scratch_base + u32::try_from(slot * 4).expect("scratch fits in 32-bit bus space");

    match cb.kind {
        CbKind::Start | CbKind::End => {
            let src = scratch_addr(scratch_offsets[index].expect("Start/End always reserve scratch"));
            ControlBlock::new(
                TransferInfo::new().with_wait_resp(true),
                src,
                data_base,
                4,
                0,
                next,
            )
        }
        CbKind::Data { data_offset, word_count } => {
            let src = data_base + u32::try_from(data_offset * 4).expect("data fits in 32-bit bus space");
            let len = u32::try_from(word_count * 4).expect("data fits in 32-bit bus space");
            let info = TransferInfo::new()
                .with_src_inc(true)
                .with_dest_dreq(true)
                .with_permap(dma::Peripheral::Pwm as u8)
                .with_no_wide_bursts(true);
            ControlBlock::new(info, src, targets.pwm_fifo, len, 0, next)
        }
        CbKind::Range { .. } => {
            let src = scratch_addr(scratch_offsets[index].expect("Range always reserves scratch"));
            ControlBlock::new(TransferInfo::new().with_wait_resp(true), src, targets.pwm_range, 4, 0, next)
        }
        CbKind::Gpio { .. } => {
            let src = scratch_addr(scratch_offsets[index].expect("Gpio always reserves scratch"));
            let info = TransferInfo::new()
                .with_src_inc(true)
                .with_dest_inc(true)
                .with_tdmode(true)
                .with_wait_resp(true);
            let len = dma::pack_2d_transfer_len(4, 2);
            let stride = dma::pack_2d_stride(0, GPIO_CLEAR_FROM_SET_OFFSET - 4);
            ControlBlock::new(info, src, targets.gpio_set, len, stride, next)
        }
    }
}

/// For each breakpoint in `previous`, compiles `bitstream` fresh, resuming from that breakpoint's
/// `(range, pending)` state, and returns the resulting control-block index the successor would
/// enter at -- one per breakpoint of `previous`, in the same order.
///
/// # Errors
/// Propagates [`CompileError`] from any of the per-breakpoint compiles.
pub fn transfer_from<const W: u32>(
    previous: &CompiledStream,
    bitstream: &Bitstream<W>,
    repeat: bool,
    pins: GpioPins,
) -> Result<Vec<(CompiledGraph, usize)>, CompileError> {
    previous
        .breakpoints
        .iter()
        .map(|breakpoint| {
            let resume = ResumeState {
                range: breakpoint.range,
                pending: breakpoint.pending.clone(),
            };
            let graph = compiler::compile(bitstream, Some(resume), repeat, pins)?;
            Ok((graph, 0))
        })
        .collect()
}

/// Rewrites `self`'s committed control blocks so that, at each of its breakpoints, the DMA engine
/// jumps into `next` at the paired entry point instead of looping within `self`.
///
/// Breakpoints corresponding to an `End` CB are rewritten immediately (so a fully-looped stream
/// hands off at the top of its next repeat). Any other breakpoint is only rewritten once
/// `self.is_repeating()` is observed true, guaranteeing at least one full transmission of `self`
/// before the handover takes effect.
pub fn transfer_to(previous: &CompiledStream, next: &CompiledStream, entry_points: &[usize]) {
    for (breakpoint, &entry_cb) in previous.breakpoints.iter().zip(entry_points) {
        let target = next.cb_bus_addresses[entry_cb];
        previous.redirect(breakpoint, target);
    }
}
