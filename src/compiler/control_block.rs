//! Logical (pre-commit) control-block shapes. `source`/`destination`/`next` fields hold offsets
//! into the compiled stream's own arrays here; [`crate::transfer::CompiledStream::commit`]
//! rewrites them into absolute bus addresses.

/// Which hardware operation a control block performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbKind {
    /// Writes the `+1` sentinel into word-data index 0, so the driver can detect that the DMA
    /// engine has actually started consuming this stream.
    Start,
    /// Writes the `-1` sentinel into word-data index 0, at a loop-back point, so the driver can
    /// detect that the stream has begun repeating.
    End,
    /// Transfers `word_count` consecutive 32-bit words starting at `data_offset` in the word-data
    /// array to the PWM FIFO.
    Data { data_offset: usize, word_count: usize },
    /// Writes `range` to the PWM channel-1 range register.
    Range { range: u32 },
    /// A 2x2-word transfer writing the GPIO set-register pair then the clear-register pair,
    /// asserting every pin set in `set_mask` and deasserting every pin set in `clear_mask`. Masks
    /// rather than single pins, since more than one GPIO transition (e.g. RailCom cutout end and
    /// debug bracket end) can become due on the same output word.
    Gpio { set_mask: u32, clear_mask: u32 },
}

/// One node in the pre-commit control-block graph.
#[derive(Debug, Clone, Copy)]
pub struct LogicalControlBlock {
    pub kind: CbKind,
    /// Index of the next control block in this stream's own array, or `None` for "unlinked" (the
    /// DMA stop sentinel once committed, unless later spliced to a successor).
    pub next: Option<usize>,
}

impl LogicalControlBlock {
    #[must_use]
    pub const fn new(kind: CbKind) -> Self {
        Self { kind, next: None }
    }
}
