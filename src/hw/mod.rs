//! Register-level drivers for the Raspberry Pi peripherals the generator drives directly: the PWM
//! clock generator, the PWM serialiser, a DMA Lite channel, GPIO, and the VideoCore mailbox used
//! to obtain DMA-visible memory and query clock rates.
//!
//! Every module here mirrors the sibling bootloader's register-definition style
//! (`register_bitfields!`/`register_structs!` plus a safe wrapper constructed via `map`), adapted
//! from bare-metal physical-pointer access to `mmap`ed `/dev/mem` access via [`mmio::MmioRegion`].

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod mailbox;
pub mod mem;
pub mod mmio;
pub mod pwm;
pub mod traits;

/// Start of the BCM2711 peripheral block in ARM physical address space.
const ARM_PERIPHERAL_PHYS_BASE: u64 = 0xFE00_0000;
/// The corresponding start of the DMA engine's "peripheral" bus address alias. The DMA engine
/// cannot address ARM physical memory directly for peripheral registers; it must use this alias
/// range instead.
const ARM_PERIPHERAL_BUS_BASE: u32 = 0x7E00_0000;

/// Converts a BCM2711 peripheral's ARM physical address into the bus address a DMA control
/// block's `dest`/`src` field must use to reach it.
///
/// # Panics
/// Panics if `phys_addr` is not within the BCM2711 peripheral block.
#[must_use]
pub fn peripheral_bus_address(phys_addr: u64) -> u32 {
    let offset = phys_addr
        .checked_sub(ARM_PERIPHERAL_PHYS_BASE)
        .expect("address is not within the peripheral block");
    #[expect(clippy::cast_possible_truncation, reason = "offsets within one peripheral's registers fit in u32")]
    {
        ARM_PERIPHERAL_BUS_BASE + offset as u32
    }
}

/// Physical base addresses of the peripherals this crate drives, on the BCM2711 (Raspberry Pi 4)
/// peripheral map. Earlier SoCs (BCM2835/6/7) place the same peripherals at `0x2000_0000` instead
/// of `0xFE00_0000`; callers targeting those boards should construct the drivers directly with
/// their own base addresses rather than through this table.
pub mod bcm2711 {
    /// Base of the GPIO controller's register window.
    pub const GPIO_BASE: u64 = 0xFE20_0000;
    /// Base of the PWM clock generator's register window (within the clock manager block).
    pub const CLOCK_PWM_BASE: u64 = 0xFE10_10A0;
    /// Base of the PWM peripheral's register window.
    pub const PWM_BASE: u64 = 0xFE20_C000;
    /// Base of DMA channel 5's register window (DMA Lite channels are 5-6, 8-14 on BCM2711; 5 is
    /// chosen because it survives a system suspend/resume cycle with its state discarded and
    /// unclaimed by the GPU firmware in the common case).
    pub const DMA5_BASE: u64 = 0xFE00_0500;
    /// Base of the VideoCore mailbox's register window.
    pub const MAILBOX_BASE: u64 = 0xFE00_B880;
}
