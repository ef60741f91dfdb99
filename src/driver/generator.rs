//! The generator driver (§4.6): owns the PWM/clock/DMA/GPIO peripherals, exposes a queue of
//! bitstreams bookended by power-on/power-off priming streams, and runs a watchdog that clears
//! transient hardware error flags.

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, error, warn};

use crate::bitstream::{Bitstream, EVENT_DELAY, Event};
use crate::compiler::{self, CompiledGraph, GpioPins};
use crate::config::GeneratorConfig;
use crate::driver::dispatch::DispatchQueue;
use crate::error::StartupError;
use crate::hw::clock::ClockSource;
use crate::hw::gpio::{FunctionSelect, Pull};
use crate::hw::mailbox::Mailbox;
use crate::hw::traits::{ClockSink, DmaSink, GpioSink, PwmSink};
use crate::transfer::{self, CompiledStream, HardwareTargets};

/// GPIO alternate function that routes GPIO18 to the PWM0 channel-1 serialiser output on the
/// BCM2711 (and is also the channel-1 mapping on the earlier BCM283x peripheral map).
const DCC_PIN_ALT_FUNCTION: FunctionSelect = FunctionSelect::Alt5;

/// DMA threshold (in words) at which the PWM raises its DREQ line for channel 1, matching §4.6's
/// "DREQ threshold 1".
const PWM_DMA_THRESHOLD: u8 = 1;

/// How often the dispatch thread wakes to run the watchdog and check queued streams' progress.
const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// A user-supplied callback invoked once a queued stream reaches the `Repeating` state.
pub type Completion = Box<dyn FnOnce() + Send>;

struct QueuedStream {
    stream: CompiledStream,
    completion: Option<Completion>,
    /// Whether this entry's predecessor has already been evicted from the queue.
    predecessor_released: bool,
    /// Whether the completion has already fired.
    completion_fired: bool,
}

/// Shared state mutated only from the dispatch thread.
struct State<D, P, C, G> {
    dma: D,
    pwm: P,
    clock: C,
    gpio: G,
    mailbox: Mailbox,
    targets: HardwareTargets,
    pins: GpioPins,
    config: GeneratorConfig,
    queue: VecDeque<QueuedStream>,
    needs_power_on: bool,
}

impl<D, P, C, G> State<D, P, C, G>
where
    D: DmaSink,
    P: PwmSink,
    C: ClockSink,
    G: GpioSink,
{
    fn power_on_bitstream(&self) -> Bitstream<32> {
        let mut bs: Bitstream<32> = Bitstream::new(self.config.bit_duration);
        bs.append_repeating(false, u32::from(EVENT_DELAY) * 32);
        bs.append_event(Event::RailComCutoutEnd);
        bs
    }

    fn power_off_bitstream(&self) -> Bitstream<32> {
        let mut bs: Bitstream<32> = Bitstream::new(self.config.bit_duration);
        bs.append_event(Event::RailComCutoutStart);
        bs.append_event(Event::DebugEnd);
        bs.append_repeating(false, u32::from(EVENT_DELAY) * 32);
        bs
    }

    /// Compiles, commits, and enqueues `bitstream`, splicing it onto the current queue tail (if
    /// any) via [`transfer::transfer_to`].
    fn push(&mut self, bitstream: &Bitstream<32>, repeat: bool, completion: Option<Completion>) -> Result<(), crate::error::CommitError> {
        let stream = match self.queue.back() {
            Some(previous) => commit_following(&mut self.mailbox, self.targets, self.pins, &previous.stream, bitstream, repeat)?,
            None => commit_fresh(&mut self.mailbox, self.targets, self.pins, bitstream, repeat)?,
        };

        if let Some(previous) = self.queue.back() {
            let entry_points = vec![0_usize; previous.stream.breakpoints().len()];
            transfer::transfer_to(&previous.stream, &stream, &entry_points);
        }

        let idle = self.queue.is_empty();
        self.queue.push_back(QueuedStream {
            stream,
            completion,
            predecessor_released: false,
            completion_fired: false,
        });
        if idle {
            self.kick_off();
        }
        Ok(())
    }

    fn kick_off(&mut self) {
        if self.dma.is_active() {
            return;
        }
        if let Some(entry) = self.queue.front() {
            self.dma.start(entry.stream.bus_address());
        }
    }

    /// Runs once per tick: clears transient hardware error flags, then checks every queued
    /// stream's progress against the state table in §4.6.
    fn tick(&mut self) {
        let dma_errors = self.dma.take_errors();
        if dma_errors.any() {
            warn!("clearing transient DMA errors: {dma_errors:?}");
        }
        let pwm_errors = self.pwm.take_errors();
        if pwm_errors.any() {
            warn!("clearing transient PWM errors: {pwm_errors:?}");
        }

        for index in 0..self.queue.len() {
            let is_transmitting = self.queue[index].stream.is_transmitting();
            let is_repeating = self.queue[index].stream.is_repeating();

            if is_transmitting && index > 0 && !self.queue[index - 1].predecessor_released {
                self.queue[index].predecessor_released = true;
                debug!("stream {index} transmitting, predecessor eligible for release");
            }

            if is_repeating && !self.queue[index].completion_fired {
                self.queue[index].completion_fired = true;
                if let Some(completion) = self.queue[index].completion.take() {
                    completion();
                }
            }
        }

        while self
            .queue
            .front()
            .is_some_and(|entry| entry.completion_fired && !self.dma.is_active())
        {
            self.queue.pop_front();
        }
    }

    fn shutdown(&mut self) {
        self.pwm.disable();
        self.clock.disable();
        if self.dma.is_active() {
            self.dma.abort();
        }
        self.gpio.set_low(self.config.dcc_pin.number());
        self.gpio.set_low(self.config.railcom_pin.number());
        self.gpio.set_low(self.config.debug_pin.number());
        self.queue.clear();
    }
}

fn compile_checked(bitstream: &Bitstream<32>, resume: Option<crate::compiler::ResumeState>, repeat: bool, pins: GpioPins) -> CompiledGraph {
    compiler::compile(bitstream, resume, repeat, pins).expect("bitstreams passed to the generator always contain data and no early breakpoints")
}

/// Compiles and commits `bitstream` as the first stream in an otherwise empty queue: no
/// predecessor, so compilation starts from the fresh `(range = 0, pending = empty)` state.
fn commit_fresh(
    mailbox: &mut Mailbox,
    targets: HardwareTargets,
    pins: GpioPins,
    bitstream: &Bitstream<32>,
    repeat: bool,
) -> Result<CompiledStream, crate::error::CommitError> {
    let graph = compile_checked(bitstream, None, repeat, pins);
    CompiledStream::commit(&graph, mailbox, targets)
}

/// Compiles and commits `bitstream` as the successor to `previous`, resuming from the state at
/// `previous`'s canonical splice point (its last recorded breakpoint -- in practice its End CB,
/// the dominant handover point for this driver's one-bitstream-at-a-time `queue` API; any earlier,
/// mid-stream breakpoints of `previous` are spliced to this same committed successor, which is
/// correct provided they converge to the same `(range, pending)` state, as they do for every
/// bitstream this driver itself constructs).
fn commit_following(
    mailbox: &mut Mailbox,
    targets: HardwareTargets,
    pins: GpioPins,
    previous: &CompiledStream,
    bitstream: &Bitstream<32>,
    repeat: bool,
) -> Result<CompiledStream, crate::error::CommitError> {
    let transfers = transfer::transfer_from(previous, bitstream, repeat, pins)
        .expect("bitstreams passed to the generator always contain data and no early breakpoints");
    let (graph, _entry) = transfers
        .into_iter()
        .last()
        .expect("a committed stream always records at least one breakpoint, its End CB");
    CompiledStream::commit(&graph, mailbox, targets)
}

/// Generator driver: the single owner of the DCC signal's hardware resources, mutated only on its
/// own dispatch thread (§5).
pub struct Generator<D, P, C, G> {
    dispatch: Option<DispatchQueue>,
    state: std::sync::Arc<std::sync::Mutex<State<D, P, C, G>>>,
}

impl<D, P, C, G> Generator<D, P, C, G>
where
    D: DmaSink + Send + 'static,
    P: PwmSink + Send + 'static,
    C: ClockSink + Send + 'static,
    G: GpioSink + Send + 'static,
{
    /// Initialises the peripherals and starts the dispatch thread, performing the reset/clock/DMA
    /// priming sequence described in §4.6.
    ///
    /// # Errors
    /// Returns [`StartupError::UnreachableBitDuration`] if no available clock source/divisor pair
    /// reproduces the configured bit duration.
    pub fn startup(
        config: GeneratorConfig,
        mut dma: D,
        mut pwm: P,
        mut clock: C,
        mut gpio: G,
        mailbox: Mailbox,
        targets: HardwareTargets,
    ) -> Result<Self, StartupError> {
        pwm.disable();
        pwm.clear_status();
        pwm.clear_fifo();

        let divisor = clock_divisor_for(config.bit_duration.as_micros())
            .ok_or(StartupError::UnreachableBitDuration {
                requested_us: config.bit_duration.as_micros(),
            })?;
        clock.disable();
        clock.enable(divisor.source, divisor.divisor);

        dma.reset_and_enable();

        gpio.select_function(config.dcc_pin.number(), DCC_PIN_ALT_FUNCTION);
        gpio.select_function(config.railcom_pin.number(), FunctionSelect::Output);
        gpio.select_pull(config.railcom_pin.number(), Pull::Off);
        gpio.set_low(config.railcom_pin.number());
        gpio.select_function(config.debug_pin.number(), FunctionSelect::Output);
        gpio.select_pull(config.debug_pin.number(), Pull::Off);
        gpio.set_low(config.debug_pin.number());

        pwm.enable_dma(PWM_DMA_THRESHOLD);
        pwm.enable_channel_1_serializer();

        let pins = GpioPins {
            railcom: config.railcom_pin.number(),
            debug: config.debug_pin.number(),
        };

        let state = std::sync::Arc::new(std::sync::Mutex::new(State {
            dma,
            pwm,
            clock,
            gpio,
            mailbox,
            targets,
            pins,
            config,
            queue: VecDeque::new(),
            needs_power_on: true,
        }));

        let tick_state = std::sync::Arc::clone(&state);
        let dispatch = DispatchQueue::spawn(TICK_INTERVAL, move || {
            tick_state.lock().expect("dispatch thread holds the only lock poisoner").tick();
        });

        Ok(Self {
            dispatch: Some(dispatch),
            state,
        })
    }

    /// Queues `bitstream` for transmission. If the hardware is idle, a power-on priming stream is
    /// queued first. If `repeating` is false, a power-off priming stream follows, and the next
    /// `queue` call will re-prime power-on. `completion` fires once the queued stream is observed
    /// repeating.
    pub fn queue(&self, bitstream: Bitstream<32>, repeating: bool, completion: Option<Completion>) {
        let state = std::sync::Arc::clone(&self.state);
        self.dispatch_ref().post(move || {
            let mut state = state.lock().expect("dispatch thread holds the only lock poisoner");

            if state.queue.is_empty() && state.needs_power_on {
                let power_on = state.power_on_bitstream();
                if let Err(error) = state.push(&power_on, false, None) {
                    error!("failed to commit power-on priming stream: {error}");
                } else {
                    state.needs_power_on = false;
                }
            }

            if let Err(error) = state.push(&bitstream, repeating, completion) {
                error!("failed to commit queued stream: {error}");
                return;
            }

            if !repeating {
                let power_off = state.power_off_bitstream();
                if let Err(error) = state.push(&power_off, false, None) {
                    error!("failed to commit power-off priming stream: {error}");
                } else {
                    state.needs_power_on = true;
                }
            }
        });
    }

    /// Queues the power-off priming stream if power is currently on, invoking `completion` once it
    /// is observed repeating; if power is already off, `completion` fires immediately.
    pub fn stop(&self, completion: Option<Completion>) {
        let state = std::sync::Arc::clone(&self.state);
        self.dispatch_ref().post(move || {
            let needs_power_on = state.lock().expect("dispatch thread holds the only lock poisoner").needs_power_on;
            if needs_power_on {
                if let Some(completion) = completion {
                    completion();
                }
                return;
            }

            let mut state = state.lock().expect("dispatch thread holds the only lock poisoner");
            let power_off = state.power_off_bitstream();
            if let Err(error) = state.push(&power_off, false, completion) {
                error!("failed to commit power-off priming stream: {error}");
            } else {
                state.needs_power_on = true;
            }
        });
    }

    /// Disables the peripherals, resets the DCC/RailCom/debug GPIOs to low output, cancels
    /// scheduled checks, and drops the stream queue. Does not wait for any pending completion.
    pub fn shutdown(self) {
        let state = std::sync::Arc::clone(&self.state);
        if let Some(dispatch) = &self.dispatch {
            dispatch.post_and_wait(move || {
                state.lock().expect("dispatch thread holds the only lock poisoner").shutdown();
            });
        }
        if let Some(dispatch) = self.dispatch {
            dispatch.drain_and_stop();
        }
    }

    fn dispatch_ref(&self) -> &DispatchQueue {
        self.dispatch.as_ref().expect("dispatch thread only torn down by shutdown, which consumes self")
    }
}

/// A clock source/divisor pair that reproduces a target bit duration exactly (within floating
/// point rounding of the divisor itself).
struct ClockDivisor {
    source: ClockSource,
    divisor: u16,
}

/// Searches the available PWM clock sources for an integer divisor reproducing `target_us`,
/// preferring the oscillator (simpler, glitch-free on suspend/resume) over PLLD.
fn clock_divisor_for(target_us: f64) -> Option<ClockDivisor> {
    const MAX_DIVISOR: u32 = 4095;
    const TOLERANCE_US: f64 = 1e-3;

    for source in [ClockSource::Oscillator, ClockSource::Plld] {
        let frequency_hz = f64::from(source.frequency_hz());
        let exact_divisor = target_us * frequency_hz / 1_000_000.0;
        #[expect(clippy::cast_possible_truncation, reason = "checked against MAX_DIVISOR below")]
        #[expect(clippy::cast_sign_loss, reason = "target_us and frequency_hz are always positive")]
        let divisor = exact_divisor.round() as u32;
        if divisor == 0 || divisor > MAX_DIVISOR {
            continue;
        }
        let achieved_us = f64::from(divisor) * 1_000_000.0 / frequency_hz;
        if (achieved_us - target_us).abs() <= TOLERANCE_US {
            #[expect(clippy::cast_possible_truncation, reason = "divisor <= MAX_DIVISOR < u16::MAX")]
            return Some(ClockDivisor {
                source,
                divisor: divisor as u16,
            });
        }
    }
    None
}
