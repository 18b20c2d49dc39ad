//! Application-facing GPIO handle.
//!
//! [`Gpio`] owns the engine, the handler registry and the dispatcher, and
//! exposes the operations application code calls: installing edge handlers,
//! pulse-and-wait ranging and the thin pin wrappers. Pins are taken as raw
//! numbers and validated here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::dispatch::{DispatchCounts, EdgeDispatcher, ExecutionContext, TracingContext};
use crate::engine::{EdgeCallback, GpioEngine};
use crate::error::{GpioError, Result};
use crate::pin::{Level, MAX_PINS, Pin, PinMode, Pull};
use crate::queue::EdgeQueue;
use crate::ranging::{self, FallingEdgePolicy, RangingRequest, RangingResult};
use crate::registry::{EdgeHandler, PinEdgeRegistry};
use crate::settings::{DispatchMode, GpioSettings};
use crate::tick::Tick;

/// Handle to an initialized GPIO engine.
pub struct Gpio {
    engine: Arc<dyn GpioEngine>,
    registry: Arc<PinEdgeRegistry>,
    dispatcher: Arc<EdgeDispatcher>,
    queue: Option<Arc<EdgeQueue>>,
    trampoline: EdgeCallback,
    armed: Box<[AtomicBool]>,
    falling: FallingEdgePolicy,
    debug: AtomicBool,
    terminated: AtomicBool,
}

impl Gpio {
    /// Initialize `engine` and build a handle around it.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::NativeInit` if the engine fails to come up, which
    /// is fatal for the whole system.
    pub fn new(engine: Arc<dyn GpioEngine>, settings: &GpioSettings) -> Result<Self> {
        Self::with_context(engine, settings, Arc::new(TracingContext))
    }

    /// Like [`Gpio::new`] with a caller supplied execution context for
    /// handler invocations.
    pub fn with_context(
        engine: Arc<dyn GpioEngine>,
        settings: &GpioSettings,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Self> {
        engine.initialize()?;

        let registry = Arc::new(PinEdgeRegistry::new());
        let dispatcher = Arc::new(EdgeDispatcher::with_context(Arc::clone(&registry), context));
        let (queue, trampoline) = match settings.dispatch {
            DispatchMode::Direct => (None, dispatcher.callback()),
            DispatchMode::Queued { capacity } => {
                let queue = match EdgeQueue::spawn(Arc::clone(&dispatcher), capacity) {
                    Ok(queue) => Arc::new(queue),
                    Err(e) => {
                        warn!("Failed to start edge dispatch thread: {}", e);
                        engine.terminate();
                        return Err(GpioError::DispatchThread { reason: e.to_string() });
                    }
                };
                let trampoline = queue.callback();
                (Some(queue), trampoline)
            }
        };

        info!(dispatch = ?settings.dispatch, debug = settings.debug, "GPIO initialized");
        Ok(Gpio {
            engine,
            registry,
            dispatcher,
            queue,
            trampoline,
            armed: (0..MAX_PINS).map(|_| AtomicBool::new(false)).collect(),
            falling: settings.falling_edge_policy(),
            debug: AtomicBool::new(settings.debug),
            terminated: AtomicBool::new(false),
        })
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn GpioEngine> {
        &self.engine
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<PinEdgeRegistry> {
        &self.registry
    }

    /// Install `handler` for edges on `pin`, replacing any previous one.
    ///
    /// The native trampoline for `pin` is registered the first time a
    /// handler is installed there; later installs only swap the binding.
    ///
    /// # Errors
    ///
    /// `GpioError::InvalidPin` for pins outside `[0, MAX_PINS)`, or the
    /// native error if the trampoline cannot be registered. Existing
    /// bindings are untouched on error.
    pub fn install_handler<H>(&self, pin: u32, handler: H) -> Result<()>
    where
        H: EdgeHandler + 'static,
    {
        self.ensure_live()?;
        let pin = Pin::new(pin)?;
        self.arm(pin)?;
        let generation = self.registry.install(pin.number(), handler)?;
        debug!(%pin, generation, "Edge handler installed");
        Ok(())
    }

    /// Remove the handler for `pin`. Edges still reported for it are dropped.
    pub fn clear_handler(&self, pin: u32) -> Result<()> {
        self.ensure_live()?;
        self.registry.clear(pin)
    }

    /// Pulse `output_pin` and time the echo on `input_pin`.
    ///
    /// Returns the echo width in microseconds, or `-1` if no echo started
    /// within `wait_budget_us`. Blocks the calling thread for the duration.
    ///
    /// # Errors
    ///
    /// Invalid pins, negative durations and native failures. A missing echo
    /// is not an error.
    pub fn measure_pulse(
        &self,
        output_pin: u32,
        input_pin: u32,
        wait_budget_us: i64,
        pulse_hold_us: i64,
        pulse_is_low: bool,
    ) -> Result<i64> {
        let request = RangingRequest::new(
            Pin::new(output_pin)?,
            Pin::new(input_pin)?,
            wait_budget_us,
            pulse_hold_us,
            pulse_is_low,
        )?
        .with_falling_policy(self.falling);
        Ok(self.measure(&request)?.to_micros_or_sentinel())
    }

    /// Run a prepared ranging request.
    pub fn measure(&self, request: &RangingRequest) -> Result<RangingResult> {
        self.ensure_live()?;
        let result = ranging::measure_pulse(&*self.engine, request)?;
        if self.debug_enabled() {
            debug!(
                output = %request.output,
                input = %request.input,
                wait_budget_us = request.wait_budget_us,
                pulse_hold_us = request.pulse_hold_us,
                pulse_is_low = request.pulse_is_low,
                ?result,
                "measure_pulse"
            );
        }
        Ok(result)
    }

    /// Emit a single pulse of 1-100 µs on `pin`.
    pub fn trigger(&self, pin: u32, pulse_len_us: u32, level: Level) -> Result<()> {
        self.ensure_live()?;
        let pin = Pin::new(pin)?;
        if self.debug_enabled() {
            debug!(%pin, pulse_len_us, %level, "trigger");
        }
        ranging::trigger(&*self.engine, pin, pulse_len_us, level)
    }

    /// Set the function of `pin`.
    pub fn set_mode(&self, pin: u32, mode: PinMode) -> Result<()> {
        self.ensure_live()?;
        self.engine.set_mode(Pin::new(pin)?, mode)
    }

    /// Current function of `pin`.
    pub fn mode(&self, pin: u32) -> Result<PinMode> {
        self.ensure_live()?;
        self.engine.mode(Pin::new(pin)?)
    }

    /// Select the pull resistor of `pin`.
    pub fn set_pull(&self, pin: u32, pull: Pull) -> Result<()> {
        self.ensure_live()?;
        self.engine.set_pull(Pin::new(pin)?, pull)
    }

    /// Sample `pin`.
    pub fn read(&self, pin: u32) -> Result<Level> {
        self.ensure_live()?;
        self.engine.read(Pin::new(pin)?)
    }

    /// Drive `pin`.
    pub fn write(&self, pin: u32, level: Level) -> Result<()> {
        self.ensure_live()?;
        let pin = Pin::new(pin)?;
        if self.debug_enabled() {
            debug!(%pin, %level, "write");
        }
        self.engine.write(pin, level)
    }

    /// Block for `micros` microseconds.
    pub fn delay_us(&self, micros: u32) {
        self.engine.delay_us(micros)
    }

    /// Current engine tick.
    pub fn tick(&self) -> Tick {
        self.engine.now()
    }

    /// Turn verbose tracing of writes, triggers and ranging on or off.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        info!(enabled, "GPIO debug tracing toggled");
    }

    /// Whether verbose tracing is on.
    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Dispatch counters so far.
    pub fn dispatch_stats(&self) -> DispatchCounts {
        self.dispatcher.stats().snapshot()
    }

    /// Release all handlers, stop the dispatch thread and terminate the
    /// engine. Later calls are no-ops; other operations fail with
    /// `GpioError::NotInitialized`.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        self.engine.terminate();
        self.registry.clear_all();
        info!(stats = ?self.dispatch_stats(), "GPIO terminated");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            Err(GpioError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn arm(&self, pin: Pin) -> Result<()> {
        let armed = &self.armed[pin.index()];
        if armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        if let Err(e) = self
            .engine
            .register_edge_callback(pin, Arc::clone(&self.trampoline))
        {
            armed.store(false, Ordering::Release);
            return Err(e);
        }
        debug!(%pin, "Native edge trampoline registered");
        Ok(())
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::EdgeLevel;
    use crate::sim::SimEngine;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn sim_gpio(settings: GpioSettings) -> (Arc<SimEngine>, Gpio) {
        let engine = Arc::new(SimEngine::new());
        let gpio = Gpio::new(engine.clone(), &settings).unwrap();
        (engine, gpio)
    }

    fn pin(n: u32) -> Pin {
        Pin::new(n).unwrap()
    }

    #[test]
    fn test_init_failure_is_surfaced() {
        let engine = Arc::new(SimEngine::failing_init(-1));
        let err = Gpio::new(engine, &GpioSettings::default()).err().unwrap();
        assert_eq!(err, GpioError::NativeInit { code: -1 });
    }

    #[test]
    fn test_handler_receives_edges_and_trampoline_registered_once() {
        let (engine, gpio) = sim_gpio(GpioSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        gpio.install_handler(23, move |_: Pin, level: EdgeLevel, _: Tick| -> anyhow::Result<()> {
            sink.lock().push(level);
            Ok(())
        })
        .unwrap();
        gpio.install_handler(23, |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> { Ok(()) })
            .unwrap();
        assert_eq!(engine.registrations(pin(23)), 1);

        let sink = Arc::clone(&seen);
        gpio.install_handler(23, move |_: Pin, level: EdgeLevel, _: Tick| -> anyhow::Result<()> {
            sink.lock().push(level);
            Ok(())
        })
        .unwrap();
        engine.set_input(pin(23), Level::High);
        engine.inject_edge(pin(23), EdgeLevel::NoChange);
        assert_eq!(*seen.lock(), vec![EdgeLevel::High, EdgeLevel::NoChange]);
        assert_eq!(gpio.dispatch_stats().delivered, 2);
    }

    #[test]
    fn test_install_out_of_range_pin() {
        let (_engine, gpio) = sim_gpio(GpioSettings::default());
        let err = gpio
            .install_handler(MAX_PINS as u32, |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> { Ok(()) })
            .unwrap_err();
        assert_eq!(err, GpioError::InvalidPin { pin: MAX_PINS as i64 });
    }

    #[test]
    fn test_cleared_handler_drops_edges() {
        let (engine, gpio) = sim_gpio(GpioSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        gpio.install_handler(5, move |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        gpio.clear_handler(5).unwrap();
        engine.set_input(pin(5), Level::High);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(gpio.dispatch_stats().no_handler, 1);
    }

    #[test]
    fn test_queued_mode_delivers_off_thread() {
        let settings = GpioSettings {
            dispatch: DispatchMode::Queued { capacity: 64 },
            ..Default::default()
        };
        let (engine, gpio) = sim_gpio(settings);
        let caller = std::thread::current().id();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&threads);
        gpio.install_handler(8, move |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> {
            sink.lock().push(std::thread::current().id());
            Ok(())
        })
        .unwrap();
        engine.set_input(pin(8), Level::High);
        engine.set_input(pin(8), Level::Low);
        gpio.terminate();

        let threads = threads.lock();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != caller));
    }

    #[test]
    fn test_measure_pulse_sentinel_and_echo() {
        let (engine, gpio) = sim_gpio(GpioSettings::default());
        assert_eq!(gpio.measure_pulse(17, 18, 1_000, 10, false).unwrap(), -1);

        engine.attach_echo(pin(17), pin(18), 100, 2_000);
        let micros = gpio.measure_pulse(17, 18, 50_000, 10, false).unwrap();
        assert!((1_500..=3_000).contains(&micros), "measured {micros}us");

        assert!(gpio.measure_pulse(17, 99, 1_000, 10, false).is_err());
    }

    #[test]
    fn test_settings_falling_timeout_applies() {
        let settings = GpioSettings {
            falling_edge_timeout_us: Some(2_000),
            ..Default::default()
        };
        let (engine, gpio) = sim_gpio(settings);
        engine.set_input(pin(18), Level::High);
        assert_eq!(gpio.measure_pulse(17, 18, 5_000, 10, false).unwrap(), -1);
    }

    #[test]
    fn test_terminate_releases_bindings_and_blocks_operations() {
        let (_engine, gpio) = sim_gpio(GpioSettings::default());
        gpio.install_handler(4, |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> { Ok(()) })
            .unwrap();
        gpio.terminate();
        assert!(gpio.registry().installed_pins().is_empty());
        assert_eq!(gpio.write(4, Level::High), Err(GpioError::NotInitialized));
        gpio.terminate();
    }

    #[test]
    fn test_debug_toggle() {
        let (_engine, gpio) = sim_gpio(GpioSettings::default());
        assert!(!gpio.debug_enabled());
        gpio.set_debug(true);
        assert!(gpio.debug_enabled());
        gpio.write(6, Level::High).unwrap();
        assert_eq!(gpio.read(6).unwrap(), Level::High);
    }
}
