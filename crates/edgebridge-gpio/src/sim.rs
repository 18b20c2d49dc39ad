//! Simulated GPIO engine for testing and for running without hardware.
//!
//! Pin levels live in a table behind a mutex. The tick is derived from a
//! monotonic clock plus a configurable offset so that wraparound can be
//! exercised on demand. Echo responders emulate a time-of-flight sensor: when
//! a pulse on the trigger pin ends, the echo pin reads high for a scripted
//! window. Edge callbacks fire on whichever thread changes a level, which
//! stands in for the native monitor thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use spin_sleep::SpinSleeper;
use tracing::{debug, info, trace};

use crate::engine::{EdgeCallback, GpioEngine};
use crate::error::{GpioError, Result};
use crate::pin::{EdgeLevel, Level, MAX_PINS, Pin, PinMode, Pull};
use crate::tick::Tick;

const PI_NOT_INITIALISED: i32 = -31;
const HISTORY_LIMIT: usize = 1024;

/// A scripted window during which a pin reads `level`.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: Tick,
    width: u32,
    level: Level,
}

#[derive(Debug, Clone, Copy)]
struct SimPin {
    mode: PinMode,
    pull: Pull,
    level: Level,
    window: Option<Window>,
    registrations: usize,
}

impl Default for SimPin {
    fn default() -> Self {
        SimPin {
            mode: PinMode::Input,
            pull: Pull::Off,
            level: Level::Low,
            window: None,
            registrations: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EchoResponder {
    trigger: Pin,
    echo: Pin,
    delay_us: u32,
    width_us: u32,
    // Level the trigger rested at before the current pulse began.
    pulse_from: Option<Level>,
}

#[derive(Debug, Default)]
struct SimState {
    pins: Vec<SimPin>,
    responders: Vec<EchoResponder>,
    history: Vec<(Pin, Level, Tick)>,
}

/// Software stand-in for the native engine.
pub struct SimEngine {
    epoch: Instant,
    tick_offset: u32,
    init_status: i32,
    sleeper: SpinSleeper,
    initialized: AtomicBool,
    state: Mutex<SimState>,
    callbacks: RwLock<Vec<Option<EdgeCallback>>>,
}

impl SimEngine {
    /// Engine whose tick starts near zero.
    pub fn new() -> Self {
        Self::with_tick_offset(0)
    }

    /// Engine whose tick starts at `offset`. Use an offset a little below
    /// `u32::MAX` to put the wrap point inside a test.
    pub fn with_tick_offset(offset: u32) -> Self {
        SimEngine {
            epoch: Instant::now(),
            tick_offset: offset,
            init_status: 0,
            sleeper: SpinSleeper::default(),
            initialized: AtomicBool::new(false),
            state: Mutex::new(SimState {
                pins: vec![SimPin::default(); MAX_PINS],
                ..Default::default()
            }),
            callbacks: RwLock::new(vec![None; MAX_PINS]),
        }
    }

    /// Engine whose `initialize` fails with the given native status.
    pub fn failing_init(code: i32) -> Self {
        SimEngine {
            init_status: code,
            ..Self::new()
        }
    }

    /// Drive an input pin from outside, as a connected device would.
    /// Fires the pin's edge callback if the level changes.
    pub fn set_input(&self, pin: Pin, level: Level) {
        let changed = {
            let mut state = self.state.lock();
            let slot = &mut state.pins[pin.index()];
            slot.window = None;
            let changed = slot.level != level;
            slot.level = level;
            changed
        };
        if changed {
            self.fire(pin, level.into());
        }
    }

    /// Deliver an arbitrary edge notification for `pin` on the calling
    /// thread, including watchdog `NoChange` events.
    pub fn inject_edge(&self, pin: Pin, level: EdgeLevel) {
        self.fire(pin, level);
    }

    /// Make `echo` answer every pulse on `trigger`: `delay_us` after the
    /// pulse ends, `echo` reads high for `width_us`.
    pub fn attach_echo(&self, trigger: Pin, echo: Pin, delay_us: u32, width_us: u32) {
        let mut state = self.state.lock();
        state.responders.retain(|r| r.trigger != trigger);
        state.responders.push(EchoResponder {
            trigger,
            echo,
            delay_us,
            width_us,
            pulse_from: None,
        });
        debug!(%trigger, %echo, delay_us, width_us, "Attached simulated echo");
    }

    /// Remove the echo responder on `trigger`.
    pub fn detach_echo(&self, trigger: Pin) {
        self.state.lock().responders.retain(|r| r.trigger != trigger);
    }

    /// Levels written to output pins, oldest first.
    pub fn write_history(&self, pin: Pin) -> Vec<(Level, Tick)> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|(p, _, _)| *p == pin)
            .map(|(_, level, tick)| (*level, *tick))
            .collect()
    }

    /// How many times a native callback was registered for `pin`.
    pub fn registrations(&self, pin: Pin) -> usize {
        self.state.lock().pins[pin.index()].registrations
    }

    /// Configured pull for `pin`.
    pub fn pull(&self, pin: Pin) -> Pull {
        self.state.lock().pins[pin.index()].pull
    }

    fn ensure_initialized(&self, op: &'static str) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GpioError::Native {
                op,
                code: PI_NOT_INITIALISED,
            })
        }
    }

    fn fire(&self, pin: Pin, level: EdgeLevel) {
        let callback = self.callbacks.read()[pin.index()].clone();
        if let Some(callback) = callback {
            callback(pin.number(), level, self.now());
        } else {
            trace!(%pin, %level, "Simulated edge with no callback registered");
        }
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioEngine for SimEngine {
    fn initialize(&self) -> Result<()> {
        if self.init_status < 0 {
            return Err(GpioError::NativeInit {
                code: self.init_status,
            });
        }
        self.initialized.store(true, Ordering::Release);
        info!(tick = self.now().raw(), "Simulated GPIO engine initialized");
        Ok(())
    }

    fn terminate(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.callbacks.write().iter_mut().for_each(|cb| *cb = None);
            info!("Simulated GPIO engine terminated");
        }
    }

    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        self.ensure_initialized("gpioSetMode")?;
        self.state.lock().pins[pin.index()].mode = mode;
        Ok(())
    }

    fn mode(&self, pin: Pin) -> Result<PinMode> {
        self.ensure_initialized("gpioGetMode")?;
        Ok(self.state.lock().pins[pin.index()].mode)
    }

    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()> {
        self.ensure_initialized("gpioSetPullUpDown")?;
        self.state.lock().pins[pin.index()].pull = pull;
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level> {
        self.ensure_initialized("gpioRead")?;
        let now = self.now();
        let state = self.state.lock();
        let slot = &state.pins[pin.index()];
        Ok(match slot.window {
            Some(w) if now.within(w.start, w.width) => w.level,
            _ => slot.level,
        })
    }

    fn write(&self, pin: Pin, level: Level) -> Result<()> {
        self.ensure_initialized("gpioWrite")?;
        let now = self.now();
        let changed = {
            let mut state = self.state.lock();
            let previous = state.pins[pin.index()].level;
            state.pins[pin.index()].level = level;
            state.pins[pin.index()].mode = PinMode::Output;

            if state.history.len() == HISTORY_LIMIT {
                state.history.remove(0);
            }
            state.history.push((pin, level, now));

            if previous != level {
                let mut scheduled = Vec::new();
                for responder in state.responders.iter_mut().filter(|r| r.trigger == pin) {
                    match responder.pulse_from {
                        None => responder.pulse_from = Some(previous),
                        Some(rest) if rest == level => {
                            responder.pulse_from = None;
                            scheduled.push((responder.echo, responder.delay_us, responder.width_us));
                        }
                        Some(_) => {}
                    }
                }
                for (echo, delay_us, width_us) in scheduled {
                    state.pins[echo.index()].window = Some(Window {
                        start: now.wrapping_add(delay_us),
                        width: width_us,
                        level: Level::High,
                    });
                    trace!(%echo, start = now.wrapping_add(delay_us).raw(), width_us, "Scheduled simulated echo");
                }
            }
            previous != level
        };
        if changed {
            self.fire(pin, level.into());
        }
        Ok(())
    }

    fn delay_us(&self, micros: u32) {
        self.sleeper.sleep(Duration::from_micros(u64::from(micros)));
    }

    fn now(&self) -> Tick {
        // Truncation to 32 bits is the wraparound.
        let elapsed = self.epoch.elapsed().as_micros() as u32;
        Tick(self.tick_offset.wrapping_add(elapsed))
    }

    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<()> {
        self.ensure_initialized("gpioSetAlertFunc")?;
        self.state.lock().pins[pin.index()].registrations += 1;
        self.callbacks.write()[pin.index()] = Some(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn engine() -> SimEngine {
        let engine = SimEngine::new();
        engine.initialize().unwrap();
        engine
    }

    fn pin(n: u32) -> Pin {
        Pin::new(n).unwrap()
    }

    #[test]
    fn test_operations_before_initialize_fail() {
        let engine = SimEngine::new();
        assert_eq!(
            engine.read(pin(4)),
            Err(GpioError::Native { op: "gpioRead", code: -31 })
        );
    }

    #[test]
    fn test_failing_init() {
        let engine = SimEngine::failing_init(-1);
        assert_eq!(engine.initialize(), Err(GpioError::NativeInit { code: -1 }));
    }

    #[test]
    fn test_tick_offset_wraps() {
        let engine = SimEngine::with_tick_offset(u32::MAX - 20_000);
        let start = engine.now();
        engine.delay_us(30_000);
        let end = engine.now();
        assert!(end.raw() < start.raw(), "tick should have wrapped");
        assert!(end.since(start) >= 30_000);
    }

    #[test]
    fn test_write_then_read_back() {
        let engine = engine();
        engine.write(pin(5), Level::High).unwrap();
        assert_eq!(engine.read(pin(5)).unwrap(), Level::High);
        assert_eq!(engine.mode(pin(5)).unwrap(), PinMode::Output);
    }

    #[test]
    fn test_echo_window_follows_pulse() {
        let engine = engine();
        engine.attach_echo(pin(17), pin(18), 0, 5_000);
        engine.write(pin(17), Level::High).unwrap();
        assert_eq!(engine.read(pin(18)).unwrap(), Level::Low);
        engine.write(pin(17), Level::Low).unwrap();
        assert_eq!(engine.read(pin(18)).unwrap(), Level::High);
        engine.delay_us(8_000);
        assert_eq!(engine.read(pin(18)).unwrap(), Level::Low);
    }

    #[test]
    fn test_level_changes_fire_callback() {
        let engine = engine();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        engine
            .register_edge_callback(
                pin(22),
                Arc::new(move |raw, level, _tick| {
                    assert_eq!(raw, 22);
                    assert_ne!(level, EdgeLevel::NoChange);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        engine.set_input(pin(22), Level::High);
        engine.set_input(pin(22), Level::High);
        engine.set_input(pin(22), Level::Low);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(engine.registrations(pin(22)), 1);
    }
}
