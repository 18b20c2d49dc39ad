//! [`GpioEngine`] backed by the pigpio C library.
//!
//! pigpio keeps its state in the process, so there is at most one live
//! engine. Edge alerts arrive on pigpio's own monitor thread through a single
//! `extern "C"` trampoline, which looks up the Rust callback for the pin in a
//! static table.

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, const_rwlock};
use tracing::{info, warn};

use crate::engine::{EdgeCallback, GpioEngine};
use crate::error::{GpioError, Result};
use crate::pin::{EdgeLevel, Level, MAX_PINS, Pin, PinMode, Pull};
use crate::tick::Tick;

type AlertFn = extern "C" fn(gpio: c_int, level: c_int, tick: u32);

#[link(name = "pigpio")]
unsafe extern "C" {
    fn gpioInitialise() -> c_int;
    fn gpioTerminate();
    fn gpioSetMode(gpio: u32, mode: u32) -> c_int;
    fn gpioGetMode(gpio: u32) -> c_int;
    fn gpioSetPullUpDown(gpio: u32, pud: u32) -> c_int;
    fn gpioRead(gpio: u32) -> c_int;
    fn gpioWrite(gpio: u32, level: u32) -> c_int;
    fn gpioDelay(micros: u32) -> u32;
    fn gpioTick() -> u32;
    fn gpioSetAlertFunc(gpio: u32, f: Option<AlertFn>) -> c_int;
}

static CALLBACKS: [RwLock<Option<EdgeCallback>>; MAX_PINS] = [const { const_rwlock(None) }; MAX_PINS];

extern "C" fn trampoline(gpio: c_int, level: c_int, tick: u32) {
    let Some(level) = EdgeLevel::from_native(level) else {
        warn!(gpio, level, "Unknown edge level from pigpio, dropped");
        return;
    };
    let Some(slot) = usize::try_from(gpio).ok().and_then(|i| CALLBACKS.get(i)) else {
        warn!(gpio, "Edge alert for unknown pin, dropped");
        return;
    };
    let callback = slot.read().clone();
    if let Some(callback) = callback {
        callback(gpio as u32, level, Tick(tick));
    }
}

/// The process-wide pigpio engine.
#[derive(Debug, Default)]
pub struct PigpioEngine {
    initialized: AtomicBool,
}

impl PigpioEngine {
    /// Engine handle. Nothing touches the hardware until `initialize`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl GpioEngine for PigpioEngine {
    fn initialize(&self) -> Result<()> {
        // SAFETY: plain C call without pointer arguments.
        let version = unsafe { gpioInitialise() };
        if version < 0 {
            return Err(GpioError::NativeInit { code: version });
        }
        self.initialized.store(true, Ordering::Release);
        info!(version, "pigpio initialized");
        Ok(())
    }

    fn terminate(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        for (gpio, slot) in CALLBACKS.iter().enumerate() {
            if slot.write().take().is_some() {
                // SAFETY: a null function pointer cancels the alert.
                unsafe { gpioSetAlertFunc(gpio as u32, None) };
            }
        }
        // SAFETY: plain C call; no alerts remain registered.
        unsafe { gpioTerminate() };
        info!("pigpio terminated");
    }

    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        // SAFETY: plain C call with value arguments.
        GpioError::check("gpioSetMode", unsafe { gpioSetMode(pin.number(), mode.as_native()) })?;
        Ok(())
    }

    fn mode(&self, pin: Pin) -> Result<PinMode> {
        // SAFETY: plain C call with value arguments.
        let raw = GpioError::check("gpioGetMode", unsafe { gpioGetMode(pin.number()) })?;
        PinMode::from_native(raw).ok_or(GpioError::BadValue {
            what: "gpioGetMode result",
            value: i64::from(raw),
        })
    }

    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()> {
        // SAFETY: plain C call with value arguments.
        GpioError::check("gpioSetPullUpDown", unsafe {
            gpioSetPullUpDown(pin.number(), pull.as_native())
        })?;
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level> {
        // SAFETY: plain C call with value arguments.
        let raw = GpioError::check("gpioRead", unsafe { gpioRead(pin.number()) })?;
        Ok(Level::from(raw != 0))
    }

    fn write(&self, pin: Pin, level: Level) -> Result<()> {
        // SAFETY: plain C call with value arguments.
        GpioError::check("gpioWrite", unsafe {
            gpioWrite(pin.number(), level.as_native() as u32)
        })?;
        Ok(())
    }

    fn delay_us(&self, micros: u32) {
        // SAFETY: plain C call with value arguments.
        unsafe { gpioDelay(micros) };
    }

    fn now(&self) -> Tick {
        // SAFETY: plain C call without arguments.
        Tick(unsafe { gpioTick() })
    }

    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<()> {
        *CALLBACKS[pin.index()].write() = Some(callback);
        // SAFETY: `trampoline` is a 'static extern "C" fn with the signature
        // pigpio expects.
        let rc = unsafe { gpioSetAlertFunc(pin.number(), Some(trampoline)) };
        if let Err(e) = GpioError::check("gpioSetAlertFunc", rc) {
            CALLBACKS[pin.index()].write().take();
            return Err(e);
        }
        Ok(())
    }
}
