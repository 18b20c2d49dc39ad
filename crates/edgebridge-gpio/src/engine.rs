//! Native GPIO engine interface
//!
//! This module defines the boundary to the native GPIO engine (pigpio on a
//! Raspberry Pi, or [`crate::SimEngine`] in tests). Everything here is a
//! one-call-in, one-call-out forwarding operation; the interesting logic lives
//! in the registry, dispatcher and ranging modules built on top.

use std::sync::Arc;

use crate::error::Result;
use crate::pin::{EdgeLevel, Level, Pin, PinMode, Pull};
use crate::tick::Tick;

/// Callback the engine invokes on its own monitor thread for every edge.
///
/// Arguments are the raw pin number as reported by the engine, the edge level
/// and the engine tick at which the edge was sampled.
pub type EdgeCallback = Arc<dyn Fn(u32, EdgeLevel, Tick) + Send + Sync>;

/// Native GPIO engine.
///
/// # Threading
///
/// - All methods take `&self`; implementations synchronize internally.
/// - Edge callbacks run on a thread owned by the engine, never on the caller's.
/// - `now` must be cheap enough to call in a tight polling loop.
pub trait GpioEngine: Send + Sync {
    /// Bring up the engine.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::NativeInit` if the hardware cannot be claimed.
    fn initialize(&self) -> Result<()>;

    /// Release the hardware. Safe to call more than once.
    fn terminate(&self);

    /// Set the function of a pin.
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()>;

    /// Current function of a pin.
    fn mode(&self, pin: Pin) -> Result<PinMode>;

    /// Select the internal pull resistor.
    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()>;

    /// Sample the level of a pin.
    fn read(&self, pin: Pin) -> Result<Level>;

    /// Drive an output pin.
    fn write(&self, pin: Pin, level: Level) -> Result<()>;

    /// Block the calling thread for `micros` microseconds.
    fn delay_us(&self, micros: u32);

    /// Current engine tick.
    fn now(&self) -> Tick;

    /// Install the native trampoline for `pin`.
    ///
    /// A second registration for the same pin replaces the first.
    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<()>;
}

impl<E: GpioEngine + ?Sized> GpioEngine for Arc<E> {
    fn initialize(&self) -> Result<()> {
        (**self).initialize()
    }

    fn terminate(&self) {
        (**self).terminate()
    }

    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        (**self).set_mode(pin, mode)
    }

    fn mode(&self, pin: Pin) -> Result<PinMode> {
        (**self).mode(pin)
    }

    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()> {
        (**self).set_pull(pin, pull)
    }

    fn read(&self, pin: Pin) -> Result<Level> {
        (**self).read(pin)
    }

    fn write(&self, pin: Pin, level: Level) -> Result<()> {
        (**self).write(pin, level)
    }

    fn delay_us(&self, micros: u32) {
        (**self).delay_us(micros)
    }

    fn now(&self) -> Tick {
        (**self).now()
    }

    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<()> {
        (**self).register_edge_callback(pin, callback)
    }
}
