#![warn(missing_docs)]
#![doc = "GPIO edge-callback bridging and pulse/echo ranging for single-board computers."]
#![doc = ""]
#![doc = "This crate provides a per-pin registry of edge handlers, a dispatcher that runs"]
#![doc = "those handlers for events raised on the native engine's monitor thread, and a"]
#![doc = "busy-polled pulse-and-wait ranging engine for time-of-flight sensors."]

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gpio;
pub mod pin;
#[cfg(feature = "pigpio")]
pub mod pigpio;
pub mod queue;
pub mod ranging;
pub mod registry;
pub mod sensors;
pub mod settings;
pub mod sim;
pub mod tick;

pub use dispatch::{
    ContextGuard, DispatchCounts, DispatchOutcome, DispatchStats, EdgeDispatcher, ExecutionContext, TracingContext,
};
pub use engine::{EdgeCallback, GpioEngine};
pub use error::{GpioError, Result};
pub use gpio::Gpio;
pub use pin::{EdgeLevel, Level, MAX_PINS, Pin, PinMode, Pull};
pub use queue::{EdgeEvent, EdgeQueue};
pub use ranging::{FallingEdgePolicy, RangingRequest, RangingResult, measure_pulse, trigger};
pub use registry::{EdgeBinding, EdgeHandler, PinEdgeRegistry};
pub use sensors::hc_sr04::HcSr04;
pub use settings::{DispatchMode, GpioSettings};
pub use sim::SimEngine;
pub use tick::Tick;
