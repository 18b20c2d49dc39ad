//! Pulse-and-wait ranging.
//!
//! Emits one timed pulse on an output pin, then busy-polls an input pin to
//! time the echo pulse that a time-of-flight sensor sends back. The poll loop
//! never sleeps or yields: at microsecond resolution any trip through the
//! scheduler would show up in the measurement. Callers that cannot afford to
//! block should run [`measure_pulse`] on a thread of their own.
//!
//! There is no cancellation. With [`FallingEdgePolicy::Unbounded`] an input
//! that goes high and never comes back blocks the caller indefinitely.

use tracing::trace;

use crate::engine::GpioEngine;
use crate::error::{GpioError, Result};
use crate::pin::{Level, Pin};
use crate::tick::Tick;

/// Value returned by the `i64` ranging API when no echo started in time.
pub const TIMEOUT_SENTINEL: i64 = -1;

/// Longest pulse [`trigger`] accepts, in microseconds.
pub const MAX_TRIGGER_PULSE_US: u32 = 100;

/// How long to wait for the echo to end once it has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallingEdgePolicy {
    /// Wait as long as it takes. Only the rising edge is bounded by the
    /// request's wait budget.
    #[default]
    Unbounded,
    /// Give up and report a timeout after this many microseconds of echo.
    Bounded {
        /// Microseconds allowed between the rising and the falling edge.
        timeout_us: u32,
    },
}

/// One ranging measurement to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangingRequest {
    /// Pin that emits the pulse.
    pub output: Pin,
    /// Pin the echo arrives on.
    pub input: Pin,
    /// Longest time to wait for the echo to start, in microseconds.
    pub wait_budget_us: u32,
    /// Width of the emitted pulse, in microseconds.
    pub pulse_hold_us: u32,
    /// Emit a low pulse (idle high) instead of a high pulse (idle low).
    pub pulse_is_low: bool,
    /// Bound on the falling-edge wait.
    pub falling: FallingEdgePolicy,
}

impl RangingRequest {
    /// Build a request from the signed durations used by the application API.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::BadValue` if either duration is negative or does
    /// not fit the 32-bit tick.
    pub fn new(output: Pin, input: Pin, wait_budget_us: i64, pulse_hold_us: i64, pulse_is_low: bool) -> Result<Self> {
        Ok(RangingRequest {
            output,
            input,
            wait_budget_us: micros("wait_budget_us", wait_budget_us)?,
            pulse_hold_us: micros("pulse_hold_us", pulse_hold_us)?,
            pulse_is_low,
            falling: FallingEdgePolicy::Unbounded,
        })
    }

    /// Same request with a different falling-edge policy.
    pub fn with_falling_policy(self, falling: FallingEdgePolicy) -> Self {
        RangingRequest { falling, ..self }
    }

    /// Level driven for the duration of the pulse.
    pub fn pulse_level(&self) -> Level {
        if self.pulse_is_low { Level::Low } else { Level::High }
    }
}

fn micros(what: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| GpioError::BadValue { what, value })
}

/// Outcome of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingResult {
    /// Width of the echo pulse.
    Echo {
        /// Microseconds between the echo's rising and falling edge.
        micros: u32,
    },
    /// The echo did not start within the wait budget (or, with a bounded
    /// falling policy, did not end in time).
    Timeout,
}

impl RangingResult {
    /// Echo width, if there was one.
    pub fn micros(self) -> Option<u32> {
        match self {
            RangingResult::Echo { micros } => Some(micros),
            RangingResult::Timeout => None,
        }
    }

    /// Echo width, or [`TIMEOUT_SENTINEL`].
    pub fn to_micros_or_sentinel(self) -> i64 {
        self.micros().map_or(TIMEOUT_SENTINEL, i64::from)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    AwaitingRising { wait_start: Tick },
    AwaitingFalling { echo_start: Tick },
}

/// Emit the request's pulse and time the echo. Blocks until the echo ends
/// or a timeout fires.
///
/// # Errors
///
/// Native read/write failures are returned as-is. A missing echo is not an
/// error; it is [`RangingResult::Timeout`].
pub fn measure_pulse<E>(engine: &E, request: &RangingRequest) -> Result<RangingResult>
where
    E: GpioEngine + ?Sized,
{
    emit_pulse(engine, request.output, request.pulse_hold_us, request.pulse_level())?;

    let mut phase = Phase::AwaitingRising {
        wait_start: engine.now(),
    };
    loop {
        match phase {
            Phase::AwaitingRising { wait_start } => {
                if engine.read(request.input)? == Level::High {
                    let echo_start = engine.now();
                    trace!(
                        input = %request.input,
                        waited_us = echo_start.since(wait_start),
                        "Echo started"
                    );
                    phase = Phase::AwaitingFalling { echo_start };
                } else if engine.now().since(wait_start) >= request.wait_budget_us {
                    return Ok(RangingResult::Timeout);
                }
            }
            Phase::AwaitingFalling { echo_start } => {
                if engine.read(request.input)? == Level::Low {
                    return Ok(RangingResult::Echo {
                        micros: engine.now().since(echo_start),
                    });
                }
                if let FallingEdgePolicy::Bounded { timeout_us } = request.falling {
                    if engine.now().since(echo_start) >= timeout_us {
                        return Ok(RangingResult::Timeout);
                    }
                }
            }
        }
    }
}

/// Send a single pulse of `pulse_len_us` at `level` on `pin`, leaving the
/// pin at the inverse level afterwards.
///
/// # Errors
///
/// Returns `GpioError::BadValue` unless `1 <= pulse_len_us <= 100`, or the
/// native error if a write fails.
pub fn trigger<E>(engine: &E, pin: Pin, pulse_len_us: u32, level: Level) -> Result<()>
where
    E: GpioEngine + ?Sized,
{
    if !(1..=MAX_TRIGGER_PULSE_US).contains(&pulse_len_us) {
        return Err(GpioError::BadValue {
            what: "pulse_len_us",
            value: i64::from(pulse_len_us),
        });
    }
    emit_pulse(engine, pin, pulse_len_us, level)
}

fn emit_pulse<E>(engine: &E, pin: Pin, hold_us: u32, level: Level) -> Result<()>
where
    E: GpioEngine + ?Sized,
{
    engine.write(pin, level)?;
    engine.delay_us(hold_us);
    engine.write(pin, level.inverse())
}
