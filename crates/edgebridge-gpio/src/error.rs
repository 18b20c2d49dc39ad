//! This module defines the error types used by the `edgebridge-gpio` crate.

use crate::pin::{Pin, PinMode};

/// Result alias for GPIO operations.
pub type Result<T> = core::result::Result<T, GpioError>;

/// Error type for GPIO operations.
///
/// Running out of time while waiting for an echo is not an error; ranging
/// reports that as [`crate::RangingResult::Timeout`]. Faults inside edge
/// handlers never surface here either, they are logged by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpioError {
    /// Pin number outside `[0, MAX_PINS)`.
    #[error("invalid pin {pin}: must be in [0, {max})", max = crate::pin::MAX_PINS)]
    InvalidPin {
        /// The rejected pin number.
        pin: i64,
    },

    /// The native engine failed to initialize. Nothing else will work.
    #[error("native GPIO engine failed to initialize: rc={code} ({})", status_text(.code))]
    NativeInit {
        /// Native status code.
        code: i32,
    },

    /// A native pin operation returned a negative status.
    #[error("{op} failed: rc={code} ({})", status_text(.code))]
    Native {
        /// Name of the native call.
        op: &'static str,
        /// Native status code.
        code: i32,
    },

    /// An argument was outside the accepted range.
    #[error("bad value for {what}: {value}")]
    BadValue {
        /// Which argument.
        what: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A device needs a pin in a particular mode.
    #[error("{pin} is in {actual:?} mode, expected {expected:?}")]
    WrongMode {
        /// The offending pin.
        pin: Pin,
        /// Mode the device requires.
        expected: PinMode,
        /// Mode the pin is actually in.
        actual: PinMode,
    },

    /// The engine has been terminated.
    #[error("GPIO engine is not initialized")]
    NotInitialized,

    /// The queued dispatch thread could not be started.
    #[error("failed to start edge dispatch thread: {reason}")]
    DispatchThread {
        /// OS error text.
        reason: String,
    },
}

impl GpioError {
    /// Map a native status code to `Ok(status)` or [`GpioError::Native`].
    pub fn check(op: &'static str, status: i32) -> Result<i32> {
        if status < 0 {
            Err(GpioError::Native { op, code: status })
        } else {
            Ok(status)
        }
    }
}

fn status_text(code: &i32) -> &'static str {
    describe_status(*code)
}

/// Human readable description of a pigpio status code.
pub fn describe_status(code: i32) -> &'static str {
    match code {
        0 => "ok",
        -1 => "gpioInitialise failed",
        -2 => "gpio not 0-31",
        -3 => "gpio not 0-53",
        -4 => "mode not 0-7",
        -5 => "level not 0-1",
        -6 => "pud not 0-2",
        -13 => "micros not 0-999999",
        -15 => "timeout not 0-60000",
        -31 => "function called before gpioInitialise",
        -32 => "function called after gpioInitialise",
        -41 => "gpio operation not permitted",
        -42 => "one or more gpios not permitted",
        -46 => "trigger pulse length not 1-100",
        -50 => "gpio already in use",
        -58 => "can't allocate temporary memory",
        -64 => "bad MICS delay (too large)",
        -123 => "bad edge",
        _ => "unknown status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_non_negative() {
        assert_eq!(GpioError::check("gpioWrite", 0), Ok(0));
        assert_eq!(GpioError::check("gpioRead", 1), Ok(1));
    }

    #[test]
    fn test_check_maps_negative_status() {
        let err = GpioError::check("gpioSetMode", -3).unwrap_err();
        assert_eq!(err, GpioError::Native { op: "gpioSetMode", code: -3 });
        assert_eq!(err.to_string(), "gpioSetMode failed: rc=-3 (gpio not 0-53)");
    }

    #[test]
    fn test_display_invalid_pin() {
        let err = GpioError::InvalidPin { pin: 54 };
        assert_eq!(err.to_string(), "invalid pin 54: must be in [0, 54)");
    }

    #[test]
    fn test_describe_unknown_status() {
        assert_eq!(describe_status(-9999), "unknown status");
    }
}
