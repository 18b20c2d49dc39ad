//! Pin identifiers and logic levels.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GpioError;

/// Number of GPIO lines exposed by the BCM283x family (GPIO 0-53).
pub const MAX_PINS: usize = 54;

/// A validated GPIO pin number in `[0, MAX_PINS)`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin(u8);

impl Pin {
    /// Validate a raw pin number.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError::InvalidPin`] when `raw` is outside `[0, MAX_PINS)`.
    pub fn new(raw: u32) -> Result<Self, GpioError> {
        if (raw as usize) < MAX_PINS {
            Ok(Pin(raw as u8))
        } else {
            Err(GpioError::InvalidPin { pin: i64::from(raw) })
        }
    }

    /// Slot index of this pin in per-pin tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw pin number.
    pub const fn number(self) -> u32 {
        self.0 as u32
    }
}

impl TryFrom<u32> for Pin {
    type Error = GpioError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Pin::new(raw)
    }
}

impl TryFrom<i64> for Pin {
    type Error = GpioError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        u32::try_from(raw)
            .map_err(|_| GpioError::InvalidPin { pin: raw })
            .and_then(Pin::new)
    }
}

impl From<Pin> for u32 {
    fn from(pin: Pin) -> u32 {
        pin.number()
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Logic level of a pin for reads and writes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Logic 0.
    Low,
    /// Logic 1.
    High,
}

impl Level {
    /// The opposite level.
    pub const fn inverse(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    /// Native representation (`0` or `1`).
    pub const fn as_native(self) -> i32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Level {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("LOW"),
            Level::High => f.write_str("HIGH"),
        }
    }
}

/// Level reported with an edge notification.
///
/// `NoChange` is the native engine's watchdog notification: no transition
/// happened within the watchdog period. It is never folded into `Low`/`High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLevel {
    /// Transition to logic 0.
    Low,
    /// Transition to logic 1.
    High,
    /// Watchdog timeout, no level change.
    NoChange,
}

impl EdgeLevel {
    /// Map the native level code (`0`, `1`, `2`). Unknown codes yield `None`.
    pub const fn from_native(code: i32) -> Option<EdgeLevel> {
        match code {
            0 => Some(EdgeLevel::Low),
            1 => Some(EdgeLevel::High),
            2 => Some(EdgeLevel::NoChange),
            _ => None,
        }
    }

    /// The logic level this edge settled on, if it was a real transition.
    pub const fn level(self) -> Option<Level> {
        match self {
            EdgeLevel::Low => Some(Level::Low),
            EdgeLevel::High => Some(Level::High),
            EdgeLevel::NoChange => None,
        }
    }
}

impl From<Level> for EdgeLevel {
    fn from(level: Level) -> EdgeLevel {
        match level {
            Level::Low => EdgeLevel::Low,
            Level::High => EdgeLevel::High,
        }
    }
}

impl fmt::Display for EdgeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLevel::Low => f.write_str("LOW"),
            EdgeLevel::High => f.write_str("HIGH"),
            EdgeLevel::NoChange => f.write_str("NO_CHANGE"),
        }
    }
}

/// Pin function.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// Digital input.
    Input,
    /// Digital output.
    Output,
    /// One of the alternate peripheral functions (0-5).
    Alt(u8),
}

impl PinMode {
    /// Native mode code as used by pigpio.
    pub const fn as_native(self) -> u32 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::Alt(0) => 4,
            PinMode::Alt(1) => 5,
            PinMode::Alt(2) => 6,
            PinMode::Alt(3) => 7,
            PinMode::Alt(4) => 3,
            PinMode::Alt(_) => 2,
        }
    }

    /// Decode a native mode code.
    pub const fn from_native(code: i32) -> Option<PinMode> {
        match code {
            0 => Some(PinMode::Input),
            1 => Some(PinMode::Output),
            4 => Some(PinMode::Alt(0)),
            5 => Some(PinMode::Alt(1)),
            6 => Some(PinMode::Alt(2)),
            7 => Some(PinMode::Alt(3)),
            3 => Some(PinMode::Alt(4)),
            2 => Some(PinMode::Alt(5)),
            _ => None,
        }
    }
}

/// Internal pull resistor selection.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pull {
    /// No pull resistor.
    #[default]
    Off,
    /// Pull to ground.
    Down,
    /// Pull to 3V3.
    Up,
}

impl Pull {
    /// Native pull code as used by pigpio.
    pub const fn as_native(self) -> u32 {
        match self {
            Pull::Off => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_range() {
        assert_eq!(Pin::new(0).unwrap().index(), 0);
        assert_eq!(Pin::new(53).unwrap().number(), 53);
        assert_eq!(
            Pin::new(MAX_PINS as u32),
            Err(GpioError::InvalidPin { pin: MAX_PINS as i64 })
        );
        assert!(Pin::try_from(-1i64).is_err());
        assert!(Pin::try_from(17i64).is_ok());
    }

    #[test]
    fn test_edge_level_native_codes() {
        assert_eq!(EdgeLevel::from_native(0), Some(EdgeLevel::Low));
        assert_eq!(EdgeLevel::from_native(1), Some(EdgeLevel::High));
        assert_eq!(EdgeLevel::from_native(2), Some(EdgeLevel::NoChange));
        assert_eq!(EdgeLevel::from_native(3), None);
        assert_eq!(EdgeLevel::NoChange.level(), None);
        assert_eq!(EdgeLevel::High.level(), Some(Level::High));
    }

    #[test]
    fn test_level_inverse() {
        assert_eq!(Level::High.inverse(), Level::Low);
        assert_eq!(Level::Low.inverse(), Level::High);
        assert_eq!(Level::from(true), Level::High);
    }

    #[test]
    fn test_pin_mode_native_roundtrip_for_alt_functions() {
        for alt in 0..6 {
            let mode = PinMode::Alt(alt);
            assert_eq!(PinMode::from_native(mode.as_native() as i32), Some(mode));
        }
    }
}
