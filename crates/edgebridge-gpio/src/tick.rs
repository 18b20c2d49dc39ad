//! The native engine's 32-bit microsecond tick.
//!
//! The counter wraps every 2^32 µs (about 71.6 minutes). Durations are always
//! computed as `later.wrapping_sub(earlier)` on the raw `u32`, so an interval
//! that straddles the wrap point still comes out right as long as it is
//! shorter than one full period.

use core::fmt;

/// A monotonic microsecond timestamp from the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    /// Construct a tick from its raw counter value.
    pub const fn new(raw: u32) -> Self {
        Tick(raw)
    }

    /// Raw counter value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Microseconds elapsed from `earlier` to `self`, modulo 2^32.
    pub const fn since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Tick `micros` after this one, wrapping at 2^32.
    pub const fn wrapping_add(self, micros: u32) -> Tick {
        Tick(self.0.wrapping_add(micros))
    }

    /// Whether `self` lies in the half-open window `[start, start + len)`,
    /// measured wraparound-safe.
    pub const fn within(self, start: Tick, len: u32) -> bool {
        self.since(start) < len
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
