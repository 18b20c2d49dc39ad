//! Runtime options for [`crate::Gpio`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ranging::FallingEdgePolicy;

/// Where edge handlers run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "mode", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// On the engine's monitor thread, synchronously.
    #[default]
    Direct,
    /// On a dedicated dispatch thread fed by a bounded queue.
    Queued {
        /// Pending edges held before new ones are dropped.
        capacity: usize,
    },
}

/// Options for [`crate::Gpio::new`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpioSettings {
    /// Handler execution strategy.
    pub dispatch: DispatchMode,
    /// Start with verbose tracing of writes, triggers and ranging calls.
    pub debug: bool,
    /// Bound on the echo's falling-edge wait. `None` waits indefinitely.
    pub falling_edge_timeout_us: Option<u32>,
}

impl GpioSettings {
    /// Falling-edge policy implied by these settings.
    pub fn falling_edge_policy(&self) -> FallingEdgePolicy {
        match self.falling_edge_timeout_us {
            Some(timeout_us) => FallingEdgePolicy::Bounded { timeout_us },
            None => FallingEdgePolicy::Unbounded,
        }
    }
}
