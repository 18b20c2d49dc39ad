//! Per-pin table of installed edge handlers.
//!
//! Each pin owns one slot holding an optional `Arc<EdgeBinding>`. A slot is
//! mutated only by swapping the whole binding, so a reader sees either the old
//! or the new binding and never a half-built one. Readers clone the `Arc`
//! under a short read lock and drop the lock before calling the handler; an
//! in-flight dispatch therefore keeps the binding it started with alive even
//! if the slot is replaced underneath it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::pin::{EdgeLevel, MAX_PINS, Pin};
use crate::tick::Tick;

/// Application callback for edges on one pin.
///
/// Handlers run on the engine's monitor thread (or the dispatch thread in
/// queued mode) and should return quickly. A returned error or a panic is
/// caught and logged by the dispatcher.
pub trait EdgeHandler: Send + Sync {
    /// Called once per edge.
    fn on_edge(&self, pin: Pin, level: EdgeLevel, tick: Tick) -> anyhow::Result<()>;
}

impl<F> EdgeHandler for F
where
    F: Fn(Pin, EdgeLevel, Tick) -> anyhow::Result<()> + Send + Sync,
{
    fn on_edge(&self, pin: Pin, level: EdgeLevel, tick: Tick) -> anyhow::Result<()> {
        self(pin, level, tick)
    }
}

/// An installed handler together with the pin it serves.
pub struct EdgeBinding {
    pin: Pin,
    generation: u64,
    handler: Box<dyn EdgeHandler>,
}

impl EdgeBinding {
    /// Pin this binding was installed on.
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Install counter value; later installs have larger generations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the handler.
    pub fn invoke(&self, level: EdgeLevel, tick: Tick) -> anyhow::Result<()> {
        self.handler.on_edge(self.pin, level, tick)
    }
}

impl core::fmt::Debug for EdgeBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EdgeBinding")
            .field("pin", &self.pin)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

type Slot = RwLock<Option<Arc<EdgeBinding>>>;

/// Holds the current handler of every pin.
pub struct PinEdgeRegistry {
    slots: Box<[Slot]>,
    next_generation: AtomicU64,
}

impl PinEdgeRegistry {
    /// Registry with all `MAX_PINS` slots empty.
    pub fn new() -> Self {
        let slots = (0..MAX_PINS).map(|_| RwLock::new(None)).collect();
        PinEdgeRegistry {
            slots,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Install `handler` on `pin`, replacing whatever was there.
    ///
    /// The previous handler is released after the new one is visible to
    /// lookups. Returns the generation of the new binding.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::InvalidPin` if `pin` is out of range; no binding
    /// changes in that case.
    pub fn install<H>(&self, pin: u32, handler: H) -> Result<u64>
    where
        H: EdgeHandler + 'static,
    {
        let pin = Pin::new(pin)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let binding = Arc::new(EdgeBinding {
            pin,
            generation,
            handler: Box::new(handler),
        });
        self.swap(pin, Some(binding));
        Ok(generation)
    }

    /// Empty the slot for `pin`. Equivalent to installing a binding that
    /// handles nothing.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::InvalidPin` if `pin` is out of range.
    pub fn clear(&self, pin: u32) -> Result<()> {
        let pin = Pin::new(pin)?;
        self.swap(pin, None);
        Ok(())
    }

    /// Current binding for `pin`, if any.
    pub fn lookup(&self, pin: Pin) -> Option<Arc<EdgeBinding>> {
        self.slots[pin.index()].read().clone()
    }

    /// Pins that currently have a binding.
    pub fn installed_pins(&self) -> Vec<Pin> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.read().is_some())
            .filter_map(|(index, _)| Pin::new(index as u32).ok())
            .collect()
    }

    /// Release every binding. Used at shutdown.
    pub fn clear_all(&self) {
        for index in 0..self.slots.len() {
            if let Ok(pin) = Pin::new(index as u32) {
                self.swap(pin, None);
            }
        }
    }

    fn swap(&self, pin: Pin, binding: Option<Arc<EdgeBinding>>) {
        let new_generation = binding.as_ref().map(|b| b.generation);
        let previous = {
            let mut slot = self.slots[pin.index()].write();
            core::mem::replace(&mut *slot, binding)
        };
        if let Some(old) = previous {
            debug!(
                %pin,
                old_generation = old.generation,
                ?new_generation,
                in_flight = Arc::strong_count(&old) - 1,
                "Replaced edge binding"
            );
            // Dropped outside the slot lock; the handler itself goes away once
            // any in-flight dispatch drops its clone.
            drop(old);
        } else if new_generation.is_some() {
            debug!(%pin, ?new_generation, "Installed edge binding");
        }
    }
}

impl Default for PinEdgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
