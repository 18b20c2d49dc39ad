//! Bridge from the native engine's monitor thread to installed edge handlers.
//!
//! The engine calls [`EdgeDispatcher::dispatch`] on a thread it owns. The
//! dispatcher looks the pin up, attaches an execution context for this one
//! invocation, runs the handler to completion and detaches again before
//! handing control back. Nothing that goes wrong in here is allowed to escape
//! into the engine's monitor loop: missing bindings, handler errors and
//! handler panics all end up as a [`DispatchOutcome`] and a log line.
//!
//! A handler that blocks stalls every later edge on the same monitor thread.
//! Handlers that need to do real work should hand it off, or the application
//! should run the dispatcher behind an [`crate::EdgeQueue`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info_span, warn};

use crate::engine::EdgeCallback;
use crate::pin::{EdgeLevel, Pin};
use crate::registry::{EdgeBinding, PinEdgeRegistry};
use crate::tick::Tick;

/// Established for the duration of one handler call, torn down on drop.
pub struct ContextGuard {
    detach: Option<Box<dyn FnOnce()>>,
}

impl ContextGuard {
    /// Guard that runs `detach` when dropped.
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        ContextGuard {
            detach: Some(Box::new(detach)),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// Whatever the host needs set up before a handler may run on a foreign
/// thread.
///
/// `attach` is called once per invocation, never cached per thread: the
/// engine makes no promise that its monitor thread stays the same one.
pub trait ExecutionContext: Send + Sync {
    /// Prepare the current thread to run `binding`'s handler.
    ///
    /// # Errors
    ///
    /// A failed attach skips the handler; the edge is logged and dropped.
    fn attach(&self, binding: &EdgeBinding, level: EdgeLevel, tick: Tick) -> anyhow::Result<ContextGuard>;
}

/// Default context: every invocation runs inside its own `edge_dispatch`
/// tracing span.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingContext;

impl ExecutionContext for TracingContext {
    fn attach(&self, binding: &EdgeBinding, level: EdgeLevel, tick: Tick) -> anyhow::Result<ContextGuard> {
        let span = info_span!(
            "edge_dispatch",
            pin = binding.pin().number(),
            %level,
            tick = tick.raw(),
            generation = binding.generation()
        );
        let entered = span.entered();
        Ok(ContextGuard::new(move || drop(entered)))
    }
}

/// What happened to one edge notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler ran and returned `Ok`.
    Delivered,
    /// No binding for the pin; the edge was dropped.
    NoHandler,
    /// Engine reported a pin outside `[0, MAX_PINS)`.
    InvalidPin,
    /// The execution context could not be attached.
    ContextUnavailable,
    /// Handler returned an error.
    HandlerFailed,
    /// Handler panicked.
    HandlerPanicked,
}

/// Counters kept by the dispatcher and the edge queue.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    no_handler: AtomicU64,
    invalid_pin: AtomicU64,
    faults: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchCounts {
    /// Edges a handler accepted.
    pub delivered: u64,
    /// Edges for pins with no binding.
    pub no_handler: u64,
    /// Edges for out-of-range pins.
    pub invalid_pin: u64,
    /// Handler errors, panics and attach failures.
    pub faults: u64,
    /// Edges discarded by a full queue.
    pub dropped: u64,
}

impl DispatchStats {
    /// Snapshot the counters.
    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            no_handler: self.no_handler.load(Ordering::Relaxed),
            invalid_pin: self.invalid_pin.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::NoHandler => &self.no_handler,
            DispatchOutcome::InvalidPin => &self.invalid_pin,
            DispatchOutcome::ContextUnavailable
            | DispatchOutcome::HandlerFailed
            | DispatchOutcome::HandlerPanicked => &self.faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs installed handlers for edges reported by the engine.
pub struct EdgeDispatcher {
    registry: Arc<PinEdgeRegistry>,
    context: Arc<dyn ExecutionContext>,
    stats: Arc<DispatchStats>,
}

impl EdgeDispatcher {
    /// Dispatcher using [`TracingContext`].
    pub fn new(registry: Arc<PinEdgeRegistry>) -> Self {
        Self::with_context(registry, Arc::new(TracingContext))
    }

    /// Dispatcher with a caller supplied execution context.
    pub fn with_context(registry: Arc<PinEdgeRegistry>, context: Arc<dyn ExecutionContext>) -> Self {
        EdgeDispatcher {
            registry,
            context,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Registry this dispatcher reads from.
    pub fn registry(&self) -> &Arc<PinEdgeRegistry> {
        &self.registry
    }

    /// Shared counters.
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Deliver one edge. Always returns; never panics out of a handler.
    pub fn dispatch(&self, raw_pin: u32, level: EdgeLevel, tick: Tick) -> DispatchOutcome {
        let outcome = self.run(raw_pin, level, tick);
        self.stats.record(outcome);
        outcome
    }

    /// Closure suitable for [`crate::GpioEngine::register_edge_callback`]
    /// that dispatches directly on the engine's thread.
    pub fn callback(self: &Arc<Self>) -> EdgeCallback {
        let dispatcher = Arc::clone(self);
        Arc::new(move |pin, level, tick| {
            dispatcher.dispatch(pin, level, tick);
        })
    }

    fn run(&self, raw_pin: u32, level: EdgeLevel, tick: Tick) -> DispatchOutcome {
        let pin = match Pin::new(raw_pin) {
            Ok(pin) => pin,
            Err(e) => {
                warn!(raw_pin, %level, tick = tick.raw(), "Edge for invalid pin dropped: {}", e);
                return DispatchOutcome::InvalidPin;
            }
        };

        let Some(binding) = self.registry.lookup(pin) else {
            // Expected when a handler is cleared while the engine still has
            // an edge in flight.
            debug!(%pin, %level, tick = tick.raw(), "No handler installed, edge dropped");
            return DispatchOutcome::NoHandler;
        };

        let guard = match self.context.attach(&binding, level, tick) {
            Ok(guard) => guard,
            Err(e) => {
                error!(%pin, %level, "Failed to attach execution context: {:#}", e);
                return DispatchOutcome::ContextUnavailable;
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| binding.invoke(level, tick)));
        drop(guard);

        match result {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                error!(%pin, %level, generation = binding.generation(), "Edge handler failed: {:#}", e);
                DispatchOutcome::HandlerFailed
            }
            Err(payload) => {
                error!(
                    %pin,
                    %level,
                    generation = binding.generation(),
                    "Edge handler panicked: {}",
                    panic_message(payload.as_ref())
                );
                DispatchOutcome::HandlerPanicked
            }
        }
    }
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
