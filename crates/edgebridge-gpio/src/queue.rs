//! Queued edge dispatch.
//!
//! The native trampoline only enqueues `(pin, level, tick)`; a dedicated
//! `edge-dispatch` thread owned by this crate drains the queue and runs the
//! handlers. The engine's monitor thread therefore never waits on a handler.
//! The price is that handlers run after the trampoline has returned.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchStats, EdgeDispatcher};
use crate::engine::EdgeCallback;
use crate::pin::EdgeLevel;
use crate::tick::Tick;

/// One edge notification as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Raw pin number from the engine.
    pub pin: u32,
    /// Edge level.
    pub level: EdgeLevel,
    /// Engine tick of the edge.
    pub tick: Tick,
}

/// Bounded queue between the engine's monitor thread and the dispatcher.
pub struct EdgeQueue {
    tx: RwLock<Option<mpsc::Sender<EdgeEvent>>>,
    stats: Arc<DispatchStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EdgeQueue {
    /// Start the dispatch thread with room for `capacity` pending edges.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn(dispatcher: Arc<EdgeDispatcher>, capacity: usize) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::channel::<EdgeEvent>(capacity.max(1));
        let stats = Arc::clone(dispatcher.stats());

        let worker = thread::Builder::new()
            .name("edge-dispatch".into())
            .spawn(move || {
                info!("Edge dispatch thread started.");
                while let Some(event) = rx.blocking_recv() {
                    dispatcher.dispatch(event.pin, event.level, event.tick);
                }
                info!("Edge dispatch thread finished.");
            })?;

        Ok(EdgeQueue {
            tx: RwLock::new(Some(tx)),
            stats,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue an edge without blocking. Returns `false` if it was dropped.
    pub fn push(&self, event: EdgeEvent) -> bool {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            debug!(pin = event.pin, "Edge queue shut down, edge dropped");
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.stats.record_dropped();
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(pin = event.pin, level = %event.level, dropped, "Edge queue full, dropping edges");
                }
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(pin = event.pin, "Edge dispatch thread gone, edge dropped");
                false
            }
        }
    }

    /// Trampoline closure for [`crate::GpioEngine::register_edge_callback`].
    pub fn callback(self: &Arc<Self>) -> EdgeCallback {
        let queue = Arc::clone(self);
        Arc::new(move |pin, level, tick| {
            queue.push(EdgeEvent { pin, level, tick });
        })
    }

    /// Stop accepting edges, let the dispatch thread drain what is queued
    /// and wait for it to exit.
    pub fn shutdown(&self) {
        let tx = self.tx.write().take();
        drop(tx);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Edge dispatch thread panicked");
            }
        }
    }
}

impl Drop for EdgeQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
