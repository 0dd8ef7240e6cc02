//! Status source: owns the current snapshot and serializes re-reads.
//!
//! Reads run as spawned tasks and report back through a channel that the
//! daemon loop drains. Starting a new read aborts the one in flight and bumps
//! the generation counter, so a completion from an older read is discarded even
//! if it raced past the abort. Callers waiting on a superseded read are carried
//! over and answered by the read that replaced it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Status, StatusError};

/// Something that can produce a fresh [`Status`].
#[async_trait]
pub trait StatusBackend: Send + Sync {
    /// Short description for logs, e.g. the file path or tool name.
    fn describe(&self) -> String;

    /// Obtain a new snapshot.
    async fn load(&self) -> Result<Status, StatusError>;
}

/// Completion of a background read.
#[derive(Debug)]
pub struct StatusLoaded {
    generation: u64,
    result: Result<Status, StatusError>,
}

type Waiter = oneshot::Sender<Result<(), String>>;

/// A successful read. Its callers are answered by [`acknowledge`](Self::acknowledge)
/// once the snapshot has been applied.
#[derive(Debug)]
pub struct Refreshed {
    pub status: Status,
    waiters: Vec<Waiter>,
}

impl Refreshed {
    /// Answer every caller that waited for this read.
    pub fn acknowledge(self) {
        for waiter in self.waiters {
            let _ = waiter.send(Ok(()));
        }
    }
}

pub struct StatusSource {
    backend: Arc<dyn StatusBackend>,
    loaded_tx: mpsc::UnboundedSender<StatusLoaded>,
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
    waiters: Vec<Waiter>,
    current: Status,
}

impl StatusSource {
    /// Create a source and the receiver its background reads report to.
    pub fn new(backend: Arc<dyn StatusBackend>) -> (Self, mpsc::UnboundedReceiver<StatusLoaded>) {
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        let source = Self {
            backend,
            loaded_tx,
            generation: 0,
            in_flight: None,
            waiters: Vec::new(),
            current: Status::default(),
        };
        (source, loaded_rx)
    }

    /// The most recently applied snapshot.
    pub fn current(&self) -> &Status {
        &self.current
    }

    /// Read synchronously, used once at startup before the loop runs.
    ///
    /// On failure the error is logged and the empty, unattached status is kept.
    pub async fn load_initial(&mut self) -> Status {
        self.generation += 1;
        match self.backend.load().await {
            Ok(status) => {
                self.current = status.refreshed_at(Utc::now());
                info!(
                    source = %self.backend.describe(),
                    attached = self.current.attached,
                    services = self.current.services.len(),
                    "Loaded initial UA status"
                );
            }
            Err(e) => {
                warn!(source = %self.backend.describe(), error = %e, "Failed to load initial UA status");
            }
        }
        self.current.clone()
    }

    /// Start a new read, superseding any read still in flight.
    ///
    /// `respond_to` is answered exactly once, when the newest read completes.
    pub fn request(&mut self, respond_to: Option<Waiter>) {
        if let Some(waiter) = respond_to {
            self.waiters.push(waiter);
        }
        if let Some(handle) = self.in_flight.take() {
            debug!(generation = self.generation, "Cancelling in-flight status read");
            handle.abort();
        }

        self.generation += 1;
        let generation = self.generation;
        let backend = self.backend.clone();
        let loaded_tx = self.loaded_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = backend.load().await;
            let _ = loaded_tx.send(StatusLoaded { generation, result });
        }));
    }

    /// Apply a finished read.
    ///
    /// Returns the new snapshot when it should be reconciled. Stale completions
    /// and failed reads return `None` and leave the current snapshot untouched;
    /// callers of a failed read are answered right away.
    pub fn complete(&mut self, loaded: StatusLoaded) -> Option<Refreshed> {
        if loaded.generation != self.generation {
            debug!(
                generation = loaded.generation,
                current = self.generation,
                "Discarding stale status read"
            );
            return None;
        }
        self.in_flight = None;

        match loaded.result {
            Ok(status) => {
                self.current = status.refreshed_at(Utc::now());
                Some(Refreshed {
                    status: self.current.clone(),
                    waiters: std::mem::take(&mut self.waiters),
                })
            }
            Err(e) => {
                warn!(source = %self.backend.describe(), error = %e, "Failed to refresh UA status");
                let message = e.to_string();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(message.clone()));
                }
                None
            }
        }
    }
}

impl Drop for StatusSource {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}
