use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::orchestrator::{LoopState, Orchestrator};
use crate::breaker::CircuitBreaker;
use crate::config::{BreakerMode, OrchestratorConfig};
use crate::error::OrchestratorError;
use crate::events::EventStore;
use crate::persist::StoreRef;
use crate::recovery::ErrorRecoverySystem;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Name of the breaker used when every module shares one.
pub const SHARED_BREAKER: &str = "shared";

/// Builder for constructing an [`Orchestrator`] with optional collaborators.
pub struct OrchestratorBuilder {
    cfg: OrchestratorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    events: Option<Arc<EventStore>>,
    store: Option<StoreRef>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            events: None,
            store: None,
        }
    }

    /// Sets event subscribers (alerting, dashboards, reaction modules).
    ///
    /// Every event appended to the store is delivered to each subscriber through
    /// its own bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses an existing event store instead of building one from `cfg.events`.
    pub fn with_event_store(mut self, events: Arc<EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Persists breaker snapshots, recovery metrics and the status snapshot in `store`.
    pub fn with_store(mut self, store: StoreRef) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the orchestrator.
    ///
    /// Must be called from within a tokio runtime when subscribers are set.
    /// Fails only if the configured event log cannot be opened.
    pub fn build(self) -> Result<Arc<Orchestrator>, OrchestratorError> {
        let events = match self.events {
            Some(events) => events,
            None => Arc::new(EventStore::from_config(&self.cfg.events)?),
        };
        let shutdown = CancellationToken::new();

        let mut recovery = ErrorRecoverySystem::new(self.cfg.recovery.clone(), Arc::clone(&events))
            .with_cancellation(shutdown.child_token());
        if let Some(store) = &self.store {
            recovery = recovery.with_store(Arc::clone(store));
        }

        let shared_breaker = match self.cfg.breaker.mode {
            BreakerMode::PerModule => None,
            BreakerMode::Shared => {
                let breaker =
                    CircuitBreaker::new(SHARED_BREAKER, self.cfg.breaker.clone(), Arc::clone(&events));
                Some(Arc::new(match &self.store {
                    Some(store) => breaker.with_store(Arc::clone(store)),
                    None => breaker,
                }))
            }
        };

        let semaphore = self.cfg.concurrency_limit().map(Semaphore::new).map(Arc::new);
        let subs = Arc::new(SubscriberSet::new(self.subscribers));
        let listener = (!subs.is_empty()).then(|| subscriber_listener(&events, Arc::clone(&subs)));

        Ok(Arc::new(Orchestrator {
            cfg: self.cfg,
            events,
            store: self.store,
            recovery: Arc::new(recovery),
            shared_breaker,
            semaphore,
            subs,
            listener,
            modules: Mutex::new(Vec::new()),
            state: Mutex::new(LoopState::default()),
            cycle_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown,
            started_at: Utc::now(),
            started: Instant::now(),
        }))
    }
}

/// Task forwarding stored events to the subscriber set.
pub(super) struct Listener {
    handle: JoinHandle<()>,
    drain_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl Listener {
    /// Forwards the events published so far and waits until subscribers handled them.
    pub(super) async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.drain_tx.send(tx).is_ok() {
            let _ = rx.await;
        }
    }

    pub(super) fn abort(&self) {
        self.handle.abort();
    }
}

/// Forwards every stored event to the subscriber set (fire-and-forget).
fn subscriber_listener(events: &EventStore, set: Arc<SubscriberSet>) -> Listener {
    let mut rx = events.subscribe();
    let (drain_tx, mut drain_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(done) = drain_rx.recv() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => set.emit(&ev),
                            Err(TryRecvError::Lagged(skipped)) => {
                                warn!(skipped, "subscriber listener lagged; events dropped");
                            }
                            Err(_) => break,
                        }
                    }
                    set.flush().await;
                    let _ = done.send(());
                }
            }
        }
    });
    Listener { handle, drain_tx }
}
