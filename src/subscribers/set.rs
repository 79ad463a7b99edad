//! # SubscriberSet: non-blocking fan-out
//!
//! Distributes each [`Event`] to several subscribers without awaiting them.
//!
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO; no ordering across subscribers.
//! - Panics inside a subscriber are caught and logged; its worker keeps running.
//! - `flush()` waits until every event queued so far has been handled.
//!
//! ```text
//!    emit(&Event)
//!        ├──► [queue S1] ─► worker S1 ─► on_event()
//!        ├──► [queue S2] ─► worker S2 ─► on_event()
//!        └──► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::events::Event;

use super::Subscribe;

enum Message {
    Event(Arc<Event>),
    Flush(oneshot::Sender<()>),
}

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Message>,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Message>(sub.queue_capacity().max(1));

            let handle = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let ev = match msg {
                        Message::Event(ev) => ev,
                        Message::Flush(done) => {
                            let _ = done.send(());
                            continue;
                        }
                    };
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        error!(
                            subscriber = sub.name(),
                            event_id = %ev.id,
                            info = %crate::core::panic_message(panic.as_ref()),
                            "subscriber panicked"
                        );
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self { channels, workers }
    }

    /// Fan-out one event to all subscribers (non-blocking).
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            match channel.sender.try_send(Message::Event(Arc::clone(&ev))) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = channel.name, event_id = %ev.id, "event dropped: queue full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(subscriber = channel.name, event_id = %ev.id, "event dropped: worker closed");
                }
            }
        }
    }

    /// Waits until every subscriber has handled the events queued before this call.
    pub async fn flush(&self) {
        let pending = self.channels.iter().map(|channel| async move {
            let (tx, rx) = oneshot::channel();
            if channel.sender.send(Message::Flush(tx)).await.is_ok() {
                let _ = rx.await;
            }
        });
        join_all(pending).await;
    }

    /// Closes all queues and waits until workers drained them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
