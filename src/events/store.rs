//! # Append-only event store.
//!
//! [`EventStore`] is the one component every other part of the core writes to.
//! It keeps the full history in memory for queries and, when opened on a file,
//! mirrors it to a JSON Lines log (one [`Event`] per line).
//!
//! ## Write path
//! ```text
//! add(type, data, module, correlation)
//!   └─► lock ─► seq += 1 ─► Event::record ─► append line to log ─► push ─► Bus::publish ─► unlock
//! ```
//! Everything between lock and unlock is one sequence point: ids, the on-disk
//! order and the broadcast order agree even with concurrent writers.
//!
//! ## Retention
//! At most `max_events` events stay in memory; older ones are dropped as new
//! ones arrive and the sequence counter keeps counting. The log is compacted to
//! the retained window once it holds twice that many records.
//!
//! ## Failure policy
//! `add` never fails. A log write error is logged (`warn`) and the event is kept
//! in memory, so the supervisory loop is never blocked by persistence.
//! On open, corrupt lines are skipped and logged; the counter resumes after the
//! highest sequence found.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::analysis::{self, Analytics, AnomalyReport};
use super::bus::Bus;
use super::event::{Event, EventType};
use crate::config::EventStoreConfig;
use crate::error::StoreError;

/// Append-only, queryable event log.
#[derive(Debug)]
pub struct EventStore {
    inner: Mutex<Inner>,
    bus: Bus,
}

#[derive(Debug)]
struct Inner {
    counter: u64,
    events: Vec<Event>,
    log: Option<EventLog>,
    max_events: usize,
}

impl Inner {
    /// Drops the oldest events beyond `max_events`; returns how many went.
    fn enforce_retention(&mut self) -> usize {
        if self.max_events == 0 || self.events.len() <= self.max_events {
            return 0;
        }
        let excess = self.events.len() - self.max_events;
        self.events.drain(..excess);
        excess
    }
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    file: File,
    /// Records in the file, retained or not.
    records: usize,
}

impl EventLog {
    /// Reads any existing records and opens the file for appending.
    fn open(path: &Path) -> Result<(Self, Vec<Event>), StoreError> {
        let events = if path.exists() {
            scan(path)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            Vec::new()
        };
        let file = open_append(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                records: events.len(),
            },
            events,
        ))
    }

    fn append(&mut self, ev: &Event) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(ev)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.records += 1;
        Ok(())
    }

    /// Replaces the log with `events` (retention compaction).
    fn rewrite(&mut self, events: &[Event]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut body = Vec::new();
        for ev in events {
            serde_json::to_writer(&mut body, ev)?;
            body.push(b'\n');
        }
        fs::write(&tmp, body).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        self.file = open_append(&self.path)?;
        self.records = events.len();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file
            .flush()
            .and_then(|()| self.file.sync_data())
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))
}

fn scan(path: &Path) -> Result<Vec<Event>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "unreadable event record skipped");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(ev) => events.push(ev),
            Err(e) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "corrupt event record skipped");
            }
        }
    }
    events.sort_by_key(|e| e.seq);
    Ok(events)
}

impl EventStore {
    /// Creates a store that keeps events in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_parts(Vec::new(), None, &EventStoreConfig::default())
    }

    /// Opens (or creates) a JSON Lines log at `path`, replaying existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_config(&EventStoreConfig {
            path: Some(path.as_ref().to_path_buf()),
            ..EventStoreConfig::default()
        })
    }

    /// Builds a store from configuration (file-backed if `path` is set).
    pub fn from_config(cfg: &EventStoreConfig) -> Result<Self, StoreError> {
        match &cfg.path {
            Some(path) => {
                let (log, events) = EventLog::open(path)?;
                debug!(path = %path.display(), replayed = events.len(), "event log opened");
                Ok(Self::with_parts(events, Some(log), cfg))
            }
            None => Ok(Self::with_parts(Vec::new(), None, cfg)),
        }
    }

    fn with_parts(events: Vec<Event>, log: Option<EventLog>, cfg: &EventStoreConfig) -> Self {
        let counter = events.iter().map(|e| e.seq).max().unwrap_or(0);
        let mut inner = Inner {
            counter,
            events,
            log,
            max_events: cfg.max_events,
        };
        let dropped = inner.enforce_retention();
        if dropped > 0 {
            debug!(dropped, kept = inner.events.len(), "replayed events beyond retention dropped");
        }
        Self {
            inner: Mutex::new(inner),
            bus: Bus::new(cfg.bus_capacity_clamped()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event and returns its id. Never fails the caller.
    pub fn add(
        &self,
        event_type: EventType,
        data: Value,
        module: &str,
        correlation_id: Option<&str>,
    ) -> String {
        let mut inner = self.lock();
        inner.counter += 1;
        let ev = Event::record(inner.counter, event_type, module, data, correlation_id);

        if let Some(log) = inner.log.as_mut() {
            if let Err(e) = log.append(&ev) {
                warn!(event_id = %ev.id, error = %e, "event log append failed; kept in memory");
            }
        }

        let id = ev.id.clone();
        inner.events.push(ev.clone());
        if inner.enforce_retention() > 0 {
            let Inner {
                events,
                log,
                max_events,
                ..
            } = &mut *inner;
            if let Some(log) = log.as_mut().filter(|l| l.records >= 2 * *max_events) {
                if let Err(e) = log.rewrite(events) {
                    warn!(error = %e, "event log compaction failed");
                }
            }
        }
        self.bus.publish(ev);
        id
    }

    /// Looks up an event by id.
    pub fn get_by_id(&self, id: &str) -> Option<Event> {
        self.lock().events.iter().find(|e| e.id == id).cloned()
    }

    /// Events of one type, newest first, optionally limited to `timestamp >= since`.
    pub fn get_by_type(
        &self,
        event_type: EventType,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        self.newest_matching(limit, |e| {
            e.event_type == event_type && since.map_or(true, |s| e.timestamp >= s)
        })
    }

    /// Events emitted by one module, newest first.
    pub fn get_by_module(&self, module: &str, limit: usize) -> Vec<Event> {
        self.newest_matching(limit, |e| e.module == module)
    }

    /// The latest `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.newest_matching(limit, |_| true)
    }

    /// The latest `decision_made` events.
    pub fn decision_history(&self, limit: usize) -> Vec<Event> {
        self.get_by_type(EventType::DecisionMade, limit, None)
    }

    /// The latest events alerting subsystems react to (see [`EventType::is_health_signal`]).
    pub fn system_health_events(&self, limit: usize) -> Vec<Event> {
        self.newest_matching(limit, |e| e.event_type.is_health_signal())
    }

    fn newest_matching(&self, limit: usize, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.lock()
            .events
            .iter()
            .rev()
            .filter(|e| pred(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Evaluates the anomaly rules over the trailing `window_minutes`.
    pub fn detect_anomalies(&self, window_minutes: i64) -> AnomalyReport {
        let inner = self.lock();
        analysis::detect(&inner.events, window_minutes, Utc::now())
    }

    /// Aggregate counts by type, module and hour.
    pub fn analytics(&self) -> Analytics {
        analysis::summarize(&self.lock().events)
    }

    /// Removes events older than `days` and compacts the log. Returns the number removed.
    ///
    /// A cutoff before the representable time range removes nothing.
    pub fn clear_older_than(&self, days: i64) -> usize {
        let Some(cutoff) = TimeDelta::try_days(days).and_then(|d| Utc::now().checked_sub_signed(d)) else {
            debug!(days, "retention cutoff out of range; nothing removed");
            return 0;
        };
        let mut inner = self.lock();
        let before = inner.events.len();
        inner.events.retain(|e| e.timestamp >= cutoff);
        let deleted = before - inner.events.len();

        if deleted > 0 {
            let Inner { events, log, .. } = &mut *inner;
            if let Some(log) = log.as_mut() {
                if let Err(e) = log.rewrite(events) {
                    warn!(error = %e, "event log compaction failed");
                }
            }
        }
        debug!(deleted, days, "retention cleanup");
        deleted
    }

    /// Writes a self-describing snapshot for offline analysis. Returns the exported count.
    pub fn export(
        &self,
        path: impl AsRef<Path>,
        filter: Option<EventType>,
    ) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let events: Vec<Event> = self
            .lock()
            .events
            .iter()
            .filter(|e| filter.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect();

        let doc = json!({
            "export_timestamp": Utc::now(),
            "event_type_filter": filter.map_or("all", |t| t.as_str()),
            "total_events": events.len(),
            "events": events,
        });
        let body = serde_json::to_vec_pretty(&doc)?;
        fs::write(path, body).map_err(|e| StoreError::io(path, e))?;
        Ok(events.len())
    }

    /// Flushes and syncs the log file (no-op when in memory).
    pub fn flush(&self) -> Result<(), StoreError> {
        match self.lock().log.as_mut() {
            Some(log) => log.sync(),
            None => Ok(()),
        }
    }

    /// Receives every event appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// True if the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Location of the log file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().log.as_ref().map(|l| l.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_yield_unique_ordered_ids() {
        let store = Arc::new(EventStore::in_memory());
        let mut handles = Vec::new();
        for w in 0..8 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                (0..50)
                    .map(|i| s.add(EventType::DecisionMade, json!({ "i": i }), &format!("w{w}"), None))
                    .collect::<Vec<_>>()
            }));
        }
        let mut ids = HashSet::new();
        for h in handles {
            for id in h.await.unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 400);

        let recent = store.recent(400);
        assert_eq!(recent.len(), 400);
        assert!(recent.windows(2).all(|w| w[0].seq > w[1].seq));
        assert_eq!(recent[0].seq, 400);
    }

    #[test]
    fn test_queries_are_newest_first() {
        let store = EventStore::in_memory();
        let first = store.add(EventType::CircuitFailure, json!({}), "a", None);
        store.add(EventType::DecisionMade, json!({}), "b", Some("op-1"));
        let third = store.add(EventType::CircuitFailure, json!({}), "a", None);

        let failures = store.get_by_type(EventType::CircuitFailure, 10, None);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].id, third);
        assert_eq!(failures[1].id, first);

        let by_b = store.get_by_module("b", 10);
        assert_eq!(by_b[0].correlation_id.as_deref(), Some("op-1"));
        assert_eq!(store.get_by_id(&first).unwrap().module, "a");
        assert!(store.get_by_id("missing").is_none());
        assert_eq!(store.recent(1)[0].id, third);
    }

    #[test]
    fn test_since_filter() {
        let store = EventStore::in_memory();
        store.add(EventType::SystemError, json!({}), "a", None);
        let future = Utc::now() + TimeDelta::minutes(1);
        assert!(store.get_by_type(EventType::SystemError, 10, Some(future)).is_empty());
    }

    #[test]
    fn test_anomaly_threshold_is_strict() {
        let store = EventStore::in_memory();
        for _ in 0..5 {
            store.add(EventType::CircuitFailure, json!({}), "m", None);
        }
        assert!(store.detect_anomalies(60).find("high_failure_rate").is_none());

        store.add(EventType::CircuitFailure, json!({}), "m", None);
        let report = store.detect_anomalies(60);
        let a = report.find("high_failure_rate").unwrap();
        assert_eq!(a.count, 6);
        assert_eq!(a.severity, crate::events::AnomalySeverity::High);
        assert_eq!(report.total_events, 6);
    }

    #[test]
    fn test_reopen_replays_and_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        {
            let store = EventStore::open(&path).unwrap();
            store.add(EventType::StateChange, json!({ "to": "open" }), "alpha", None);
            store.add(EventType::CallBlocked, json!({}), "alpha", None);
            store.flush().unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{ this is not an event\n").unwrap();
        drop(f);

        let store = EventStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        let id = store.add(EventType::ManualReset, json!({}), "alpha", None);
        assert_eq!(id, "alpha_manual_reset_3");
    }

    #[test]
    fn test_clear_older_than_compacts_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut old = Event::record(1, EventType::DecisionMade, "a", json!({}), None);
        old.timestamp = Utc::now() - TimeDelta::days(45);
        let fresh = Event::record(2, EventType::DecisionMade, "a", json!({}), None);
        let mut body = serde_json::to_string(&old).unwrap();
        body.push('\n');
        body.push_str(&serde_json::to_string(&fresh).unwrap());
        body.push('\n');
        fs::write(&path, body).unwrap();

        let store = EventStore::open(&path).unwrap();
        assert_eq!(store.clear_older_than(30), 1);
        assert_eq!(store.len(), 1);
        drop(store);

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.recent(1)[0].seq, 2);
    }

    #[test]
    fn test_out_of_range_windows_keep_history() {
        let store = EventStore::in_memory();
        store.add(EventType::SystemError, json!({}), "a", None);

        assert_eq!(store.detect_anomalies(i64::MAX).total_events, 1);
        assert_eq!(store.clear_older_than(200_000_000), 0);
        assert_eq!(store.clear_older_than(i64::MAX), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retention_drops_oldest_and_compacts_log() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EventStoreConfig {
            path: Some(dir.path().join("events.jsonl")),
            max_events: 3,
            ..EventStoreConfig::default()
        };
        let store = EventStore::from_config(&cfg).unwrap();
        for i in 0..7 {
            store.add(EventType::DecisionMade, json!({ "i": i }), "a", None);
        }
        assert_eq!(store.len(), 3);
        let seqs: Vec<u64> = store.recent(10).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![7, 6, 5]);
        assert!(store.get_by_id("a_decision_made_1").is_none());
        drop(store);

        let lines = fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert!(lines.lines().count() < 7);

        let reopened = EventStore::from_config(&cfg).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.add(EventType::ManualReset, json!({}), "a", None), "a_manual_reset_8");
        assert_eq!(reopened.recent(10).last().map(|e| e.seq), Some(6));
    }

    #[test]
    fn test_export_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("export.json");
        let store = EventStore::in_memory();
        store.add(EventType::SystemError, json!({}), "a", None);
        store.add(EventType::DecisionMade, json!({}), "a", None);

        assert_eq!(store.export(&out, Some(EventType::SystemError)).unwrap(), 1);
        let doc: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(doc["event_type_filter"], "system_error");
        assert_eq!(doc["total_events"], 1);
        assert!(doc["export_timestamp"].is_string());

        assert_eq!(store.export(&out, None).unwrap(), 2);
        let doc: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(doc["event_type_filter"], "all");
    }

    #[tokio::test]
    async fn test_subscribers_see_appended_events() {
        let store = EventStore::in_memory();
        let mut rx = store.subscribe();
        let id = store.add(EventType::ThresholdAdjusted, json!({ "threshold": 3 }), "tuner", None);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.id, id);
    }
}
