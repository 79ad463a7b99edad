//! Read-side analysis over recorded events: anomaly rules and aggregate counts.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::event::{Event, EventType};

/// Severity attached to a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Medium,
    High,
    Critical,
}

/// One rule that fired inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Rule name, e.g. `high_failure_rate`.
    pub kind: String,
    pub severity: AnomalySeverity,
    /// Matching events inside the window.
    pub count: usize,
    pub description: String,
}

/// Result of [`EventStore::detect_anomalies`](crate::EventStore::detect_anomalies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub window_minutes: i64,
    /// Events inside the window, all types.
    pub total_events: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    /// Returns the anomaly reported under `kind`, if any.
    pub fn find(&self, kind: &str) -> Option<&Anomaly> {
        self.anomalies.iter().find(|a| a.kind == kind)
    }

    /// True if no rule fired.
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_module: BTreeMap<String, usize>,
    /// Keyed by `%Y-%m-%d %H:00` (UTC).
    pub events_by_hour: BTreeMap<String, usize>,
}

struct Rule {
    event_type: EventType,
    /// Fires when the count is strictly greater.
    threshold: usize,
    kind: &'static str,
    severity: AnomalySeverity,
    noun: &'static str,
}

const RULES: [Rule; 3] = [
    Rule {
        event_type: EventType::CircuitFailure,
        threshold: 5,
        kind: "high_failure_rate",
        severity: AnomalySeverity::High,
        noun: "circuit failures",
    },
    Rule {
        event_type: EventType::SystemError,
        threshold: 2,
        kind: "system_errors",
        severity: AnomalySeverity::Critical,
        noun: "system errors",
    },
    Rule {
        event_type: EventType::ContradictionDetected,
        threshold: 3,
        kind: "high_contradictions",
        severity: AnomalySeverity::Medium,
        noun: "contradictions",
    },
];

pub(crate) fn detect(events: &[Event], window_minutes: i64, now: DateTime<Utc>) -> AnomalyReport {
    // A window reaching past the representable range covers the whole history.
    let since = TimeDelta::try_minutes(window_minutes)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut counts: BTreeMap<EventType, usize> = BTreeMap::new();
    let mut total_events = 0;

    for ev in events.iter().filter(|e| e.timestamp >= since) {
        total_events += 1;
        *counts.entry(ev.event_type).or_default() += 1;
    }

    let anomalies = RULES
        .iter()
        .filter_map(|rule| {
            let count = counts.get(&rule.event_type).copied().unwrap_or(0);
            (count > rule.threshold).then(|| Anomaly {
                kind: rule.kind.to_string(),
                severity: rule.severity,
                count,
                description: format!(
                    "{count} {} in the last {window_minutes} minutes (threshold {})",
                    rule.noun, rule.threshold
                ),
            })
        })
        .collect();

    AnomalyReport {
        window_minutes,
        total_events,
        anomalies,
    }
}

pub(crate) fn summarize(events: &[Event]) -> Analytics {
    let mut out = Analytics {
        total_events: events.len(),
        ..Analytics::default()
    };
    for ev in events {
        *out.events_by_type.entry(ev.event_type.to_string()).or_default() += 1;
        *out.events_by_module.entry(ev.module.clone()).or_default() += 1;
        let hour = ev.timestamp.format("%Y-%m-%d %H:00").to_string();
        *out.events_by_hour.entry(hour).or_default() += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(seq: u64, t: EventType, module: &str, ts: DateTime<Utc>) -> Event {
        let mut ev = Event::record(seq, t, module, json!({}), None);
        ev.timestamp = ts;
        ev
    }

    #[test]
    fn test_events_outside_window_are_ignored() {
        let now = Utc::now();
        let mut events: Vec<Event> = (0..10)
            .map(|i| at(i, EventType::CircuitFailure, "m", now - TimeDelta::minutes(90)))
            .collect();
        events.push(at(10, EventType::CircuitFailure, "m", now));

        let report = detect(&events, 60, now);
        assert_eq!(report.total_events, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_unbounded_window_covers_whole_history() {
        let now = Utc::now();
        let events: Vec<Event> = (0..3)
            .map(|i| at(i, EventType::SystemError, "m", now - TimeDelta::days(3650)))
            .collect();

        for window in [i64::MAX, 200_000_000_000, 60 * 24 * 3651] {
            let report = detect(&events, window, now);
            assert_eq!(report.total_events, 3, "window {window}");
            assert_eq!(report.find("system_errors").map(|a| a.count), Some(3));
        }
    }

    #[test]
    fn test_system_errors_and_contradictions() {
        let now = Utc::now();
        let mut events = Vec::new();
        for i in 0..3 {
            events.push(at(i, EventType::SystemError, "m", now));
        }
        for i in 3..7 {
            events.push(at(i, EventType::ContradictionDetected, "m", now));
        }

        let report = detect(&events, 60, now);
        let sys = report.find("system_errors").unwrap();
        assert_eq!(sys.severity, AnomalySeverity::Critical);
        assert_eq!(sys.count, 3);
        let con = report.find("high_contradictions").unwrap();
        assert_eq!(con.severity, AnomalySeverity::Medium);
        assert_eq!(con.count, 4);
        assert!(report.find("high_failure_rate").is_none());
    }

    #[test]
    fn test_summarize_buckets_by_hour() {
        let ts = DateTime::parse_from_rfc3339("2026-03-04T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let events = vec![
            at(1, EventType::DecisionMade, "a", ts),
            at(2, EventType::DecisionMade, "b", ts + TimeDelta::minutes(20)),
            at(3, EventType::SystemError, "a", ts + TimeDelta::hours(1)),
        ];
        let a = summarize(&events);
        assert_eq!(a.total_events, 3);
        assert_eq!(a.events_by_type["decision_made"], 2);
        assert_eq!(a.events_by_module["a"], 2);
        assert_eq!(a.events_by_hour["2026-03-04 10:00"], 2);
        assert_eq!(a.events_by_hour["2026-03-04 11:00"], 1);
    }
}
