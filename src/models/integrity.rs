// src/models/integrity.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw signal kinds reported by the exam client or the proctoring pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TabSwitch,
    FullscreenExit,
    BlockedShortcut,
    CameraLoss,
    AudioAnomaly,
    FaceMismatch,
    NetworkDrop,
}

/// Severity assigned to an event by the aggregator's classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Where the signal originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Client,
    ProctorAi,
}

/// What the engine did with a raw signal. Only `scored` events carry a
/// penalty; replaying the audit log skips the rest, which keeps replay in
/// exact agreement with the incrementally maintained ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// Opened a debounce window and was charged against the score.
    Scored,
    /// Absorbed into an earlier event's debounce window.
    Coalesced,
    /// Arrived after the session reached a terminal state; logged only.
    AfterTermination,
}

/// A normalized integrity event, as appended to the session's audit log.
///
/// Every raw signal is logged, including debounced and late ones; `repeats`
/// records how many raw signals the current debounce window has seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    pub source: EventSource,
    pub repeats: u32,
    pub disposition: EventDisposition,
}

/// Integrity scores are kept in centipoints so that incremental updates and
/// full-replay recomputation agree exactly regardless of event order.
pub const MAX_SCORE_CENTI: u32 = 10_000;

/// Incrementally maintained scorer state, persisted with the session.
///
/// `kind_counts` tracks effective (non-coalesced) occurrences per kind and
/// drives the repeat-escalation multiplier. Reproducible bit-for-bit by
/// replaying the event log through `IntegrityScorer::replay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityLedger {
    pub score_centi: u32,
    pub kind_counts: std::collections::HashMap<EventKind, u32>,
}

impl IntegrityLedger {
    pub fn new() -> Self {
        Self {
            score_centi: MAX_SCORE_CENTI,
            kind_counts: std::collections::HashMap::new(),
        }
    }

    /// Score on the public 0..=100 scale.
    pub fn score(&self) -> f64 {
        f64::from(self.score_centi) / 100.0
    }
}

impl Default for IntegrityLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// DTO for the proctor/client event feed.
#[derive(Debug, Deserialize)]
pub struct ReportEventRequest {
    pub kind: EventKind,
    pub source: EventSource,
    /// Client-reported occurrence time. Optional; the server clock is used
    /// when absent. Arrival order, not this timestamp, decides score order.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Response for an accepted event report.
#[derive(Debug, Serialize)]
pub struct ReportEventResponse {
    pub disposition: EventDisposition,
    pub integrity_score: f64,
    pub session_state: crate::models::session::SessionState,
}
