// src/engine/scorer.rs

use std::collections::HashMap;

use crate::models::integrity::{
    EventDisposition, EventKind, IntegrityEvent, IntegrityLedger, MAX_SCORE_CENTI, Severity,
};

/// Tunable integrity policy. Defaults mirror the product policy: penalties
/// low=2.00 / medium=7.00 / high=20.00 points, repeat escalation of 1.5x per
/// occurrence starting at the 3rd of a kind, lockout below 20.00.
///
/// Penalties are held in centipoints; see `IntegrityLedger`.
#[derive(Debug, Clone)]
pub struct IntegrityPolicy {
    pub penalty_low_centi: u32,
    pub penalty_medium_centi: u32,
    pub penalty_high_centi: u32,
    /// Occurrences of a kind beyond this count escalate. With the default of
    /// 2, the 3rd occurrence gets one factor step, the 4th two, and so on.
    pub escalation_after: u32,
    pub escalation_factor: f64,
    pub lockout_floor_centi: u32,
    pub debounce_window_ms: i64,
    /// Per-kind overrides of the builtin severity table.
    pub severity_overrides: HashMap<EventKind, Severity>,
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        Self {
            penalty_low_centi: 200,
            penalty_medium_centi: 700,
            penalty_high_centi: 2000,
            escalation_after: 2,
            escalation_factor: 1.5,
            lockout_floor_centi: 2000,
            debounce_window_ms: 2000,
            severity_overrides: HashMap::new(),
        }
    }
}

impl IntegrityPolicy {
    /// Severity classification table, static except for configured overrides.
    pub fn classify(&self, kind: EventKind) -> Severity {
        if let Some(severity) = self.severity_overrides.get(&kind) {
            return *severity;
        }
        match kind {
            EventKind::TabSwitch => Severity::Medium,
            EventKind::FullscreenExit => Severity::Medium,
            EventKind::BlockedShortcut => Severity::Low,
            EventKind::CameraLoss => Severity::High,
            EventKind::AudioAnomaly => Severity::Medium,
            EventKind::FaceMismatch => Severity::High,
            EventKind::NetworkDrop => Severity::Low,
        }
    }

    fn base_penalty_centi(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Low => self.penalty_low_centi,
            Severity::Medium => self.penalty_medium_centi,
            Severity::High => self.penalty_high_centi,
        }
    }
}

/// Pure scoring function over a session's effective event multiset.
///
/// The score is a sum of per-event penalties. Each penalty depends only on
/// the event's severity and its occurrence index within its kind, so the
/// aggregate is commutative over the multiset of events: replaying the same
/// events in any arrival order yields the same final score. Rounding to
/// integer centipoints before subtraction keeps incremental updates and full
/// replay in exact agreement.
#[derive(Debug, Clone)]
pub struct IntegrityScorer {
    policy: IntegrityPolicy,
}

impl IntegrityScorer {
    pub fn new(policy: IntegrityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &IntegrityPolicy {
        &self.policy
    }

    /// Penalty for the `occurrence`-th effective event (1-based) of a kind
    /// with the given severity. Monotonic in the occurrence index; a single
    /// step is capped at the full score range.
    pub fn penalty_centi(&self, severity: Severity, occurrence: u32) -> u32 {
        let base = self.policy.base_penalty_centi(severity);
        let steps = occurrence.saturating_sub(self.policy.escalation_after);
        let scaled =
            (f64::from(base) * self.policy.escalation_factor.powi(steps as i32)).round();
        if scaled >= f64::from(MAX_SCORE_CENTI) {
            MAX_SCORE_CENTI
        } else {
            scaled as u32
        }
    }

    /// Applies one event to the ledger, returning the penalty that was
    /// charged. Only `Scored` events have any effect; coalesced and
    /// after-termination events are score-inert.
    pub fn apply(&self, ledger: &mut IntegrityLedger, event: &IntegrityEvent) -> u32 {
        if event.disposition != EventDisposition::Scored {
            return 0;
        }
        let count = ledger.kind_counts.entry(event.kind).or_insert(0);
        *count += 1;
        let penalty = self.penalty_centi(event.severity, *count);
        ledger.score_centi = ledger.score_centi.saturating_sub(penalty);
        penalty
    }

    /// Recomputes the ledger from scratch by replaying the full event log.
    /// Must agree exactly with the incrementally maintained ledger; audit
    /// tooling relies on this.
    pub fn replay(&self, events: &[IntegrityEvent]) -> IntegrityLedger {
        let mut ledger = IntegrityLedger::new();
        for event in events {
            self.apply(&mut ledger, event);
        }
        ledger
    }

    pub fn current_score(&self, ledger: &IntegrityLedger) -> f64 {
        ledger.score()
    }

    /// Whether committing `candidate` would push the session below the
    /// lockout floor. The state machine consults this before the event is
    /// committed so the lockout transition rides the same store update.
    pub fn would_lock_out(&self, ledger: &IntegrityLedger, candidate: &IntegrityEvent) -> bool {
        let mut probe = ledger.clone();
        self.apply(&mut probe, candidate);
        probe.score_centi < self.policy.lockout_floor_centi
    }
}
