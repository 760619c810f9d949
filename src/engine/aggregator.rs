// src/engine/aggregator.rs

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::engine::scorer::IntegrityPolicy;
use crate::models::integrity::EventKind;
use crate::models::session::SessionId;

/// Admission decision for one raw signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Opens a fresh debounce window; the event feeds the scorer.
    Effective,
    /// Absorbed into the current window; logged for audit, score-inert.
    /// `repeats` is the number of raw signals the window has seen so far.
    Coalesced { repeats: u32 },
}

#[derive(Debug, Clone, Copy)]
struct DebounceSlot {
    window_opened: DateTime<Utc>,
    repeats: u32,
}

/// Converts raw client/proctor signals into normalized events.
///
/// Rapid repeats of the same kind within the debounce window collapse into
/// the window-opening event instead of flooding the scorer. State is bounded:
/// one slot per (session, kind), evicted when the session terminates. The
/// window is anchored at the opening event, so a sustained burst still
/// produces one effective event per window length rather than being absorbed
/// forever.
#[derive(Debug, Default)]
pub struct EvidenceAggregator {
    windows: Mutex<HashMap<SessionId, HashMap<EventKind, DebounceSlot>>>,
}

impl EvidenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one raw signal against the session's debounce state.
    /// Duplicate deliveries from the at-least-once event feed land in the
    /// same window and are absorbed here.
    pub fn admit(
        &self,
        policy: &IntegrityPolicy,
        session_id: SessionId,
        kind: EventKind,
        timestamp: DateTime<Utc>,
    ) -> Admission {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let slots = windows.entry(session_id).or_default();
        match slots.get_mut(&kind) {
            Some(slot)
                if (timestamp - slot.window_opened).num_milliseconds().abs()
                    < policy.debounce_window_ms =>
            {
                slot.repeats += 1;
                Admission::Coalesced { repeats: slot.repeats }
            }
            _ => {
                slots.insert(
                    kind,
                    DebounceSlot {
                        window_opened: timestamp,
                        repeats: 1,
                    },
                );
                Admission::Effective
            }
        }
    }

    /// Drops all debounce state for a session. Called on terminal
    /// transitions; late events then simply open fresh (inert) windows.
    pub fn evict(&self, session_id: SessionId) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(&session_id);
    }
}
