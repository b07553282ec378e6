// Check-in event model and redundancy rules

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Kind of check-in signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInType {
    /// A scheduled unit of work started or finished
    Cron,
    /// A long-lived process is alive
    Heartbeat,
}

impl fmt::Display for CheckInType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckInType::Cron => write!(f, "cron"),
            CheckInType::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Which edge of a cron run an event marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Finish,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Start => write!(f, "start"),
            EventKind::Finish => write!(f, "finish"),
        }
    }
}

/// Immutable record of one check-in occurrence
///
/// `digest` and `kind` are present exactly when `check_in_type` is cron;
/// the constructors are the only way to build an event, which keeps that
/// invariant out of reach of callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    pub timestamp: i64,
    pub check_in_type: CheckInType,
}

impl Event {
    /// Create a cron check-in event
    pub fn cron(
        identifier: impl Into<String>,
        digest: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            digest: Some(digest.into()),
            kind: Some(kind),
            timestamp: Utc::now().timestamp(),
            check_in_type: CheckInType::Cron,
        }
    }

    /// Create a heartbeat check-in event
    pub fn heartbeat(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            digest: None,
            kind: None,
            timestamp: Utc::now().timestamp(),
            check_in_type: CheckInType::Heartbeat,
        }
    }

    /// Whether `other` describes the same logical occurrence as `self`
    ///
    /// Heartbeats match on type and identifier alone; cron events must
    /// also share digest and kind. Redundant pairs collapse to the newest.
    pub fn redundant(&self, other: &Event) -> bool {
        if other.check_in_type != self.check_in_type || other.identifier != self.identifier {
            return false;
        }

        if self.check_in_type == CheckInType::Cron
            && (other.digest != self.digest || other.kind != self.kind)
        {
            return false;
        }

        true
    }

    /// Human-readable description of a batch, used only in log lines
    pub fn describe(events: &[Event]) -> String {
        match events {
            [] => "no check-in events".to_string(),
            [event] => match event.check_in_type {
                CheckInType::Cron => format!(
                    "cron check-in `{}` {} event (digest {})",
                    event.identifier,
                    event
                        .kind
                        .map_or_else(|| "unknown".to_string(), |k| k.to_string()),
                    event.digest.as_deref().unwrap_or("unknown"),
                ),
                CheckInType::Heartbeat => {
                    format!("heartbeat check-in `{}` event", event.identifier)
                }
            },
            _ => format!("{} check-in events", events.len()),
        }
    }
}

/// Remove redundant *pairs* of cron check-in events from a batch
///
/// For each identifier, a digest with both a start and a finish event is a
/// complete pair. Only one complete pair per identifier is worth sending —
/// the last one seen — so all events belonging to the other complete pairs
/// are dropped. Unpaired events, heartbeats, and cron events without a
/// kind are always kept.
///
/// Assumes `Event::redundant`-based coalescing already removed events that
/// are functionally identical.
pub fn deduplicate_cron(events: &mut Vec<Event>) {
    let mut start_digests: HashMap<String, HashSet<String>> = HashMap::new();
    let mut finish_digests: HashMap<String, HashSet<String>> = HashMap::new();
    let mut complete_digests: HashMap<String, HashSet<String>> = HashMap::new();
    let mut keep_digest: HashMap<String, String> = HashMap::new();

    // Compute the digests that have both edges, remembering the last seen
    // complete digest per identifier as the one to keep.
    for event in events.iter() {
        if event.check_in_type != CheckInType::Cron {
            continue;
        }
        let (Some(digest), Some(kind)) = (&event.digest, event.kind) else {
            continue;
        };

        let (own, other) = match kind {
            EventKind::Start => (&mut start_digests, &finish_digests),
            EventKind::Finish => (&mut finish_digests, &start_digests),
        };

        own.entry(event.identifier.clone())
            .or_default()
            .insert(digest.clone());

        if other
            .get(&event.identifier)
            .is_some_and(|digests| digests.contains(digest))
        {
            complete_digests
                .entry(event.identifier.clone())
                .or_default()
                .insert(digest.clone());
            keep_digest.insert(event.identifier.clone(), digest.clone());
        }
    }

    events.retain(|event| {
        if event.check_in_type != CheckInType::Cron {
            return true;
        }
        let (Some(digest), Some(_)) = (&event.digest, event.kind) else {
            return true;
        };

        let complete = complete_digests
            .get(&event.identifier)
            .is_some_and(|digests| digests.contains(digest));
        let kept = keep_digest
            .get(&event.identifier)
            .is_some_and(|kept| kept == digest);

        !complete || kept
    });
}
