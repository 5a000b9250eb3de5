//! Transactional outbox - write-behind event queue
//!
//! The fabric never writes across tiers directly; every cross-tier effect is
//! an event drained by a background processor. Handler outcomes are a tagged
//! result (`Applied | Retry | DeadLetter`), so retry policy is explicit and
//! testable rather than exception-driven.
//!
//! Conservation invariant: the union of pending, retry, dead-letter and
//! processed is exactly the set of events ever enqueued. Events are
//! idempotent by id; re-enqueueing an id with a different payload is an
//! invariant violation.
//!
//! Ordering: per-key events apply in enqueue order. A failed event returns
//! to the retry queue, which drains before pending, and a failure ends the
//! current drain pass so no later event for the same key can overtake it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Attempts before an event is moved to dead-letter
pub const MAX_RETRIES: u32 = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Outbox error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// Same event id re-enqueued with a different payload
    #[error("Duplicate event id {0} with differing payload")]
    DuplicatePayload(Uuid),
    /// IO error on the append-only log
    #[error("Outbox log error: {0}")]
    Io(#[from] std::io::Error),
    /// Event (de)serialization error
    #[error("Outbox codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Lock poisoned by a panicking holder
    #[error("Outbox lock poisoned")]
    LockPoisoned,
}

/// Outbox result type
pub type Result<T> = std::result::Result<T, OutboxError>;

// ============================================================================
// EVENTS
// ============================================================================

/// Cross-tier operations carried by outbox events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxOperation {
    /// Replicate a cache write to the durable tier
    Store,
    /// Move an entry toward a faster tier
    Promote,
    /// Remove a key from the durable tier
    Invalidate,
}

/// Event lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Waiting in the pending or retry queue
    Pending,
    /// Applied successfully
    Processed,
    /// Terminally failed (dead-letter)
    Failed,
}

/// A write-behind event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Unique event id; idempotency key
    pub id: Uuid,
    /// Cross-tier operation
    pub operation: OutboxOperation,
    /// Operation payload; must carry a `key` field
    pub payload: serde_json::Value,
    /// Enqueue timestamp
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Failed attempts so far
    pub retry_count: u32,
}

impl OutboxEvent {
    /// Create a pending event with a fresh id
    pub fn new(operation: OutboxOperation, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            payload,
            timestamp: Utc::now(),
            status: EventStatus::Pending,
            retry_count: 0,
        }
    }

    /// The cache key this event concerns, when the payload carries one
    pub fn key(&self) -> Option<&str> {
        self.payload.get("key").and_then(|k| k.as_str())
    }
}

/// Handler verdict for one event application
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// Event applied; mark processed
    Applied,
    /// Transient failure; schedule a retry
    Retry(String),
    /// Unrecoverable; skip retries and dead-letter immediately
    DeadLetter(String),
}

// ============================================================================
// QUEUE DEPTHS AND DRAIN REPORTS
// ============================================================================

/// Snapshot of queue depths
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxDepths {
    /// Events waiting for a first attempt
    pub pending: usize,
    /// Events waiting for a re-attempt
    pub retry: usize,
    /// Terminally failed events
    pub dead_letter: usize,
    /// Successfully applied events
    pub processed: usize,
}

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    /// Events applied this pass
    pub applied: usize,
    /// Events rescheduled onto the retry queue
    pub retried: usize,
    /// Events moved to dead-letter
    pub dead_lettered: usize,
}

// ============================================================================
// OUTBOX
// ============================================================================

#[derive(Default)]
struct OutboxState {
    pending: VecDeque<OutboxEvent>,
    retry: VecDeque<OutboxEvent>,
    dead_letter: Vec<OutboxEvent>,
    processed: HashMap<Uuid, OutboxEvent>,
    /// Fingerprint of every payload ever enqueued, by id
    fingerprints: HashMap<Uuid, u64>,
    last_drain_at: Option<DateTime<Utc>>,
}

/// Write-behind queue with an append-only JSON-lines log
pub struct Outbox {
    state: Mutex<OutboxState>,
    log: Mutex<File>,
}

fn fingerprint(payload: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.to_string().hash(&mut hasher);
    hasher.finish()
}

#[derive(Serialize)]
struct LogLine<'a> {
    at: DateTime<Utc>,
    entry: &'a str,
    event: &'a OutboxEvent,
}

impl Outbox {
    /// Open the outbox, appending to the log at `log_path`
    pub fn open(log_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = log_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            state: Mutex::new(OutboxState::default()),
            log: Mutex::new(log),
        })
    }

    fn append_log(&self, entry: &str, event: &OutboxEvent) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| OutboxError::LockPoisoned)?;
        let line = serde_json::to_string(&LogLine {
            at: Utc::now(),
            entry,
            event,
        })?;
        writeln!(log, "{line}")?;
        Ok(())
    }

    /// Enqueue a fresh event; returns its id
    pub fn enqueue(
        &self,
        operation: OutboxOperation,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        self.enqueue_event(OutboxEvent::new(operation, payload))
    }

    /// Enqueue a pre-built event (idempotent by id)
    pub fn enqueue_event(&self, event: OutboxEvent) -> Result<Uuid> {
        let print = fingerprint(&event.payload);
        {
            let mut state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
            if let Some(existing) = state.fingerprints.get(&event.id) {
                if *existing != print {
                    return Err(OutboxError::DuplicatePayload(event.id));
                }
                // Same id, same payload: idempotent no-op
                return Ok(event.id);
            }
            state.fingerprints.insert(event.id, print);
            state.pending.push_back(event.clone());
        }
        self.append_log("enqueued", &event)?;
        Ok(event.id)
    }

    /// Drain queued events through `handler` until the queues are empty or
    /// a transient failure ends the pass (per-key ordering guarantee).
    pub fn drain_once<F>(&self, mut handler: F) -> Result<DrainReport>
    where
        F: FnMut(&OutboxEvent) -> ApplyOutcome,
    {
        let mut report = DrainReport::default();

        loop {
            // Pop under the lock, apply outside it: handlers take tier locks
            // and the lock order puts the outbox last.
            let event = {
                let mut state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
                state.retry.pop_front().or_else(|| state.pending.pop_front())
            };

            let Some(mut event) = event else {
                break;
            };

            let outcome = handler(&event);

            let mut state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
            match outcome {
                ApplyOutcome::Applied => {
                    event.status = EventStatus::Processed;
                    state.processed.insert(event.id, event.clone());
                    drop(state);
                    report.applied += 1;
                    self.append_log("processed", &event)?;
                }
                ApplyOutcome::Retry(reason) => {
                    event.retry_count += 1;
                    if event.retry_count < MAX_RETRIES {
                        tracing::warn!(
                            event_id = %event.id,
                            retry_count = event.retry_count,
                            %reason,
                            "Outbox event failed; scheduling retry"
                        );
                        state.retry.push_back(event);
                        drop(state);
                        report.retried += 1;
                    } else {
                        tracing::error!(
                            event_id = %event.id,
                            %reason,
                            "Outbox event exhausted retries; moving to dead-letter"
                        );
                        event.status = EventStatus::Failed;
                        state.dead_letter.push(event.clone());
                        drop(state);
                        report.dead_lettered += 1;
                        self.append_log("dead_letter", &event)?;
                    }
                    // Stop the pass so later events for the same key cannot
                    // overtake a retrying one.
                    break;
                }
                ApplyOutcome::DeadLetter(reason) => {
                    tracing::error!(event_id = %event.id, %reason, "Outbox event dead-lettered");
                    event.status = EventStatus::Failed;
                    state.dead_letter.push(event.clone());
                    drop(state);
                    report.dead_lettered += 1;
                    self.append_log("dead_letter", &event)?;
                }
            }
        }

        let mut state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
        state.last_drain_at = Some(Utc::now());
        Ok(report)
    }

    /// Queue depth snapshot
    pub fn depths(&self) -> Result<OutboxDepths> {
        let state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
        Ok(OutboxDepths {
            pending: state.pending.len(),
            retry: state.retry.len(),
            dead_letter: state.dead_letter.len(),
            processed: state.processed.len(),
        })
    }

    /// Where an event currently lives, with its retry count
    pub fn locate(&self, id: Uuid) -> Result<Option<(EventStatus, u32, bool)>> {
        let state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;

        if let Some(e) = state.processed.get(&id) {
            return Ok(Some((EventStatus::Processed, e.retry_count, false)));
        }
        if let Some(e) = state.dead_letter.iter().find(|e| e.id == id) {
            return Ok(Some((EventStatus::Failed, e.retry_count, true)));
        }
        if let Some(e) = state
            .pending
            .iter()
            .chain(state.retry.iter())
            .find(|e| e.id == id)
        {
            return Ok(Some((EventStatus::Pending, e.retry_count, false)));
        }
        Ok(None)
    }

    /// Seconds since the last completed drain pass; `None` before the first
    pub fn last_drain_age_secs(&self) -> Result<Option<f64>> {
        let state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
        Ok(state
            .last_drain_at
            .map(|at| (Utc::now() - at).num_milliseconds() as f64 / 1000.0))
    }

    /// Conservation audit: every enqueued id is in exactly one place
    pub fn audit_conservation(&self) -> Result<bool> {
        let state = self.state.lock().map_err(|_| OutboxError::LockPoisoned)?;
        let mut seen: HashMap<Uuid, usize> = HashMap::new();
        for e in state
            .pending
            .iter()
            .chain(state.retry.iter())
            .chain(state.dead_letter.iter())
            .chain(state.processed.values())
        {
            *seen.entry(e.id).or_default() += 1;
        }
        Ok(seen.len() == state.fingerprints.len() && seen.values().all(|&n| n == 1))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_outbox() -> (tempfile::TempDir, Outbox) {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().join("outbox.log")).unwrap();
        (dir, outbox)
    }

    fn payload(key: &str) -> serde_json::Value {
        serde_json::json!({ "key": key })
    }

    #[test]
    fn test_enqueue_and_apply() {
        let (_dir, outbox) = open_outbox();
        let id = outbox
            .enqueue(OutboxOperation::Store, payload("a"))
            .unwrap();

        let report = outbox.drain_once(|_| ApplyOutcome::Applied).unwrap();
        assert_eq!(report.applied, 1);

        let (status, retries, dead) = outbox.locate(id).unwrap().unwrap();
        assert_eq!(status, EventStatus::Processed);
        assert_eq!(retries, 0);
        assert!(!dead);
        assert!(outbox.audit_conservation().unwrap());
    }

    #[test]
    fn test_retry_to_dead_letter() {
        let (_dir, outbox) = open_outbox();
        let id = outbox
            .enqueue(OutboxOperation::Store, serde_json::json!({ "key": "p", "tag": "poison" }))
            .unwrap();

        // Each drain pass makes one failed attempt
        for expected_retries in 1..MAX_RETRIES {
            outbox
                .drain_once(|_| ApplyOutcome::Retry("poison".into()))
                .unwrap();
            let (status, retries, dead) = outbox.locate(id).unwrap().unwrap();
            assert_eq!(status, EventStatus::Pending);
            assert_eq!(retries, expected_retries);
            assert!(!dead);
        }

        outbox
            .drain_once(|_| ApplyOutcome::Retry("poison".into()))
            .unwrap();

        let (status, retries, dead) = outbox.locate(id).unwrap().unwrap();
        assert_eq!(status, EventStatus::Failed);
        assert_eq!(retries, MAX_RETRIES);
        assert!(dead);

        let depths = outbox.depths().unwrap();
        assert_eq!(depths.pending, 0);
        assert_eq!(depths.retry, 0);
        assert_eq!(depths.dead_letter, 1);
        assert!(outbox.audit_conservation().unwrap());
    }

    #[test]
    fn test_duplicate_id_same_payload_is_idempotent() {
        let (_dir, outbox) = open_outbox();
        let event = OutboxEvent::new(OutboxOperation::Invalidate, payload("k"));

        outbox.enqueue_event(event.clone()).unwrap();
        outbox.enqueue_event(event).unwrap();

        assert_eq!(outbox.depths().unwrap().pending, 1);
    }

    #[test]
    fn test_duplicate_id_differing_payload_is_violation() {
        let (_dir, outbox) = open_outbox();
        let event = OutboxEvent::new(OutboxOperation::Store, payload("k"));
        outbox.enqueue_event(event.clone()).unwrap();

        let mut tampered = event;
        tampered.payload = payload("other");
        assert!(matches!(
            outbox.enqueue_event(tampered),
            Err(OutboxError::DuplicatePayload(_))
        ));
    }

    #[test]
    fn test_failure_ends_pass_preserving_key_order() {
        let (_dir, outbox) = open_outbox();
        outbox.enqueue(OutboxOperation::Store, payload("k")).unwrap();
        outbox
            .enqueue(OutboxOperation::Promote, payload("k"))
            .unwrap();

        // First pass: the store fails, pass stops, promote untouched
        let report = outbox
            .drain_once(|e| match e.operation {
                OutboxOperation::Store => ApplyOutcome::Retry("transient".into()),
                _ => ApplyOutcome::Applied,
            })
            .unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.retried, 1);
        assert_eq!(outbox.depths().unwrap().pending, 1);

        // Second pass: retry queue drains first, order holds
        let mut order = Vec::new();
        outbox
            .drain_once(|e| {
                order.push(e.operation);
                ApplyOutcome::Applied
            })
            .unwrap();
        assert_eq!(order, vec![OutboxOperation::Store, OutboxOperation::Promote]);
    }

    #[test]
    fn test_immediate_dead_letter() {
        let (_dir, outbox) = open_outbox();
        let id = outbox
            .enqueue(OutboxOperation::Store, payload("k"))
            .unwrap();

        outbox
            .drain_once(|_| ApplyOutcome::DeadLetter("unknown key shape".into()))
            .unwrap();

        let (status, _, dead) = outbox.locate(id).unwrap().unwrap();
        assert_eq!(status, EventStatus::Failed);
        assert!(dead);
    }

    #[test]
    fn test_log_lines_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("outbox.log");
        let outbox = Outbox::open(&log_path).unwrap();

        outbox.enqueue(OutboxOperation::Store, payload("a")).unwrap();
        outbox.drain_once(|_| ApplyOutcome::Applied).unwrap();

        let raw = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("enqueued"));
        assert!(lines[1].contains("processed"));
    }
}
