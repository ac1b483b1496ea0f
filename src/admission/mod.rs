//! Admission control for the device enrollment queue.
//!
//! Enrollment against the biometric terminal is slow (tens of seconds per
//! person), so submissions pass through a bounded queue before any device
//! work is committed. The controller tracks queue positions, keeps a moving
//! average of observed processing times for wait estimates, and classifies
//! system load.
//!
//! The one hard gate is `max_queue_size`; everything else (status,
//! recommended action) is advisory and never blocks admission. That split
//! bounds memory and device work under extreme load without false-rejecting
//! ordinary bursts.
//!
//! The controller is an explicitly constructed instance owned by the
//! composition root — construct one per test, share one per process.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// How an enrollment request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentKind {
    /// One employee enrolled by an administrator.
    Single,
    /// Part of a bulk import.
    Bulk,
    /// Self-enrollment from the public kiosk flow.
    Public,
}

/// Load classification of the enrollment queue, by queue size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Idle,
    Normal,
    Busy,
    HeavyLoad,
    Overloaded,
}

impl QueueStatus {
    fn for_size(size: usize) -> Self {
        match size {
            0 => QueueStatus::Idle,
            1..=5 => QueueStatus::Normal,
            6..=20 => QueueStatus::Busy,
            21..=50 => QueueStatus::HeavyLoad,
            _ => QueueStatus::Overloaded,
        }
    }
}

/// Configuration for the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Hard capacity ceiling. Submissions at or beyond this size fail with
    /// `QueueFull`.
    pub max_queue_size: usize,

    /// Assumed processing time before any real sample has been recorded.
    pub default_processing_ms: u64,

    /// Number of trailing duration samples kept for the moving average.
    pub sample_window: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 150,
            default_processing_ms: 45_000,
            sample_window: 10,
        }
    }
}

/// Result of admitting a request into the queue.
#[derive(Debug, Clone)]
pub struct Admission {
    /// 1-based position at admission time.
    pub position: usize,
    pub queue_size: usize,
    pub estimated_wait_seconds: u64,
    pub estimated_wait_minutes: u64,
    /// Human guidance for the submitting user.
    pub message: String,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub size: usize,
    /// Moving average of processing time, whole seconds (rounded up).
    pub average_processing_seconds: u64,
    pub total_processed: u64,
    pub is_busy: bool,
    pub is_overloaded: bool,
    pub status: QueueStatus,
}

/// Advisory guidance derived from the current load. `can_proceed` is always
/// true: the advisory escalates urgency but never gates admission.
#[derive(Debug, Clone)]
pub struct RecommendedAction {
    pub can_proceed: bool,
    pub message: String,
    pub suggest_later: bool,
    /// Rough whole-queue drain estimate in minutes; only populated once the
    /// queue is under heavy load.
    pub estimated_wait_minutes: Option<u64>,
}

#[derive(Debug)]
struct QueueEntry {
    id: Uuid,
    #[allow(dead_code)] // Kept for queue introspection/diagnostics.
    kind: EnrollmentKind,
    #[allow(dead_code)]
    submitted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<QueueEntry>,
    samples: VecDeque<u64>,
    average_ms: f64,
    total_processed: u64,
}

/// Bounds and estimates concurrent enrollment work.
///
/// All mutation goes through one internal mutex (single-writer discipline);
/// no operation does blocking I/O while holding it.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<QueueState>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let average_ms = config.default_processing_ms as f64;
        Self {
            config,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                samples: VecDeque::new(),
                average_ms,
                total_processed: 0,
            }),
        }
    }

    /// Admit a request, or fail with `QueueFull` at capacity. Failure
    /// mutates nothing.
    pub fn submit(&self, id: Uuid, kind: EnrollmentKind) -> Result<Admission> {
        let mut state = self.state.lock();

        if state.queue.len() >= self.config.max_queue_size {
            tracing::warn!(
                queue_size = state.queue.len(),
                max = self.config.max_queue_size,
                "Enrollment queue full, rejecting submission"
            );
            return Err(Error::QueueFull {
                size: state.queue.len(),
                max: self.config.max_queue_size,
            });
        }

        state.queue.push_back(QueueEntry {
            id,
            kind,
            submitted_at: Utc::now(),
        });

        let position = state.queue.len();
        let wait_seconds = estimate_wait(position, state.average_ms);

        tracing::debug!(
            request_id = %id,
            position,
            wait_seconds,
            "Enrollment admitted to queue"
        );

        Ok(Admission {
            position,
            queue_size: position,
            estimated_wait_seconds: wait_seconds,
            estimated_wait_minutes: wait_seconds.div_ceil(60),
            message: position_message(position),
        })
    }

    /// Remove a finished request and advance the processed counter. No-op
    /// (returning false) when the id is not queued.
    pub fn complete(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.queue.iter().position(|entry| entry.id == id) {
            Some(index) => {
                state.queue.remove(index);
                state.total_processed += 1;
                true
            }
            None => false,
        }
    }

    /// Withdraw a request that has not been processed. Unlike `complete`,
    /// this does not count toward the processed total.
    pub fn withdraw(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.queue.iter().position(|entry| entry.id == id) {
            Some(index) => {
                state.queue.remove(index);
                tracing::debug!(request_id = %id, "Enrollment withdrawn from queue");
                true
            }
            None => false,
        }
    }

    /// Record an observed processing duration. Only the most recent
    /// `sample_window` samples influence the moving average; older ones
    /// drop off FIFO.
    pub fn record_duration(&self, duration_ms: u64) {
        let mut state = self.state.lock();
        state.samples.push_back(duration_ms);
        while state.samples.len() > self.config.sample_window {
            state.samples.pop_front();
        }
        let sum: u64 = state.samples.iter().sum();
        state.average_ms = sum as f64 / state.samples.len() as f64;
    }

    /// Estimated wait in whole seconds for a queue position. Position 1 is
    /// already being processed, so it (and anything below) waits zero.
    pub fn estimated_wait_seconds(&self, position: usize) -> u64 {
        estimate_wait(position, self.state.lock().average_ms)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let size = state.queue.len();
        QueueStats {
            size,
            average_processing_seconds: (state.average_ms / 1000.0).ceil() as u64,
            total_processed: state.total_processed,
            is_busy: size > 10,
            is_overloaded: size > 50,
            status: QueueStatus::for_size(size),
        }
    }

    /// Advisory guidance for a prospective submitter. Escalates with load
    /// but never blocks; the only hard gate is `max_queue_size` in
    /// `submit`.
    pub fn recommended_action(&self) -> RecommendedAction {
        let state = self.state.lock();
        let size = state.queue.len();
        let drain_minutes = ((size as f64 * state.average_ms) / 60_000.0).ceil() as u64;

        match size {
            0..=5 => RecommendedAction {
                can_proceed: true,
                message: "System is ready. You can proceed with enrollment.".to_string(),
                suggest_later: false,
                estimated_wait_minutes: None,
            },
            6..=20 => RecommendedAction {
                can_proceed: true,
                message: "System is busy. Enrollment may take a few minutes.".to_string(),
                suggest_later: false,
                estimated_wait_minutes: None,
            },
            21..=50 => RecommendedAction {
                can_proceed: true,
                message:
                    "System under heavy load. Consider trying again later for faster service."
                        .to_string(),
                suggest_later: true,
                estimated_wait_minutes: Some(drain_minutes),
            },
            _ => RecommendedAction {
                can_proceed: true,
                message: "System is overloaded. We recommend trying again in 30-60 minutes."
                    .to_string(),
                suggest_later: true,
                estimated_wait_minutes: Some(drain_minutes),
            },
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

fn estimate_wait(position: usize, average_ms: f64) -> u64 {
    if position <= 1 {
        return 0;
    }
    let ahead = (position - 1) as f64;
    ((ahead * average_ms) / 1000.0).ceil() as u64
}

fn position_message(position: usize) -> String {
    match position {
        1 => "Processing your enrollment now...".to_string(),
        2..=5 => {
            let ahead = position - 1;
            let noun = if ahead == 1 { "person" } else { "people" };
            format!("You're next in line! {ahead} {noun} ahead.")
        }
        6..=20 => format!("Please wait. {} enrollments ahead of you.", position - 1),
        _ => format!(
            "High demand detected. {} enrollments in queue. Please be patient.",
            position - 1
        ),
    }
}
