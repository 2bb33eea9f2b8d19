//! Broadcast fan-out with cooperative cancellation.
//!
//! One owner-initiated job fans a payload out to the known user population,
//! classifying each delivery outcome and pruning recipients the delivery
//! channel reports as gone. Cancellation is a flag polled between
//! recipients: the in-flight delivery completes, unprocessed recipients are
//! neither counted nor retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};
use crate::registry::AuthorizationRegistry;

/// Classified outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Success,
    /// The recipient blocked the delivery channel.
    Blocked,
    /// The recipient's account no longer exists.
    Deactivated,
    /// The channel throttled the send. Counted as a failure; the run does
    /// not pace itself or retry.
    RateLimited,
    OtherFailure(String),
}

/// Delivery capability consumed by the orchestrator. Implemented by the
/// transport layer; the core only classifies what it returns.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn send(&self, recipient_id: &str, payload: &str) -> DeliveryResult;
}

/// Immutable snapshot of a job, safe to poll while the loop runs.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub job_id: Uuid,
    pub initiator_id: String,
    /// Unix timestamp when the job started.
    pub started_at: i64,
    /// Recipient count fixed at start time.
    pub target_total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub removed_count: u64,
    pub cancel_requested: bool,
    /// Wall-clock run time, set once on completion.
    pub elapsed: Option<Duration>,
}

impl BroadcastJob {
    /// Whether the job has finalized its counts.
    pub fn is_finished(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// Live state of one job. Counters are atomics so status snapshots never
/// contend with the delivery loop.
struct JobState {
    job_id: Uuid,
    initiator_id: String,
    started_at: i64,
    started_instant: Instant,
    target_total: u64,
    success: AtomicU64,
    failure: AtomicU64,
    removed: AtomicU64,
    cancel_requested: AtomicBool,
    elapsed: Mutex<Option<Duration>>,
    done: Notify,
}

impl JobState {
    fn new(initiator_id: &str, target_total: u64) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            initiator_id: initiator_id.to_string(),
            started_at: chrono::Utc::now().timestamp(),
            started_instant: Instant::now(),
            target_total,
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
            elapsed: Mutex::new(None),
            done: Notify::new(),
        }
    }

    fn is_finished(&self) -> bool {
        self.elapsed.lock().is_some()
    }

    fn finalize(&self) {
        *self.elapsed.lock() = Some(self.started_instant.elapsed());
        self.done.notify_waiters();
    }

    fn snapshot(&self) -> BroadcastJob {
        BroadcastJob {
            job_id: self.job_id,
            initiator_id: self.initiator_id.clone(),
            started_at: self.started_at,
            target_total: self.target_total,
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            removed_count: self.removed.load(Ordering::Relaxed),
            cancel_requested: self.cancel_requested.load(Ordering::Relaxed),
            elapsed: *self.elapsed.lock(),
        }
    }
}

/// Orchestrator for broadcast jobs. At most one active job per initiator.
pub struct BroadcastOrchestrator {
    registry: Arc<AuthorizationRegistry>,
    deliverer: Arc<dyn Deliverer>,
    jobs: DashMap<Uuid, Arc<JobState>>,
    active: DashMap<String, Uuid>,
}

impl BroadcastOrchestrator {
    pub fn new(registry: Arc<AuthorizationRegistry>, deliverer: Arc<dyn Deliverer>) -> Self {
        Self {
            registry,
            deliverer,
            jobs: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Start a job fanning `payload` out to every known, non-banned user.
    ///
    /// The target set is fixed here; users registered afterwards are not
    /// included in this run. Fails with [`AccessError::AlreadyRunning`] if
    /// the initiator already has a job in flight.
    pub async fn start(
        self: &Arc<Self>,
        initiator_id: &str,
        payload: &str,
    ) -> AccessResult<Uuid> {
        // Claim the initiator slot first so two concurrent starts cannot
        // both pass the check.
        match self.active.entry(initiator_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AccessError::AlreadyRunning(initiator_id.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Uuid::nil());
            }
        }

        let targets = match self.enumerate_targets().await {
            Ok(targets) => targets,
            Err(err) => {
                self.active.remove(initiator_id);
                return Err(err);
            }
        };

        let state = Arc::new(JobState::new(initiator_id, targets.len() as u64));
        let job_id = state.job_id;
        self.jobs.insert(job_id, state.clone());
        self.active.insert(initiator_id.to_string(), job_id);

        info!(
            %job_id,
            initiator = %initiator_id,
            targets = targets.len(),
            "Broadcast started"
        );

        let orchestrator = self.clone();
        let payload = payload.to_string();
        tokio::spawn(async move {
            orchestrator.run(state, targets, payload).await;
        });

        Ok(job_id)
    }

    /// Request cancellation. Idempotent; returns whether the flag landed on
    /// a still-running job. A finished job is left untouched.
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        let Some(state) = self.jobs.get(job_id) else {
            return false;
        };
        if state.is_finished() {
            return false;
        }
        state.cancel_requested.store(true, Ordering::Relaxed);
        debug!(%job_id, "Broadcast cancellation requested");
        true
    }

    /// Snapshot a job's current counts.
    pub fn status(&self, job_id: &Uuid) -> Option<BroadcastJob> {
        self.jobs.get(job_id).map(|state| state.snapshot())
    }

    /// Wait until the job finalizes, then return its frozen snapshot.
    pub async fn wait(&self, job_id: &Uuid) -> Option<BroadcastJob> {
        let state = self.jobs.get(job_id)?.clone();
        loop {
            if state.is_finished() {
                return Some(state.snapshot());
            }
            let notified = state.done.notified();
            if state.is_finished() {
                return Some(state.snapshot());
            }
            notified.await;
        }
    }

    /// Drop a finished job after it has been reported. Running jobs are
    /// kept; returns the final snapshot of what was discarded.
    pub fn discard(&self, job_id: &Uuid) -> Option<BroadcastJob> {
        let finished = self
            .jobs
            .get(job_id)
            .map(|state| state.is_finished())
            .unwrap_or(false);
        if !finished {
            return None;
        }
        self.jobs
            .remove(job_id)
            .map(|(_, state)| state.snapshot())
    }

    /// Known users minus those holding a ban.
    async fn enumerate_targets(&self) -> AccessResult<Vec<String>> {
        Ok(self
            .registry
            .all_user_ids()
            .await?
            .into_iter()
            .filter(|id| !self.registry.is_banned_user(id))
            .collect())
    }

    async fn run(&self, state: Arc<JobState>, targets: Vec<String>, payload: String) {
        for recipient in &targets {
            // Cancellation checkpoint: the current delivery always
            // completes, later recipients are never touched.
            if state.cancel_requested.load(Ordering::Relaxed) {
                break;
            }
            match self.deliverer.send(recipient, &payload).await {
                DeliveryResult::Success => {
                    state.success.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryResult::Blocked | DeliveryResult::Deactivated => {
                    if let Err(err) = self.registry.remove_user(recipient).await {
                        warn!(
                            recipient = %recipient,
                            error = %err,
                            "Failed to drop gone recipient"
                        );
                    }
                    state.removed.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryResult::RateLimited => {
                    state.failure.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryResult::OtherFailure(detail) => {
                    debug!(recipient = %recipient, detail = %detail, "Delivery failed");
                    state.failure.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // Free the initiator slot before waking waiters, so a waiter that
        // immediately starts a new job never sees the old one occupying it.
        self.active.remove(&state.initiator_id);
        state.finalize();
        let summary = state.snapshot();
        info!(
            job_id = %summary.job_id,
            initiator = %summary.initiator_id,
            targets = summary.target_total,
            success = summary.success_count,
            failed = summary.failure_count,
            removed = summary.removed_count,
            cancelled = summary.cancel_requested,
            elapsed_ms = summary.elapsed.unwrap_or_default().as_millis() as u64,
            "Broadcast finished"
        );
    }
}
