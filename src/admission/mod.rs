//! Tiered, capacity-bounded admission queue.
//!
//! Protects a bounded-capacity downstream pipeline from overload while
//! giving trusted callers preferential latency. Two lanes: `priority`
//! (owner, grant holders, valid-token callers) and `regular` (everyone
//! else, additionally rate limited per caller).
//!
//! Dispatch serves the priority lane strictly first, except that a regular
//! item older than the configured starvation bound is promoted ahead of
//! priority items younger than it. Within a lane, strict FIFO.
//!
//! Queue state is in-memory only: requests are cheap for callers to
//! re-submit, so crash durability is deliberately not provided.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::{Clock, QuantaClock};
use governor::{Quota, RateLimiter as GovRateLimiter};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::AdmissionConfig;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Admission-priority class assigned to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Served first: owner, grant holders, valid-token callers.
    Priority,
    /// Everyone else; subject to the per-caller rate limit.
    Regular,
}

/// A queued unit of admitted work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub request_id: Uuid,
    pub caller_id: String,
    pub tier: Tier,
    pub enqueued_at: Instant,
    /// Opaque handle to the work, resolved by the processing pipeline.
    pub payload_ref: String,
}

/// Decision returned to the caller at admission time.
#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
    /// Accepted into the regular lane.
    Accepted {
        request_id: Uuid,
        /// 1-based position in the effective dispatch order.
        position: usize,
        wait_estimate: Duration,
    },
    /// Accepted into the priority lane.
    QueuedPriority {
        request_id: Uuid,
        wait_estimate: Duration,
    },
    /// Not admitted. Terminal: the queue never retries on the caller's
    /// behalf; the estimate tells the caller when retrying is worthwhile.
    Rejected(RejectReason),
}

/// Why a request was not admitted.
#[derive(Debug, Clone)]
pub enum RejectReason {
    /// Outstanding items have reached the capacity ceiling.
    QueueFull { wait_estimate: Duration },
    /// The caller's regular-lane window is exhausted.
    RateLimited { wait_estimate: Duration },
}

#[derive(Debug, Default)]
struct Lanes {
    priority: VecDeque<QueueItem>,
    regular: VecDeque<QueueItem>,
}

impl Lanes {
    fn len(&self) -> usize {
        self.priority.len() + self.regular.len()
    }
}

/// Tiered admission queue with per-caller throttling.
pub struct AdmissionQueue {
    lanes: Mutex<Lanes>,
    /// Per-caller regular-lane rate limiters.
    limiters: DashMap<String, DirectRateLimiter>,
    clock: QuantaClock,
    config: AdmissionConfig,
    /// Observed average service time in nanoseconds; 0 until the first
    /// dispatch completion is recorded.
    observed_service_nanos: AtomicU64,
}

impl AdmissionQueue {
    /// Create a queue with the given configuration.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            limiters: DashMap::new(),
            clock: QuantaClock::default(),
            config,
            observed_service_nanos: AtomicU64::new(0),
        }
    }

    /// Admit a request for the given caller and tier.
    pub fn admit(&self, caller_id: &str, tier: Tier, payload_ref: &str) -> AdmissionOutcome {
        let mut lanes = self.lanes.lock();

        if lanes.len() >= self.config.capacity {
            debug!(caller = %caller_id, outstanding = lanes.len(), "Admission rejected, queue full");
            return AdmissionOutcome::Rejected(RejectReason::QueueFull {
                // Time until roughly one slot frees.
                wait_estimate: self.service_time(),
            });
        }

        if tier == Tier::Regular
            && let Err(wait) = self.check_rate(caller_id)
        {
            debug!(caller = %caller_id, wait_secs = wait.as_secs(), "Admission rejected, rate limited");
            return AdmissionOutcome::Rejected(RejectReason::RateLimited { wait_estimate: wait });
        }

        let item = QueueItem {
            request_id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            tier,
            enqueued_at: Instant::now(),
            payload_ref: payload_ref.to_string(),
        };
        let request_id = item.request_id;
        match tier {
            Tier::Priority => lanes.priority.push_back(item),
            Tier::Regular => lanes.regular.push_back(item),
        }

        let position = self
            .position_in(&lanes, &request_id)
            .unwrap_or(lanes.len());
        let wait_estimate = self.estimate(position);
        debug!(caller = %caller_id, ?tier, position, "Request admitted");

        match tier {
            Tier::Priority => AdmissionOutcome::QueuedPriority {
                request_id,
                wait_estimate,
            },
            Tier::Regular => AdmissionOutcome::Accepted {
                request_id,
                position,
                wait_estimate,
            },
        }
    }

    /// Pop the next item per the dispatch discipline, if any.
    pub fn dispatch_next(&self) -> Option<QueueItem> {
        let mut lanes = self.lanes.lock();
        let now = Instant::now();
        let take_regular = regular_goes_first(
            lanes.priority.front(),
            lanes.regular.front(),
            now,
            self.config.max_regular_wait(),
        )?;
        if take_regular {
            lanes.regular.pop_front()
        } else {
            lanes.priority.pop_front()
        }
    }

    /// Remove a still-queued item. No-op (false) if it was already
    /// dispatched or never existed.
    pub fn cancel(&self, request_id: &Uuid) -> bool {
        let mut lanes = self.lanes.lock();
        let lanes = &mut *lanes;
        for lane in [&mut lanes.priority, &mut lanes.regular] {
            if let Some(idx) = lane.iter().position(|item| item.request_id == *request_id) {
                lane.remove(idx);
                debug!(%request_id, "Queued request cancelled");
                return true;
            }
        }
        false
    }

    /// Total outstanding items across both lanes.
    pub fn outstanding(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Current 1-based position of a queued item in the effective dispatch
    /// order, recomputed from live queue composition.
    pub fn position_of(&self, request_id: &Uuid) -> Option<usize> {
        let lanes = self.lanes.lock();
        self.position_in(&lanes, request_id)
    }

    /// Current wait estimate for a queued item.
    pub fn wait_estimate_of(&self, request_id: &Uuid) -> Option<Duration> {
        self.position_of(request_id).map(|pos| self.estimate(pos))
    }

    /// Record a completed dispatch so wait estimates track the observed
    /// per-item service time (exponential moving average).
    pub fn record_service(&self, elapsed: Duration) {
        let sample = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let prior = self.observed_service_nanos.load(Ordering::Relaxed);
        let next = if prior == 0 {
            sample
        } else {
            // 80/20 blend: stable, but responsive to drift.
            prior / 5 * 4 + sample / 5
        };
        self.observed_service_nanos.store(next.max(1), Ordering::Relaxed);
    }

    /// Observed average service time, falling back to the configured value.
    fn service_time(&self) -> Duration {
        match self.observed_service_nanos.load(Ordering::Relaxed) {
            0 => self.config.service_time(),
            nanos => Duration::from_nanos(nanos),
        }
    }

    fn estimate(&self, position: usize) -> Duration {
        self.service_time().saturating_mul(position as u32)
    }

    /// Walk the effective dispatch order and find the item's 1-based slot.
    fn position_in(&self, lanes: &Lanes, request_id: &Uuid) -> Option<usize> {
        let now = Instant::now();
        let max_wait = self.config.max_regular_wait();
        let mut pi = 0;
        let mut ri = 0;
        let mut position = 0;
        loop {
            let take_regular = regular_goes_first(
                lanes.priority.get(pi),
                lanes.regular.get(ri),
                now,
                max_wait,
            )?;
            let item = if take_regular {
                ri += 1;
                &lanes.regular[ri - 1]
            } else {
                pi += 1;
                &lanes.priority[pi - 1]
            };
            position += 1;
            if item.request_id == *request_id {
                return Some(position);
            }
        }
    }

    /// Consume one slot of the caller's regular-lane window. On rejection,
    /// returns the time until the window has room again.
    fn check_rate(&self, caller_id: &str) -> Result<(), Duration> {
        let limiter = self
            .limiters
            .entry(caller_id.to_string())
            .or_insert_with(|| {
                let count = NonZeroU32::new(self.config.rate_limit_count)
                    .unwrap_or(NonZeroU32::new(1).unwrap());
                let period = self
                    .config
                    .rate_limit_window()
                    .checked_div(count.get())
                    .filter(|p| !p.is_zero())
                    .unwrap_or(Duration::from_secs(1));
                let quota = Quota::with_period(period)
                    .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
                    .allow_burst(count);
                GovRateLimiter::direct(quota)
            });

        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Drop idle per-caller limiters so the map does not grow without
    /// bound. Call from a periodic maintenance task.
    pub fn cleanup_limiters(&self) {
        const MAX_ENTRIES: usize = 10_000;
        if self.limiters.len() > MAX_ENTRIES {
            self.limiters.clear();
            debug!("cleared regular-lane rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
    }
}

/// Decide which lane's head dispatches first. `None` when both lanes are
/// empty. A regular head past the starvation bound beats a priority head
/// that is younger than it.
fn regular_goes_first(
    priority: Option<&QueueItem>,
    regular: Option<&QueueItem>,
    now: Instant,
    max_wait: Duration,
) -> Option<bool> {
    match (priority, regular) {
        (None, None) => None,
        (None, Some(_)) => Some(true),
        (Some(_), None) => Some(false),
        (Some(p), Some(r)) => {
            let starving = now.duration_since(r.enqueued_at) > max_wait;
            Some(starving && p.enqueued_at > r.enqueued_at)
        }
    }
}
