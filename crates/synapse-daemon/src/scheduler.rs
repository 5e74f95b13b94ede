//! Per-contract deadline timers.
//!
//! The scheduler owns every armed timer, keyed by job id, and exposes
//! only `arm` and `disarm`. Arming replaces any existing timer for the
//! job; any competing transition disarms. The fire callback must
//! re-check job state before mutating, because a submission can race
//! the timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use synapse_core::JobId;

/// Single-shot deadline timers keyed by job id.
#[derive(Debug, Default)]
pub struct DeadlineScheduler {
    timers: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl DeadlineScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a single-shot timer for `job_id`, replacing any existing
    /// one. After `delay`, `fire` runs on the runtime; the callback is
    /// responsible for re-checking job state.
    pub fn arm<F>(&self, job_id: JobId, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        if let Some(previous) = self.timers().insert(job_id.clone(), handle) {
            previous.abort();
            debug!(job_id = %job_id, "replaced armed deadline");
        }
    }

    /// Cancels the timer for `job_id`, if armed. Safe to call from the
    /// fire path itself: an abort lands at the next await point, and
    /// the fire path has none after it starts mutating.
    pub fn disarm(&self, job_id: &JobId) {
        if let Some(handle) = self.timers().remove(job_id) {
            handle.abort();
            debug!(job_id = %job_id, "disarmed deadline");
        }
    }

    /// Whether a timer is currently registered for `job_id`.
    ///
    /// A fired-but-not-yet-disarmed entry counts as armed; settlement
    /// paths always disarm, so the window is the fire callback itself.
    #[must_use]
    pub fn is_armed(&self, job_id: &JobId) -> bool {
        self.timers()
            .get(job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of registered, unfinished timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.timers()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    // Lock poisoning indicates a panic elsewhere; the map stays usable.
    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_armed_timer_fires_once() {
        let scheduler = DeadlineScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.arm(JobId::from("job_1"), Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_armed(&JobId::from("job_1")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed(&JobId::from("job_1")));
    }

    #[tokio::test]
    async fn test_disarm_cancels_pending_timer() {
        let scheduler = DeadlineScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.arm(JobId::from("job_1"), Duration::from_millis(20), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.disarm(&JobId::from("job_1"));
        assert!(!scheduler.is_armed(&JobId::from("job_1")));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_timer() {
        let scheduler = DeadlineScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        scheduler.arm(JobId::from("job_1"), Duration::from_millis(10), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        scheduler.arm(JobId::from("job_1"), Duration::from_millis(30), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Only the replacement fired.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
