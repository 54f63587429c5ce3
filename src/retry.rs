//! Waiting for a node to show up in PuppetDB.
//!
//! A node that just checked in may not be queryable yet. [`RetryingLookup`]
//! repeats the lookup with exponential backoff until the node is found, a
//! non-404 failure occurs, the deadline passes, or the caller cancels.
//!
//! Only [`QueryOutcome::NotFound`] is retried. Every failure, transport
//! errors included, ends the loop on the spot.
//!
//! # Example
//!
//! ```ignore
//! use puppetdb_provider::retry::{RetryPolicy, RetryingLookup};
//! use tokio::time::Instant;
//!
//! let policy = RetryPolicy::default();
//! let deadline = Instant::now() + policy.max_elapsed;
//! let outcome = RetryingLookup::new(&client, policy)
//!     .retry_lookup("agent01.example.com", deadline)
//!     .await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::PuppetDbError;
use crate::puppetdb::{NodeLookup, QueryOutcome};

/// Largest delay a policy accepts between two attempts.
pub const MAX_INTERVAL_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest time budget a policy accepts.
pub const MAX_ELAPSED_CEILING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Stand-in for "no deadline" when `max_elapsed` does not fit an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first miss.
    pub initial_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter, as a fraction of the current interval (0.0 disables it).
    pub randomization_factor: f64,
    /// Default budget callers use to derive a deadline.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first delay, capped at [`MAX_INTERVAL_CEILING`].
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval.min(MAX_INTERVAL_CEILING);
        self
    }

    /// Set the delay cap, capped at [`MAX_INTERVAL_CEILING`].
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval.min(MAX_INTERVAL_CEILING);
        self
    }

    /// Set the growth factor. Values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the default time budget, capped at [`MAX_ELAPSED_CEILING`].
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed.min(MAX_ELAPSED_CEILING);
        self
    }

    /// Deadline `max_elapsed` from now.
    ///
    /// A budget too large to represent yields a deadline decades away.
    pub fn deadline_from_now(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.max_elapsed)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }
}

/// Delay generator for one retry loop.
#[derive(Debug)]
struct Backoff<'a> {
    policy: &'a RetryPolicy,
    current: Duration,
}

impl<'a> Backoff<'a> {
    fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            current: policy.initial_interval.min(policy.max_interval),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let spread = base * self.policy.randomization_factor;
        let jittered = if spread > 0.0 {
            base - spread + rand::random::<f64>() * 2.0 * spread
        } else {
            base
        };

        let max = self.policy.max_interval;
        let cap = max.as_secs_f64();
        self.current = Duration::try_from_secs_f64((base * self.policy.multiplier).min(cap))
            .map_or(max, |next| next.min(max));

        Duration::try_from_secs_f64(jittered.clamp(0.0, cap)).map_or(max, |delay| delay.min(max))
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The node was returned.
    Found,
    /// PuppetDB does not know the node (yet).
    NotFound,
    /// The attempt failed permanently.
    Failed,
}

/// Report of one attempt, handed to a [`RetryObserver`].
#[derive(Debug, Clone)]
pub struct AttemptEvent<'a> {
    /// Node being waited for.
    pub certname: &'a str,
    /// 1-based attempt number.
    pub attempt: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Delay before the next attempt, if there is one.
    pub next_delay: Option<Duration>,
}

/// Hook notified after every attempt.
pub trait RetryObserver: Send + Sync {
    /// Called once per attempt.
    fn on_attempt(&self, event: &AttemptEvent<'_>);
}

/// Reports attempts through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_attempt(&self, event: &AttemptEvent<'_>) {
        match (event.outcome, event.next_delay) {
            (AttemptOutcome::NotFound, Some(delay)) => trace!(
                certname = %event.certname,
                attempt = event.attempt,
                delay_ms = delay.as_millis() as u64,
                "Will retry requesting node after backoff delay"
            ),
            (AttemptOutcome::NotFound, None) => warn!(
                certname = %event.certname,
                attempt = event.attempt,
                "Node still not found, giving up"
            ),
            (AttemptOutcome::Failed, _) => debug!(
                certname = %event.certname,
                attempt = event.attempt,
                "Node lookup failed permanently"
            ),
            (AttemptOutcome::Found, _) => debug!(
                certname = %event.certname,
                attempt = event.attempt,
                "Node found"
            ),
        }
    }
}

/// Repeats a [`NodeLookup`] until the node appears.
pub struct RetryingLookup<'a, L: NodeLookup + ?Sized> {
    lookup: &'a L,
    policy: RetryPolicy,
    cancel: CancellationToken,
    observer: Arc<dyn RetryObserver>,
}

impl<'a, L: NodeLookup + ?Sized> RetryingLookup<'a, L> {
    /// Wrap `lookup` with the given policy.
    pub fn new(lookup: &'a L, policy: RetryPolicy) -> Self {
        Self {
            lookup,
            policy,
            cancel: CancellationToken::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Abort the wait when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Replace the default [`TracingObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Look `certname` up until it is found or `deadline` passes.
    ///
    /// The first attempt always runs. A wait that would end past the
    /// deadline is cut short and the loop ends with
    /// [`PuppetDbError::DeadlineExceeded`]. An in-flight request is never
    /// interrupted.
    pub async fn retry_lookup(&self, certname: &str, deadline: Instant) -> QueryOutcome {
        let mut backoff = Backoff::new(&self.policy);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(certname);
            }

            attempt += 1;
            let outcome = self.lookup.lookup_node(certname).await;
            let kind = match &outcome {
                QueryOutcome::Success(_) => AttemptOutcome::Found,
                QueryOutcome::Failure(_) => AttemptOutcome::Failed,
                QueryOutcome::NotFound => AttemptOutcome::NotFound,
            };
            if kind != AttemptOutcome::NotFound {
                self.notify(certname, attempt, kind, None);
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                self.notify(certname, attempt, kind, None);
                return deadline_exceeded(certname, attempt);
            }

            let delay = backoff.next_delay();
            self.notify(certname, attempt, kind, Some(delay));

            let wake = now
                .checked_add(delay)
                .map_or(deadline, |wake| wake.min(deadline));
            tokio::select! {
                _ = self.cancel.cancelled() => return self.cancelled(certname),
                _ = sleep_until(wake) => {}
            }
            if wake >= deadline {
                return deadline_exceeded(certname, attempt);
            }
        }
    }

    fn notify(
        &self,
        certname: &str,
        attempt: u32,
        outcome: AttemptOutcome,
        next_delay: Option<Duration>,
    ) {
        self.observer.on_attempt(&AttemptEvent {
            certname,
            attempt,
            outcome,
            next_delay,
        });
    }

    fn cancelled(&self, certname: &str) -> QueryOutcome {
        debug!(certname = %certname, "Node lookup cancelled");
        QueryOutcome::Failure(PuppetDbError::Cancelled {
            certname: certname.to_string(),
        })
    }
}

fn deadline_exceeded(certname: &str, attempts: u32) -> QueryOutcome {
    QueryOutcome::Failure(PuppetDbError::DeadlineExceeded {
        certname: certname.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PuppetDbErrorKind;
    use crate::puppetdb::NodeRecord;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns NotFound `misses` times, then the scripted final outcome.
    struct ScriptedLookup {
        misses: u32,
        fail_with: Option<String>,
        calls: AtomicU32,
    }

    impl ScriptedLookup {
        fn found_after(misses: u32) -> Self {
            Self {
                misses,
                fail_with: None,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                misses: 0,
                fail_with: Some(message.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NodeLookup for ScriptedLookup {
        async fn lookup_node(&self, certname: &str) -> QueryOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.misses {
                return QueryOutcome::NotFound;
            }
            match &self.fail_with {
                Some(msg) => QueryOutcome::Failure(PuppetDbError::Application(msg.clone())),
                None => QueryOutcome::Success(NodeRecord {
                    certname: certname.to_string(),
                    latest_report_status: "changed".to_string(),
                    ..Default::default()
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<VecDeque<(u32, AttemptOutcome, Option<Duration>)>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_attempt(&self, event: &AttemptEvent<'_>) {
            self.events
                .lock()
                .unwrap()
                .push_back((event.attempt, event.outcome, event.next_delay));
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_initial_interval(Duration::from_millis(2))
            .with_max_interval(Duration::from_millis(20))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
    }

    #[tokio::test]
    async fn test_found_after_misses() {
        let lookup = ScriptedLookup::found_after(3);
        let observer = Arc::new(RecordingObserver::default());
        let outcome = RetryingLookup::new(&lookup, fast_policy())
            .with_observer(observer.clone())
            .retry_lookup("agent01", Instant::now() + Duration::from_secs(5))
            .await;

        match outcome {
            QueryOutcome::Success(node) => assert_eq!(node.latest_report_status, "changed"),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(lookup.calls(), 4);

        let events: Vec<_> = observer.events.lock().unwrap().iter().cloned().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].1, AttemptOutcome::Found);
        assert!(events[3].2.is_none());

        let delays: Vec<Duration> = events.iter().filter_map(|e| e.2).collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let lookup = ScriptedLookup::failing("query failed");
        let outcome = RetryingLookup::new(&lookup, fast_policy())
            .retry_lookup("agent01", Instant::now() + Duration::from_secs(5))
            .await;

        match outcome {
            QueryOutcome::Failure(err) => {
                assert_eq!(err.kind(), PuppetDbErrorKind::Application);
                assert!(err.to_string().contains("query failed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let lookup = ScriptedLookup::found_after(u32::MAX);
        let policy = RetryPolicy::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_randomization_factor(0.0);
        let start = Instant::now();
        let outcome = RetryingLookup::new(&lookup, policy)
            .retry_lookup("agent01", start + Duration::from_millis(50))
            .await;
        let elapsed = start.elapsed();

        match outcome {
            QueryOutcome::Failure(err) => {
                assert_eq!(err.kind(), PuppetDbErrorKind::DeadlineExceeded);
                assert!(err.to_string().contains("agent01"));
            }
            other => panic!("expected deadline failure, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "overran: {elapsed:?}");
        assert!(lookup.calls() >= 2);
    }

    #[tokio::test]
    async fn test_past_deadline_still_attempts_once() {
        let lookup = ScriptedLookup::found_after(0);
        let outcome = RetryingLookup::new(&lookup, fast_policy())
            .retry_lookup("agent01", Instant::now())
            .await;
        assert!(matches!(outcome, QueryOutcome::Success(_)));
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let lookup = ScriptedLookup::found_after(u32::MAX);
        let token = CancellationToken::new();
        let policy = RetryPolicy::new()
            .with_initial_interval(Duration::from_secs(30))
            .with_randomization_factor(0.0);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let outcome = RetryingLookup::new(&lookup, policy)
            .with_cancellation(token)
            .retry_lookup("agent01", start + Duration::from_secs(60))
            .await;

        match outcome {
            QueryOutcome::Failure(err) => assert_eq!(err.kind(), PuppetDbErrorKind::Cancelled),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(lookup.calls(), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new()
            .with_initial_interval(Duration::from_millis(125))
            .with_max_interval(Duration::from_millis(500))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0);
        let mut backoff = Backoff::new(&policy);
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![125, 250, 500, 500, 500]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(10))
            .with_multiplier(1.0)
            .with_randomization_factor(0.5);
        let mut backoff = Backoff::new(&policy);
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(49), "{delay:?}");
            assert!(delay <= Duration::from_millis(151), "{delay:?}");
        }
    }

    #[test]
    fn test_policy_builder_clamps() {
        let policy = RetryPolicy::new()
            .with_multiplier(0.5)
            .with_randomization_factor(3.0);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.randomization_factor, 1.0);
        assert_eq!(RetryPolicy::default().initial_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_policy_builder_caps_huge_durations() {
        let policy = RetryPolicy::new()
            .with_initial_interval(Duration::MAX)
            .with_max_interval(Duration::MAX)
            .with_max_elapsed(Duration::MAX);
        assert_eq!(policy.initial_interval, MAX_INTERVAL_CEILING);
        assert_eq!(policy.max_interval, MAX_INTERVAL_CEILING);
        assert_eq!(policy.max_elapsed, MAX_ELAPSED_CEILING);
        assert!(policy.deadline_from_now() > Instant::now() + Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_unrepresentable_budget_gives_distant_deadline() {
        let policy = RetryPolicy {
            max_elapsed: Duration::MAX,
            ..RetryPolicy::default()
        };
        let deadline = policy.deadline_from_now();
        assert!(deadline > Instant::now() + Duration::from_secs(86400 * 365));
    }

    #[test]
    fn test_backoff_with_unbounded_fields() {
        let policy = RetryPolicy {
            initial_interval: Duration::MAX,
            max_interval: Duration::MAX,
            multiplier: f64::INFINITY,
            randomization_factor: 1.0,
            max_elapsed: Duration::MAX,
        };
        let mut backoff = Backoff::new(&policy);
        for _ in 0..3 {
            assert!(backoff.next_delay() <= Duration::MAX);
        }

        let policy = RetryPolicy {
            multiplier: f64::NAN,
            ..fast_policy()
        };
        let mut backoff = Backoff::new(&policy);
        for _ in 0..3 {
            assert!(backoff.next_delay() <= policy.max_interval);
        }
    }

    #[tokio::test]
    async fn test_huge_delay_is_cut_at_deadline() {
        let lookup = ScriptedLookup::found_after(u32::MAX);
        let policy = RetryPolicy {
            initial_interval: Duration::MAX,
            max_interval: Duration::MAX,
            randomization_factor: 0.0,
            ..RetryPolicy::default()
        };
        let start = Instant::now();
        let outcome = RetryingLookup::new(&lookup, policy)
            .retry_lookup("agent01", start + Duration::from_millis(50))
            .await;

        match outcome {
            QueryOutcome::Failure(err) => {
                assert_eq!(err.kind(), PuppetDbErrorKind::DeadlineExceeded)
            }
            other => panic!("expected deadline failure, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(lookup.calls(), 1);
    }
}
