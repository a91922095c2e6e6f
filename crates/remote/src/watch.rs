//! Per-invocation state shared by the poll loop and the waiting caller.
//!
//! A [`Watch`] is created for every function call and handed to the
//! poller. It carries the job token once known, the shared
//! [`LauncherResult`], a cancellation token that stops future poll ticks,
//! and a one-shot [`Settlement`] the caller awaits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use aigc_core::launcher::LauncherResult;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::poller::JobError;

/// Final result of one job, delivered once.
pub type JobOutcome = Result<(), JobError>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One-shot completion that can be settled at most once.
///
/// Timeout, cancel, poll success and poll error all race to settle; the
/// first caller wins and every later attempt is a no-op.
pub struct Settlement {
    sender: Mutex<Option<oneshot::Sender<JobOutcome>>>,
}

impl Settlement {
    pub fn new() -> (Self, oneshot::Receiver<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver `outcome`. Returns `false` if already settled.
    pub fn settle(&self, outcome: JobOutcome) -> bool {
        let Some(tx) = lock(&self.sender).take() else {
            return false;
        };
        // The receiver may be gone if the caller stopped waiting.
        let _ = tx.send(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.sender).is_none()
    }
}

/// State of one in-flight function call.
pub struct Watch {
    id: String,
    token: Mutex<Option<String>>,
    launcher: tokio::sync::Mutex<LauncherResult>,
    settlement: Settlement,
    ticks: CancellationToken,
    aborted: AtomicBool,
}

impl Watch {
    /// Create the watch for call `id` and the receiver its caller awaits.
    pub fn new(id: impl Into<String>) -> (Arc<Self>, oneshot::Receiver<JobOutcome>) {
        let (settlement, rx) = Settlement::new();
        let watch = Arc::new(Self {
            id: id.into(),
            token: Mutex::new(None),
            launcher: tokio::sync::Mutex::new(LauncherResult::new()),
            settlement,
            ticks: CancellationToken::new(),
            aborted: AtomicBool::new(false),
        });
        (watch, rx)
    }

    /// Caller-supplied id of the call (e.g. `VideoGen_12`).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *lock(&self.token) = Some(token.into());
    }

    pub fn launcher(&self) -> &tokio::sync::Mutex<LauncherResult> {
        &self.launcher
    }

    /// Cancelled when no further poll ticks may run.
    pub fn ticks(&self) -> &CancellationToken {
        &self.ticks
    }

    pub fn settle(&self, outcome: JobOutcome) -> bool {
        self.settlement.settle(outcome)
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_settled()
    }

    /// Claim the abort path. Only the first caller gets `true`.
    pub fn begin_abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn settles_exactly_once() {
        let (watch, rx) = Watch::new("job");

        assert!(!watch.is_settled());
        assert!(watch.settle(Ok(())));
        assert!(!watch.settle(Err(JobError::Cancelled)));
        assert!(!watch.settle(Err(JobError::Failed("late".into()))));
        assert!(watch.is_settled());

        assert_matches!(rx.await, Ok(Ok(())));
    }

    #[tokio::test]
    async fn first_failure_wins_over_late_success() {
        let (watch, rx) = Watch::new("job");
        assert!(watch.settle(Err(JobError::Cancelled)));
        assert!(!watch.settle(Ok(())));
        assert_matches!(rx.await, Ok(Err(JobError::Cancelled)));
    }

    #[test]
    fn settle_without_receiver_still_counts() {
        let (watch, rx) = Watch::new("job");
        drop(rx);
        assert!(watch.settle(Ok(())));
        assert!(watch.is_settled());
    }

    #[test]
    fn abort_is_claimed_once() {
        let (watch, _rx) = Watch::new("job");
        assert!(watch.begin_abort());
        assert!(!watch.begin_abort());
    }

    #[test]
    fn token_is_recorded() {
        let (watch, _rx) = Watch::new("job");
        assert!(watch.token().is_none());
        watch.set_token("T1");
        assert_eq!(watch.token().as_deref(), Some("T1"));
    }
}
