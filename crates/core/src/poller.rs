// crates/core/src/poller.rs
//! Generic wait-until-terminal engine.
//!
//! One refresh per attempt, one sleep between attempts, nothing after the
//! terminal observation. Transport and decode errors abort the wait
//! immediately: re-polling exists for legitimate non-terminal states, not as
//! network retry.
//!
//! A handle must not be polled from two places at once. Nothing enforces
//! this; callers own the handle mutably for the whole wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::JobKind;
use crate::clock::Clock;
use crate::error::JobError;

/// How long to sleep between two attempts.
pub enum PollInterval<S> {
    Fixed(Duration),
    /// Interval chosen from the last observed state.
    ByState(fn(&S) -> Duration),
}

// Manual impls: derives would demand `S: Clone + Copy + Debug`.
impl<S> Clone for PollInterval<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for PollInterval<S> {}

impl<S> fmt::Debug for PollInterval<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::ByState(_) => f.write_str("ByState(..)"),
        }
    }
}

/// Interval plus attempt ceiling, configured per call site.
#[derive(Debug)]
pub struct PollPolicy<S> {
    pub interval: PollInterval<S>,
    pub max_attempts: u32,
}

impl<S> Clone for PollPolicy<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for PollPolicy<S> {}

impl<S> PollPolicy<S> {
    pub fn new(interval: PollInterval<S>, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::new(PollInterval::Fixed(interval), max_attempts)
    }

    pub fn interval_for(&self, state: &S) -> Duration {
        match self.interval {
            PollInterval::Fixed(d) => d,
            PollInterval::ByState(f) => f(state),
        }
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.max_attempts == 0 {
            return Err(JobError::InvalidPolicy("max_attempts must be at least 1".into()));
        }
        if let PollInterval::Fixed(d) = self.interval {
            if d.is_zero() {
                return Err(JobError::InvalidPolicy("interval must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Something whose state the poller can observe.
pub trait Pollable {
    type State: fmt::Display;

    fn kind(&self) -> JobKind;

    /// Display form of the server id, `None` until submitted.
    fn poll_id(&self) -> Option<String>;

    fn observed_state(&self) -> Option<&Self::State>;
}

pub struct StatePoller {
    clock: Arc<dyn Clock>,
}

impl StatePoller {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Refresh `handle` until `is_terminal` holds or the attempt budget runs out.
    ///
    /// Fails with [`JobError::NotSubmitted`] before any round trip when the
    /// handle has no id, and with [`JobError::PollTimeout`] (carrying the last
    /// observed state) when `max_attempts` refreshes never reach a terminal
    /// state.
    pub fn wait_until_terminal<H, R, T>(
        &self,
        handle: &mut H,
        mut refresh: R,
        is_terminal: T,
        policy: &PollPolicy<H::State>,
    ) -> Result<(), JobError>
    where
        H: Pollable,
        R: FnMut(&mut H) -> Result<(), JobError>,
        T: Fn(&H::State) -> bool,
    {
        let Some(id) = handle.poll_id() else {
            return Err(JobError::NotSubmitted { kind: handle.kind() });
        };
        policy.validate()?;
        let kind = handle.kind();

        for attempt in 1..=policy.max_attempts {
            refresh(handle)?;
            let Some(state) = handle.observed_state() else {
                return Err(JobError::decode(kind, "refresh produced no state"));
            };
            tracing::debug!(%kind, %id, attempt, %state, "poll");

            if is_terminal(state) {
                tracing::info!(%kind, %id, attempt, %state, "job reached terminal state");
                return Ok(());
            }
            if attempt < policy.max_attempts {
                self.clock.sleep(policy.interval_for(state));
            }
        }

        let last_state = handle
            .observed_state()
            .map(|s| s.to_string())
            .unwrap_or_default();
        tracing::warn!(
            %kind,
            %id,
            attempts = policy.max_attempts,
            %last_state,
            "gave up waiting for terminal state"
        );
        Err(JobError::PollTimeout {
            kind,
            id,
            attempts: policy.max_attempts,
            last_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::BatchSqlStatus;

    /// Handle whose refresh pops the next scripted state.
    struct Scripted {
        id: Option<String>,
        script: Vec<BatchSqlStatus>,
        state: Option<BatchSqlStatus>,
        refreshes: u32,
    }

    impl Scripted {
        fn new(script: &[&str]) -> Self {
            Self {
                id: Some("job-1".into()),
                script: script.iter().rev().map(|s| BatchSqlStatus::from(*s)).collect(),
                state: None,
                refreshes: 0,
            }
        }

        fn refresh(&mut self) -> Result<(), JobError> {
            self.refreshes += 1;
            if let Some(next) = self.script.pop() {
                self.state = Some(next);
            }
            Ok(())
        }
    }

    impl Pollable for Scripted {
        type State = BatchSqlStatus;

        fn kind(&self) -> JobKind {
            JobKind::BatchSql
        }

        fn poll_id(&self) -> Option<String> {
            self.id.clone()
        }

        fn observed_state(&self) -> Option<&BatchSqlStatus> {
            self.state.as_ref()
        }
    }

    fn poller() -> (Arc<ManualClock>, StatePoller) {
        let clock = Arc::new(ManualClock::default());
        (clock.clone(), StatePoller::new(clock))
    }

    #[test]
    fn test_times_out_after_exactly_max_attempts() {
        let (clock, poller) = poller();
        let mut handle = Scripted::new(&["running"]);
        let policy = PollPolicy::fixed(Duration::from_millis(10), 5);

        let err = poller
            .wait_until_terminal(&mut handle, Scripted::refresh, BatchSqlStatus::is_terminal, &policy)
            .unwrap_err();

        assert_eq!(handle.refreshes, 5);
        match err {
            JobError::PollTimeout {
                attempts,
                last_state,
                ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_state, "running");
            }
            other => panic!("expected PollTimeout, got {other:?}"),
        }
        // Sleeps only between attempts.
        assert_eq!(clock.sleeps().len(), 4);
    }

    #[test]
    fn test_returns_on_terminal_without_trailing_sleep() {
        let (clock, poller) = poller();
        let mut handle = Scripted::new(&["pending", "pending", "done"]);
        let policy = PollPolicy::fixed(Duration::from_millis(10), 5);

        poller
            .wait_until_terminal(&mut handle, Scripted::refresh, BatchSqlStatus::is_terminal, &policy)
            .unwrap();

        assert_eq!(handle.refreshes, 3);
        assert_eq!(handle.state, Some(BatchSqlStatus::Done));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10); 2]);
    }

    #[test]
    fn test_unsubmitted_handle_is_rejected_before_any_refresh() {
        let (_clock, poller) = poller();
        let mut handle = Scripted::new(&["done"]);
        handle.id = None;
        let policy = PollPolicy::fixed(Duration::from_millis(10), 5);

        let err = poller
            .wait_until_terminal(&mut handle, Scripted::refresh, BatchSqlStatus::is_terminal, &policy)
            .unwrap_err();
        assert!(matches!(err, JobError::NotSubmitted { kind: JobKind::BatchSql }));
        assert_eq!(handle.refreshes, 0);
    }

    #[test]
    fn test_refresh_error_aborts_wait() {
        let (clock, poller) = poller();
        let mut handle = Scripted::new(&["pending"]);
        let policy = PollPolicy::fixed(Duration::from_millis(10), 5);
        let mut calls = 0;

        let err = poller
            .wait_until_terminal(
                &mut handle,
                |h: &mut Scripted| {
                    calls += 1;
                    if calls == 2 {
                        return Err(crate::TransportError::Network("reset".into()).into());
                    }
                    h.refresh()
                },
                BatchSqlStatus::is_terminal,
                &policy,
            )
            .unwrap_err();

        assert!(matches!(err, JobError::Transport(_)));
        assert_eq!(calls, 2);
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[test]
    fn test_state_dependent_interval() {
        fn interval(state: &BatchSqlStatus) -> Duration {
            match state {
                BatchSqlStatus::Running => Duration::from_secs(5),
                _ => Duration::from_secs(1),
            }
        }
        let (clock, poller) = poller();
        let mut handle = Scripted::new(&["pending", "running", "done"]);
        let policy = PollPolicy::new(PollInterval::ByState(interval), 10);

        poller
            .wait_until_terminal(&mut handle, Scripted::refresh, BatchSqlStatus::is_terminal, &policy)
            .unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(5)]
        );
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let (_clock, poller) = poller();
        let mut handle = Scripted::new(&["done"]);
        let policy = PollPolicy::fixed(Duration::from_millis(10), 0);
        let err = poller
            .wait_until_terminal(&mut handle, Scripted::refresh, BatchSqlStatus::is_terminal, &policy)
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPolicy(_)));
    }
}
