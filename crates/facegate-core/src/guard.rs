//! Deadline, cancellation and backoff shared by every suspension point of
//! the pipeline.

use std::future::{pending, Future};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::errors::{AppError, AppResult};
use crate::session::Stage;

/// Exponential backoff for transient misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first miss (doubles on each consecutive miss).
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay for the `attempt`-th consecutive miss, counting from 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }
}

/// Creates a cancel flag. Sending `true` aborts whichever stage is waiting.
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Races stage work against the stage deadline and the cancel flag.
#[derive(Debug, Clone)]
pub struct StageGuard {
    stage: Stage,
    started: Instant,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl StageGuard {
    pub fn new(stage: Stage, timeout: Option<Duration>, cancel: Option<watch::Receiver<bool>>) -> Self {
        let started = Instant::now();
        Self {
            stage,
            started,
            deadline: timeout.map(|timeout| started + timeout),
            cancel,
        }
    }

    pub fn unbounded(stage: Stage) -> Self {
        Self::new(stage, None, None)
    }

    /// Guard for a nested stage that shares this guard's cancel flag but
    /// runs its own clock.
    pub fn for_stage(&self, stage: Stage, timeout: Option<Duration>) -> StageGuard {
        StageGuard::new(stage, timeout, self.cancel.clone())
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Resolves `work` unless the deadline passes or cancel is raised first.
    pub async fn run<F>(&self, work: F) -> AppResult<F::Output>
    where
        F: Future,
    {
        let cancelled = wait_for_cancel(self.cancel.clone());
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(AppError::Cancelled { stage: self.stage }),
            _ = expired => Err(AppError::StageTimeout {
                stage: self.stage,
                elapsed: self.elapsed(),
            }),
            output = work => Ok(output),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> AppResult<()> {
        if duration.is_zero() {
            return self.run(async {}).await;
        }
        self.run(tokio::time::sleep(duration)).await
    }
}

async fn wait_for_cancel(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling.
            return pending().await;
        }
    }
}
