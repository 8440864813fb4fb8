use std::time::Duration;

use tracing::{debug, info, warn};

use crate::burst::CaptureBuffer;
use crate::capture::FrameSource;
use crate::detector::{DetectOptions, Expression, LandmarkDetector};
use crate::errors::AppResult;
use crate::guard::{Backoff, StageGuard};
use crate::prompt::{Prompt, Prompter};
use crate::session::{SessionState, Stage};

use super::poll_once;

/// Waits for a target expression, then fires a burst capture for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionGate {
    poll_interval: Duration,
    backoff: Backoff,
    capture: CaptureBuffer,
    capture_timeout: Option<Duration>,
}

impl Default for ExpressionGate {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(100),
            Backoff::default(),
            CaptureBuffer::default(),
            Some(Duration::from_secs(10)),
        )
    }
}

impl ExpressionGate {
    pub fn new(
        poll_interval: Duration,
        backoff: Backoff,
        capture: CaptureBuffer,
        capture_timeout: Option<Duration>,
    ) -> Self {
        Self {
            poll_interval,
            backoff,
            capture,
            capture_timeout,
        }
    }

    /// Returns the ids of the burst taken once `target` was the dominant
    /// expression. The burst completes before this returns.
    pub async fn await_expression(
        &self,
        target: Expression,
        frames: &mut dyn FrameSource,
        detector: &mut dyn LandmarkDetector,
        session: &mut SessionState,
        prompter: &mut dyn Prompter,
        guard: &StageGuard,
    ) -> AppResult<Vec<String>> {
        info!(label = %target, "expression gate started");
        prompter.show(&Prompt::ShowExpression { label: target });

        let mut attempt: u64 = 0;
        let mut misses: u32 = 0;
        loop {
            attempt += 1;
            let detection = poll_once(frames, detector, DetectOptions::expressions(), guard).await?;
            let Some(scores) = detection.and_then(|detection| detection.expressions) else {
                misses = misses.saturating_add(1);
                let delay = self.backoff.delay_for_attempt(misses);
                warn!(attempt, misses, label = %target, delay_ms = delay.as_millis() as u64, "no face detected");
                guard.sleep(delay).await?;
                continue;
            };
            misses = 0;

            let dominant = scores.dominant();
            debug!(attempt, label = %target, dominant = ?dominant, "expression poll");
            if dominant == Some(target) {
                break;
            }
            guard.sleep(self.poll_interval).await?;
        }

        info!(label = %target, attempts = attempt, "expression detected");
        prompter.show(&Prompt::ExpressionDetected { label: target });

        let burst_guard = guard.for_stage(Stage::Capture, self.capture_timeout);
        let ids = self
            .capture
            .capture_burst(target, frames, session, &burst_guard)
            .await?;
        prompter.show(&Prompt::BurstCaptured {
            label: target,
            ids: ids.clone(),
        });
        prompter.present_captures(session.captures());
        Ok(ids)
    }
}
