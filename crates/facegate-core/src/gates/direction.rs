use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::detector::{DetectOptions, LandmarkDetector, Landmarks};
use crate::errors::AppResult;
use crate::guard::{Backoff, StageGuard};
use crate::prompt::{Prompt, Prompter, Side};
use crate::session::{DirectionState, SessionState};

use super::poll_once;

/// Head-turn check. A side counts as seen once its eye-to-jaw distance
/// drops below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionGate {
    threshold: f64,
    poll_interval: Duration,
    backoff: Backoff,
}

impl Default for DirectionGate {
    fn default() -> Self {
        Self::new(40.0, Duration::from_millis(100), Backoff::default())
    }
}

impl DirectionGate {
    pub fn new(threshold: f64, poll_interval: Duration, backoff: Backoff) -> Self {
        Self {
            threshold,
            poll_interval,
            backoff,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Applies one poll's landmarks. Left is tried first and at most one flag
    /// flips per call; flags never go back to false.
    pub fn check_direction(&self, landmarks: &Landmarks, state: &mut DirectionState) -> DirectionState {
        if landmarks.left_distance() < self.threshold && !state.left() {
            state.mark_left();
        } else if landmarks.right_distance() < self.threshold && !state.right() {
            state.mark_right();
        }
        *state
    }

    pub async fn run(
        &self,
        frames: &mut dyn FrameSource,
        detector: &mut dyn LandmarkDetector,
        session: &mut SessionState,
        prompter: &mut dyn Prompter,
        guard: &StageGuard,
    ) -> AppResult<DirectionState> {
        info!(threshold = self.threshold, "direction gate started");
        if !session.direction().left() {
            prompter.show(&Prompt::LookLeft);
        } else if !session.direction().right() {
            prompter.show(&Prompt::LookRight);
        }

        let mut attempt: u64 = 0;
        let mut misses: u32 = 0;
        while !session.direction().is_complete() {
            attempt += 1;
            let detection = poll_once(frames, detector, DetectOptions::landmarks(), guard).await?;
            let Some(landmarks) = detection.and_then(|detection| detection.landmarks) else {
                misses = misses.saturating_add(1);
                let delay = self.backoff.delay_for_attempt(misses);
                warn!(attempt, misses, delay_ms = delay.as_millis() as u64, "no face detected");
                guard.sleep(delay).await?;
                continue;
            };
            misses = 0;

            let before = session.direction();
            let after = self.check_direction(&landmarks, session.direction_mut());
            debug!(
                attempt,
                left_dist = landmarks.left_distance(),
                right_dist = landmarks.right_distance(),
                left = after.left(),
                right = after.right(),
                "direction poll"
            );

            if after.left() && !before.left() {
                info!(side = %Side::Left, attempt, "direction detected");
                prompter.show(&Prompt::DirectionDetected { side: Side::Left });
                if !after.right() {
                    prompter.show(&Prompt::LookRight);
                }
            } else if after.right() && !before.right() {
                info!(side = %Side::Right, attempt, "direction detected");
                prompter.show(&Prompt::DirectionDetected { side: Side::Right });
                if !after.left() {
                    prompter.show(&Prompt::LookLeft);
                }
            }

            if !after.is_complete() {
                guard.sleep(self.poll_interval).await?;
            }
        }

        prompter.show(&Prompt::DirectionsComplete);
        info!(attempts = attempt, "both directions detected");
        Ok(session.direction())
    }
}
