use std::time::Duration;

use tracing::{debug, info};

use crate::capture::FrameSource;
use crate::detector::Expression;
use crate::errors::AppResult;
use crate::guard::StageGuard;
use crate::session::{CapturedImage, SessionState, BURST_SIZE};

/// Fixed-cadence burst capture into the session's capture list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureBuffer {
    interval: Duration,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl CaptureBuffer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Grabs `BURST_SIZE` frames `interval` apart and appends them as
    /// `{label}_0..2`. The session is only touched once every frame has been
    /// taken, so an aborted burst leaves no partial captures behind.
    pub async fn capture_burst(
        &self,
        label: Expression,
        frames: &mut dyn FrameSource,
        session: &mut SessionState,
        guard: &StageGuard,
    ) -> AppResult<Vec<String>> {
        let mut burst = Vec::with_capacity(BURST_SIZE);
        for index in 0..BURST_SIZE {
            if index > 0 {
                guard.sleep(self.interval).await?;
            }
            let frame = guard.run(frames.get_frame()).await??;
            let image = CapturedImage::new(label, index, frame);
            debug!(image_id = image.id(), "captured burst frame");
            burst.push(image);
        }

        let ids: Vec<String> = burst.iter().map(|image| image.id().to_string()).collect();
        session.append_captures(burst);
        info!(%label, total = session.captures().len(), "burst complete");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::session::Stage;
    use crate::testing::ScriptedFrames;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn burst_appends_three_ids_at_cadence() {
        let buffer = CaptureBuffer::new(Duration::from_millis(1000));
        let mut frames = ScriptedFrames::new();
        let mut session = SessionState::new();
        let guard = StageGuard::unbounded(Stage::Capture);

        let started = Instant::now();
        let ids = buffer
            .capture_burst(Expression::Neutral, &mut frames, &mut session, &guard)
            .await
            .unwrap();

        assert_eq!(ids, vec!["neutral_0", "neutral_1", "neutral_2"]);
        assert_eq!(session.captures().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        let pixels: Vec<u8> = session
            .captures()
            .iter()
            .map(|image| image.image().get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(pixels, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_burst_appends_after_first() {
        let buffer = CaptureBuffer::new(Duration::from_millis(10));
        let mut frames = ScriptedFrames::new();
        let mut session = SessionState::new();
        let guard = StageGuard::unbounded(Stage::Capture);

        for label in [Expression::Neutral, Expression::Happy] {
            buffer
                .capture_burst(label, &mut frames, &mut session, &guard)
                .await
                .unwrap();
        }

        let ids: Vec<&str> = session.captures().iter().map(|image| image.id()).collect();
        assert_eq!(
            ids,
            vec!["neutral_0", "neutral_1", "neutral_2", "happy_0", "happy_1", "happy_2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_burst_leaves_session_untouched() {
        let buffer = CaptureBuffer::new(Duration::from_millis(1000));
        let mut frames = ScriptedFrames::new();
        let mut session = SessionState::new();
        let guard = StageGuard::new(Stage::Capture, Some(Duration::from_millis(1500)), None);

        let err = buffer
            .capture_burst(Expression::Happy, &mut frames, &mut session, &guard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StageTimeout { stage: Stage::Capture, .. }));
        assert!(session.captures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_aborts_burst() {
        let buffer = CaptureBuffer::default();
        let mut frames = ScriptedFrames::failing_after(1);
        let mut session = SessionState::new();
        let guard = StageGuard::unbounded(Stage::Capture);

        let err = buffer
            .capture_burst(Expression::Neutral, &mut frames, &mut session, &guard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::FrameCapture { .. }));
        assert!(session.captures().is_empty());
    }
}
