//! Liveness gates: stages that block until the user turns their head or
//! shows an expression.

mod direction;
mod expression;

pub use direction::DirectionGate;
pub use expression::ExpressionGate;

use crate::capture::FrameSource;
use crate::detector::{DetectOptions, Detection, LandmarkDetector};
use crate::errors::AppResult;
use crate::guard::StageGuard;

/// One poll: grab a frame and run detection on it. Both awaits are bounded
/// by `guard`.
async fn poll_once(
    frames: &mut dyn FrameSource,
    detector: &mut dyn LandmarkDetector,
    options: DetectOptions,
    guard: &StageGuard,
) -> AppResult<Option<Detection>> {
    let frame = guard.run(frames.get_frame()).await??;
    guard.run(detector.detect(&frame.image, options)).await?
}
