use image::RgbImage;
use tracing::{debug, info};

use crate::detector::{DetectOptions, Embedding, LandmarkDetector};
use crate::errors::{AppError, AppResult};
use crate::guard::StageGuard;
use crate::selection::SelectedPair;

/// Computes identity descriptors for a confirmed pair. Either both come
/// back or neither does.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingExtractor;

impl EmbeddingExtractor {
    pub async fn extract(
        &self,
        detector: &mut dyn LandmarkDetector,
        pair: &SelectedPair,
        guard: &StageGuard,
    ) -> AppResult<[Embedding; 2]> {
        let [first, second] = pair.images();
        let a = self.describe(detector, first.id(), first.image(), guard).await?;
        let b = self.describe(detector, second.id(), second.image(), guard).await?;
        let embeddings = [a, b];

        validate_pair(&embeddings).map_err(|message| AppError::EmbeddingExtraction {
            image_id: format!("{}+{}", first.id(), second.id()),
            message,
        })?;
        info!(
            first = first.id(),
            second = second.id(),
            dimensions = embeddings[0].len(),
            "embeddings extracted"
        );
        Ok(embeddings)
    }

    async fn describe(
        &self,
        detector: &mut dyn LandmarkDetector,
        image_id: &str,
        image: &RgbImage,
        guard: &StageGuard,
    ) -> AppResult<Embedding> {
        debug!(image_id, "computing descriptor");
        let detection = guard
            .run(detector.detect(image, DetectOptions::descriptor()))
            .await??;
        let Some(detection) = detection else {
            return Err(extraction_error(image_id, "no face detected"));
        };
        detection
            .embedding
            .ok_or_else(|| extraction_error(image_id, "detector returned no descriptor"))
    }
}

fn extraction_error(image_id: &str, message: &str) -> AppError {
    AppError::EmbeddingExtraction {
        image_id: image_id.to_string(),
        message: message.to_string(),
    }
}

/// Both vectors must share one non-zero length and carry signal.
pub fn validate_pair(embeddings: &[Embedding; 2]) -> Result<(), String> {
    let [a, b] = embeddings;
    if a.is_empty() || b.is_empty() {
        return Err("embedding has no dimensions".into());
    }
    if a.len() != b.len() {
        return Err(format!(
            "embedding lengths differ ({} vs {})",
            a.len(),
            b.len()
        ));
    }
    for embedding in embeddings {
        if embedding.as_slice().iter().any(|value| !value.is_finite()) {
            return Err("embedding contains non-finite values".into());
        }
        if embedding.magnitude() == 0.0 {
            return Err("embedding has zero magnitude".into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::detector::Expression;
    use crate::selection::{confirm, toggle};
    use crate::session::{CapturedImage, SessionState, Stage};
    use crate::testing::{frame_marker, ScriptedDetector};
    use image::Rgb;

    fn pair() -> SelectedPair {
        let mut session = SessionState::new();
        session.append_captures(
            (0..3)
                .map(|i| {
                    let frame = Frame::new(RgbImage::from_pixel(2, 2, Rgb([10 + i as u8; 3])));
                    CapturedImage::new(Expression::Neutral, i, frame)
                })
                .collect(),
        );
        toggle(&mut session, "neutral_2").unwrap();
        toggle(&mut session, "neutral_0").unwrap();
        confirm(&session).unwrap()
    }

    #[tokio::test]
    async fn embeddings_follow_pair_order() {
        let pair = pair();
        let mut detector = ScriptedDetector::new()
            .then_embedding(vec![1.0, 0.0])
            .then_embedding(vec![0.0, 1.0]);
        let calls = detector.calls();
        let guard = StageGuard::unbounded(Stage::Extraction);

        let embeddings = EmbeddingExtractor
            .extract(&mut detector, &pair, &guard)
            .await
            .unwrap();

        assert_eq!(embeddings[0].as_slice(), &[1.0, 0.0]);
        assert_eq!(embeddings[1].as_slice(), &[0.0, 1.0]);
        let calls = calls.lock().unwrap();
        let markers: Vec<u8> = calls.iter().map(|call| call.marker).collect();
        assert_eq!(markers, vec![frame_marker(pair.images()[0].image()), 12]);
        assert!(calls.iter().all(|call| call.options == DetectOptions::descriptor()));
    }

    #[tokio::test]
    async fn missing_face_on_second_image_yields_nothing() {
        let pair = pair();
        let mut detector = ScriptedDetector::new()
            .then_embedding(vec![1.0, 0.0])
            .then_no_face();
        let guard = StageGuard::unbounded(Stage::Extraction);

        let err = EmbeddingExtractor
            .extract(&mut detector, &pair, &guard)
            .await
            .unwrap_err();
        match err {
            AppError::EmbeddingExtraction { image_id, .. } => assert_eq!(image_id, "neutral_2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_face_on_first_image_skips_second() {
        let pair = pair();
        let mut detector = ScriptedDetector::new()
            .then_no_face()
            .then_embedding(vec![1.0, 0.0]);
        let guard = StageGuard::unbounded(Stage::Extraction);

        assert!(EmbeddingExtractor
            .extract(&mut detector, &pair, &guard)
            .await
            .is_err());
        assert_eq!(detector.remaining(), 1);
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let pair = pair();
        let mut detector = ScriptedDetector::new()
            .then_embedding(vec![1.0, 0.0])
            .then_embedding(vec![1.0, 0.0, 0.5]);
        let guard = StageGuard::unbounded(Stage::Extraction);

        let err = EmbeddingExtractor
            .extract(&mut detector, &pair, &guard)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmbeddingExtraction { message, .. } if message.contains("lengths differ")));
    }

    #[test]
    fn zero_vectors_fail_validation() {
        let pair = [Embedding::new(vec![0.0, 0.0]), Embedding::new(vec![1.0, 0.0])];
        assert!(validate_pair(&pair).unwrap_err().contains("zero magnitude"));
        let pair = [Embedding::new(vec![]), Embedding::new(vec![])];
        assert!(validate_pair(&pair).is_err());
    }
}
