//! dlib-backed face model: HOG face detector, 68-point shape predictor and
//! the ResNet face encoder.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, FaceLandmarks,
    ImageMatrix, LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
};
use image::RgbImage;
use tracing::debug;

use crate::detector::{
    DetectOptions, Detection, Embedding, LandmarkDetector, Landmarks, ModelCapability,
    ModelLoader, Point,
};
use crate::errors::{AppError, AppResult};
use crate::geometry::{ExpressionModel, MouthGeometryModel};

pub const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
pub const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

impl ModelPaths {
    /// Explicit paths win over the `DLIB_*` environment variables.
    pub fn resolve(landmark: Option<&Path>, encoder: Option<&Path>) -> AppResult<Self> {
        let landmark = landmark
            .map(Path::to_path_buf)
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "landmark predictor",
                flag: "--landmark-model",
                env: LANDMARK_ENV,
            })?;
        let encoder = encoder
            .map(Path::to_path_buf)
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "face encoding network",
                flag: "--encoder-model",
                env: ENCODER_ENV,
            })?;
        Ok(Self { landmark, encoder })
    }
}

/// The native models. dlib calls block for tens of milliseconds, so they only
/// run on the blocking pool through [`run_on_models`].
#[derive(Default)]
struct DlibModels {
    detector: Option<FaceDetector>,
    encoder: Option<FaceEncoderNetwork>,
    predictor: Option<LandmarkPredictor>,
}

struct LocatedFace {
    points: Vec<Point>,
    embedding: Option<Embedding>,
}

impl DlibModels {
    /// Finds the largest face and its 68 landmark points, plus its encoding
    /// when `descriptor` is set.
    fn locate(&self, image: &RgbImage, descriptor: bool, jitters: u32) -> AppResult<Option<LocatedFace>> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| not_loaded(ModelCapability::Detector))?;
        let predictor = self
            .predictor
            .as_ref()
            .ok_or_else(|| not_loaded(ModelCapability::Landmark))?;

        let matrix = ImageMatrix::from_image(image);
        let locations = detector.face_locations(&matrix);
        let Some(face) = locations.iter().max_by_key(|rect| area(rect)) else {
            return Ok(None);
        };

        let shape = predictor.face_landmarks(&matrix, face);
        let points = shape
            .iter()
            .map(|point| Point::new(point.x() as f64, point.y() as f64))
            .collect();

        let embedding = if descriptor {
            let encoder = self
                .encoder
                .as_ref()
                .ok_or_else(|| not_loaded(ModelCapability::Detector))?;
            describe(encoder, &matrix, shape, jitters)
        } else {
            None
        };
        Ok(Some(LocatedFace { points, embedding }))
    }
}

/// Runs `work` against the shared models on the blocking pool. The models
/// outlive a caller that stops waiting.
async fn run_on_models<M, T, F>(models: &Arc<Mutex<M>>, work: F) -> AppResult<T>
where
    M: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut M) -> T + Send + 'static,
{
    let models = Arc::clone(models);
    tokio::task::spawn_blocking(move || {
        let mut guard = models.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        work(&mut guard)
    })
    .await
    .map_err(|err| AppError::DetectorBackend(format!("dlib worker failed: {err}")))
}

fn not_loaded(capability: ModelCapability) -> AppError {
    AppError::DetectorBackend(format!("{capability} model used before it was loaded"))
}

/// Weights are loaded lazily through [`ModelLoader`]; detection before every
/// capability has loaded is a backend error.
pub struct DlibDetector {
    paths: ModelPaths,
    jitters: u32,
    models: Arc<Mutex<DlibModels>>,
    expressions: Box<dyn ExpressionModel>,
    expressions_loaded: bool,
}

impl DlibDetector {
    pub fn new(paths: ModelPaths, jitters: u32) -> Self {
        Self::with_expression_model(paths, jitters, Box::new(MouthGeometryModel::default()))
    }

    pub fn with_expression_model(
        paths: ModelPaths,
        jitters: u32,
        expressions: Box<dyn ExpressionModel>,
    ) -> Self {
        Self {
            paths,
            jitters,
            models: Arc::new(Mutex::new(DlibModels::default())),
            expressions,
            expressions_loaded: false,
        }
    }
}

#[async_trait]
impl ModelLoader for DlibDetector {
    async fn load(&mut self, capability: ModelCapability) -> Result<(), String> {
        match capability {
            // The encoder is only needed alongside detection, so it loads
            // with the detector.
            ModelCapability::Detector => {
                let path = self.paths.encoder.clone();
                debug!(path = %path.display(), "loading encoder model");
                run_on_models(&self.models, move |models| {
                    models.encoder = Some(FaceEncoderNetwork::open(&path)?);
                    models.detector = Some(FaceDetector::new());
                    Ok::<_, String>(())
                })
                .await
                .map_err(|err| err.to_string())??;
            }
            ModelCapability::Landmark => {
                let path = self.paths.landmark.clone();
                debug!(path = %path.display(), "loading landmark model");
                run_on_models(&self.models, move |models| {
                    models.predictor = Some(LandmarkPredictor::open(&path)?);
                    Ok::<_, String>(())
                })
                .await
                .map_err(|err| err.to_string())??;
            }
            ModelCapability::Expression => {
                self.expressions.load()?;
                self.expressions_loaded = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LandmarkDetector for DlibDetector {
    async fn detect(
        &mut self,
        image: &RgbImage,
        options: DetectOptions,
    ) -> AppResult<Option<Detection>> {
        if options.expressions && !self.expressions_loaded {
            return Err(not_loaded(ModelCapability::Expression));
        }

        let image = image.clone();
        let jitters = self.jitters;
        let located = run_on_models(&self.models, move |models| {
            models.locate(&image, options.descriptor, jitters)
        })
        .await??;
        let Some(face) = located else {
            return Ok(None);
        };

        let mut detection = Detection::default();
        if options.landmarks {
            detection.landmarks = Landmarks::from_68_points(&face.points);
        }
        if options.expressions {
            detection.expressions = self.expressions.score(&face.points);
        }
        detection.embedding = face.embedding;
        Ok(Some(detection))
    }
}

fn describe(
    encoder: &FaceEncoderNetwork,
    matrix: &ImageMatrix,
    shape: FaceLandmarks,
    jitters: u32,
) -> Option<Embedding> {
    let encodings = encoder.get_face_encodings(matrix, &[shape], jitters);
    encodings
        .iter()
        .next()
        .map(|encoding| Embedding::new(encoding.as_ref().to_vec()))
}

fn area(rect: &Rectangle) -> i64 {
    (rect.right - rect.left).max(0) * (rect.bottom - rect.top).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_model_paths_win() {
        let paths = ModelPaths::resolve(
            Some(Path::new("/models/landmarks.dat")),
            Some(Path::new("/models/encoder.dat")),
        )
        .unwrap();
        assert_eq!(paths.landmark, PathBuf::from("/models/landmarks.dat"));
        assert_eq!(paths.encoder, PathBuf::from("/models/encoder.dat"));
    }

    #[tokio::test]
    async fn detection_before_loading_is_an_error() {
        let mut detector = DlibDetector::new(
            ModelPaths {
                landmark: "landmarks.dat".into(),
                encoder: "encoder.dat".into(),
            },
            1,
        );
        let err = detector
            .detect(&RgbImage::new(8, 8), DetectOptions::landmarks())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DetectorBackend(msg) if msg.contains("detector")));
    }

    #[tokio::test]
    async fn model_work_leaves_the_runtime_free() {
        use std::time::{Duration, Instant};

        let models = Arc::new(Mutex::new(0u32));
        let slow = async {
            let calls = run_on_models(&models, |calls| {
                std::thread::sleep(Duration::from_millis(60));
                *calls += 1;
                *calls
            })
            .await;
            (calls, Instant::now())
        };
        let ticker = async {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Instant::now()
        };

        // Single-threaded runtime: the ticker can only finish first if the
        // slow call runs off the executor thread.
        let ((calls, slow_done), ticker_done) = tokio::join!(slow, ticker);
        assert_eq!(calls.unwrap(), 1);
        assert!(ticker_done < slow_done);
        assert_eq!(*models.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn expression_request_needs_expression_model() {
        let mut detector = DlibDetector::new(
            ModelPaths {
                landmark: "landmarks.dat".into(),
                encoder: "encoder.dat".into(),
            },
            1,
        );
        let err = detector
            .detect(&RgbImage::new(8, 8), DetectOptions::expressions())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DetectorBackend(msg) if msg.contains("expression")));
    }
}
