//! Liveness-gated face enrollment: head-turn and expression gates, burst
//! capture, two-image selection and all-or-nothing embedding extraction.

pub mod artifact;
pub mod burst;
pub mod capture;
pub mod detector;
#[cfg(feature = "dlib")]
pub mod dlib;
pub mod errors;
pub mod extractor;
pub mod gates;
pub mod geometry;
pub mod guard;
pub mod pipeline;
pub mod prompt;
pub mod selection;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use artifact::{load_artifact, write_artifact, EnrollmentArtifact, ARTIFACT_VERSION};
pub use detector::{initialise_models, LandmarkDetector, ModelLoader, ModelsReady};
pub use errors::{AppError, AppResult};
pub use pipeline::{Collaborators, PipelineConfig, PipelineController};
