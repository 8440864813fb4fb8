use std::path::PathBuf;

use facegate_core::artifact::{write_artifact, EnrollmentArtifact};
use facegate_core::capture::FrameSource;
use facegate_core::detector::{LandmarkDetector, ModelsReady};
use facegate_core::guard::cancel_channel;
use facegate_core::pipeline::{Collaborators, PipelineController};
use facegate_core::prompt::Prompter;
use facegate_core::selection::SelectionInput;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{EnrollArgs, OutputMode};
use crate::config::{load_enroll_settings, EnrollSettings};
use crate::errors::AppResult;
use crate::terminal::{LineSelectionInput, TerminalPrompter};

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub artifact: EnrollmentArtifact,
    pub output_path: Option<PathBuf>,
    pub capture_dir: PathBuf,
}

/// Interactive collaborators wired to the terminal.
pub struct TerminalIo {
    pub input: Box<dyn SelectionInput>,
    pub prompter: Box<dyn Prompter>,
}

impl TerminalIo {
    pub fn new(settings: &EnrollSettings, mode: OutputMode) -> Self {
        let prompter = TerminalPrompter::new(mode, &settings.capture_dir);
        let input = LineSelectionInput::stdin(mode, prompter.index());
        Self {
            input: Box::new(input),
            prompter: Box::new(prompter),
        }
    }
}

pub fn run_enroll(args: &EnrollArgs, mode: OutputMode) -> AppResult<EnrollOutcome> {
    let settings = load_enroll_settings(args)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let frames = open_frames(&settings)?;
        let (detector, models) = load_detector(&settings).await?;
        let io = TerminalIo::new(&settings, mode);
        let collaborators = Collaborators {
            frames,
            detector,
            input: io.input,
            prompter: io.prompter,
        };

        let (cancel_tx, cancel_rx) = cancel_channel();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling enrollment");
                let _ = cancel_tx.send(true);
            }
        });
        let outcome = run_enroll_with(&settings, collaborators, models, cancel_rx).await;
        interrupt.abort();
        outcome
    })
}

/// Runs one session and persists the artifact when an output path is set.
pub async fn run_enroll_with(
    settings: &EnrollSettings,
    collaborators: Collaborators,
    models: ModelsReady,
    cancel: watch::Receiver<bool>,
) -> AppResult<EnrollOutcome> {
    let mut controller = PipelineController::new(settings.pipeline.clone(), collaborators, models)?
        .with_cancel(cancel);
    let artifact = controller.run().await?;

    if let Some(path) = &settings.output {
        write_artifact(&artifact, path)?;
        info!(path = %path.display(), "wrote enrollment artifact");
    }

    Ok(EnrollOutcome {
        artifact,
        output_path: settings.output.clone(),
        capture_dir: settings.capture_dir.clone(),
    })
}

#[cfg(feature = "camera")]
fn open_frames(settings: &EnrollSettings) -> AppResult<Box<dyn FrameSource>> {
    use facegate_core::capture::{check_device, CaptureConfig, DeviceLocator, V4lFrameSource};

    let device = DeviceLocator::from_option(Some(settings.device.clone()));
    check_device(&device)?;
    Ok(Box::new(V4lFrameSource::new(CaptureConfig {
        device,
        pixel_format: settings.pixel_format.clone(),
        warmup_frames: settings.warmup_frames,
    })))
}

#[cfg(not(feature = "camera"))]
fn open_frames(_settings: &EnrollSettings) -> AppResult<Box<dyn FrameSource>> {
    Err(facegate_core::errors::AppError::BackendUnavailable {
        backend: "camera",
        feature: "camera",
    })
}

#[cfg(feature = "dlib")]
async fn load_detector(
    settings: &EnrollSettings,
) -> AppResult<(Box<dyn LandmarkDetector>, ModelsReady)> {
    use facegate_core::detector::initialise_models;
    use facegate_core::dlib::{DlibDetector, ModelPaths};

    let paths = ModelPaths::resolve(
        settings.landmark_model.as_deref(),
        settings.encoder_model.as_deref(),
    )?;
    let mut detector = DlibDetector::new(paths, settings.jitters);
    let models = initialise_models(&mut detector).await?;
    Ok((Box::new(detector), models))
}

#[cfg(not(feature = "dlib"))]
async fn load_detector(
    _settings: &EnrollSettings,
) -> AppResult<(Box<dyn LandmarkDetector>, ModelsReady)> {
    Err(facegate_core::errors::AppError::BackendUnavailable {
        backend: "dlib face model",
        feature: "dlib",
    })
}
