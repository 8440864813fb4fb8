//! End-to-end sequencing of an enrollment session.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::artifact::EnrollmentArtifact;
use crate::burst::CaptureBuffer;
use crate::capture::FrameSource;
use crate::detector::{LandmarkDetector, ModelsReady};
use crate::errors::{AppError, AppResult};
use crate::extractor::EmbeddingExtractor;
use crate::gates::{DirectionGate, ExpressionGate};
use crate::guard::{Backoff, StageGuard};
use crate::prompt::{Prompt, Prompter};
use crate::selection::{SelectionInput, SelectionStage};
use crate::session::{SessionState, Stage};

/// Runtime knobs for every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub direction_threshold: f64,
    pub poll_interval: Duration,
    pub direction_timeout: Option<Duration>,
    /// Applies to each expression prompt separately.
    pub expression_timeout: Option<Duration>,
    pub capture_timeout: Option<Duration>,
    pub selection_timeout: Option<Duration>,
    pub extraction_timeout: Option<Duration>,
    pub burst_interval: Duration,
    pub backoff: Backoff,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            direction_threshold: 40.0,
            poll_interval: Duration::from_millis(100),
            direction_timeout: Some(Duration::from_secs(60)),
            expression_timeout: Some(Duration::from_secs(60)),
            capture_timeout: Some(Duration::from_secs(10)),
            selection_timeout: None,
            extraction_timeout: Some(Duration::from_secs(30)),
            burst_interval: Duration::from_millis(1000),
            backoff: Backoff::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !self.direction_threshold.is_finite() || self.direction_threshold <= 0.0 {
            return Err(AppError::InvalidConfig(format!(
                "direction threshold must be a positive number, got {}",
                self.direction_threshold
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.backoff.base_delay.is_zero() || self.backoff.max_delay < self.backoff.base_delay {
            return Err(AppError::InvalidConfig(format!(
                "backoff must satisfy 0 < base ({:?}) <= max ({:?})",
                self.backoff.base_delay, self.backoff.max_delay
            )));
        }
        let timeouts = [
            ("direction", self.direction_timeout),
            ("expression", self.expression_timeout),
            ("capture", self.capture_timeout),
            ("selection", self.selection_timeout),
            ("extraction", self.extraction_timeout),
        ];
        for (stage, timeout) in timeouts {
            if timeout.is_some_and(|timeout| timeout.is_zero()) {
                return Err(AppError::InvalidConfig(format!(
                    "{stage} timeout must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    fn direction_gate(&self) -> DirectionGate {
        DirectionGate::new(self.direction_threshold, self.poll_interval, self.backoff)
    }

    fn expression_gate(&self) -> ExpressionGate {
        ExpressionGate::new(
            self.poll_interval,
            self.backoff,
            CaptureBuffer::new(self.burst_interval),
            self.capture_timeout,
        )
    }
}

/// The external collaborators a session talks to.
pub struct Collaborators {
    pub frames: Box<dyn FrameSource>,
    pub detector: Box<dyn LandmarkDetector>,
    pub input: Box<dyn SelectionInput>,
    pub prompter: Box<dyn Prompter>,
}

/// Owns the session and runs the stages strictly in order. The first fatal
/// error ends the run; nothing is retried or resumed.
pub struct PipelineController {
    config: PipelineConfig,
    collaborators: Collaborators,
    session: SessionState,
    cancel: Option<watch::Receiver<bool>>,
    consumed: bool,
    _models: ModelsReady,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, models: ModelsReady) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            session: SessionState::new(),
            cancel: None,
            consumed: false,
            _models: models,
        })
    }

    /// Aborts whichever stage is active once `true` is sent.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Discards all session state so the controller can run again.
    pub fn reset_session(&mut self) {
        self.session.reset();
        self.consumed = false;
    }

    /// Runs every stage once. A session that has already run, whether it
    /// finished or aborted, is refused until [`reset_session`] is called.
    ///
    /// [`reset_session`]: PipelineController::reset_session
    pub async fn run(&mut self) -> AppResult<EnrollmentArtifact> {
        let session_id = self.session.id();
        if self.consumed {
            warn!(%session_id, "refusing to rerun a consumed session");
            return Err(AppError::SessionConsumed { session_id });
        }
        self.consumed = true;
        info!(%session_id, "enrollment session started");
        match self.run_stages().await {
            Ok(artifact) => {
                info!(%session_id, sources = ?artifact.sources, "enrollment session complete");
                Ok(artifact)
            }
            Err(err) => {
                error!(%session_id, error = %err, "enrollment session aborted");
                Err(err)
            }
        }
    }

    async fn run_stages(&mut self) -> AppResult<EnrollmentArtifact> {
        let Collaborators {
            frames,
            detector,
            input,
            prompter,
        } = &mut self.collaborators;
        let session = &mut self.session;
        let config = &self.config;
        let cancel = self.cancel.as_ref();

        let guard = start_stage(cancel, Stage::Direction, config.direction_timeout);
        config
            .direction_gate()
            .run(frames.as_mut(), detector.as_mut(), session, prompter.as_mut(), &guard)
            .await?;

        let expression_gate = config.expression_gate();
        while let Some(target) = session.current_expression() {
            let guard = start_stage(cancel, Stage::Expression, config.expression_timeout);
            expression_gate
                .await_expression(
                    target,
                    frames.as_mut(),
                    detector.as_mut(),
                    session,
                    prompter.as_mut(),
                    &guard,
                )
                .await?;
            session.complete_expression(target);
        }

        let guard = start_stage(cancel, Stage::Selection, config.selection_timeout);
        let pair = SelectionStage
            .run(session, input.as_mut(), prompter.as_mut(), &guard)
            .await?;

        let guard = start_stage(cancel, Stage::Extraction, config.extraction_timeout);
        let embeddings = EmbeddingExtractor
            .extract(detector.as_mut(), &pair, &guard)
            .await?;
        session.set_embeddings(embeddings.clone());
        prompter.show(&Prompt::ExtractionComplete);

        EnrollmentArtifact::new(session.id(), pair.ids(), embeddings)
    }
}

fn start_stage(
    cancel: Option<&watch::Receiver<bool>>,
    stage: Stage,
    timeout: Option<Duration>,
) -> StageGuard {
    info!(%stage, timeout_secs = timeout.map(|t| t.as_secs()), "stage started");
    StageGuard::new(stage, timeout, cancel.cloned())
}
