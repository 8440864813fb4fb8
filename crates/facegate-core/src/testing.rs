//! Scripted collaborators for driving the pipeline without a camera or a
//! face model.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::capture::{Frame, FrameSource};
use crate::detector::{
    DetectOptions, Detection, Embedding, Expression, ExpressionScores, LandmarkDetector,
    Landmarks, ModelCapability, ModelLoader, Point,
};
use crate::errors::{AppError, AppResult};
use crate::prompt::{Prompt, Prompter};
use crate::selection::{SelectionEvent, SelectionInput};
use crate::session::CapturedImage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Produces 4x4 frames whose pixels all carry the frame counter, so tests
/// can tell which frame ended up where.
#[derive(Debug, Default)]
pub struct ScriptedFrames {
    served: u64,
    fail_after: Option<u64>,
}

impl ScriptedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `count` frames, then reports a device failure.
    pub fn failing_after(count: u64) -> Self {
        Self {
            served: 0,
            fail_after: Some(count),
        }
    }

    pub fn served(&self) -> u64 {
        self.served
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn get_frame(&mut self) -> AppResult<Frame> {
        if self.fail_after.is_some_and(|limit| self.served >= limit) {
            return Err(AppError::FrameCapture {
                device: "scripted".into(),
                message: "device unplugged".into(),
            });
        }
        let value = (self.served % 256) as u8;
        self.served += 1;
        Ok(Frame::new(RgbImage::from_pixel(4, 4, Rgb([value; 3]))))
    }
}

/// Frame marker written by [`ScriptedFrames`].
pub fn frame_marker(image: &RgbImage) -> u8 {
    image.get_pixel(0, 0).0[0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectCall {
    pub options: DetectOptions,
    pub marker: u8,
}

/// Replays detection results in order. Once the script runs out, every call
/// returns the fallback (no face unless configured).
#[derive(Default)]
pub struct ScriptedDetector {
    script: VecDeque<AppResult<Option<Detection>>>,
    fallback: Option<Detection>,
    calls: Arc<Mutex<Vec<DetectCall>>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, result: AppResult<Option<Detection>>) -> Self {
        self.script.push_back(result);
        self
    }

    pub fn then_no_face(self) -> Self {
        self.then(Ok(None))
    }

    pub fn then_distances(self, left: f64, right: f64) -> Self {
        self.then(Ok(Some(Detection {
            landmarks: Some(landmarks_with_distances(left, right)),
            ..Detection::default()
        })))
    }

    pub fn then_scores(self, entries: &[(Expression, f64)]) -> Self {
        self.then(Ok(Some(Detection {
            expressions: Some(scores(entries)),
            ..Detection::default()
        })))
    }

    pub fn then_embedding(self, values: Vec<f64>) -> Self {
        self.then(Ok(Some(Detection {
            landmarks: Some(landmarks_with_distances(80.0, 80.0)),
            embedding: Some(Embedding::new(values)),
            ..Detection::default()
        })))
    }

    pub fn then_error(self, message: &str) -> Self {
        self.then(Err(AppError::DetectorBackend(message.to_string())))
    }

    pub fn otherwise(mut self, detection: Detection) -> Self {
        self.fallback = Some(detection);
        self
    }

    /// Shared view of every call made so far.
    pub fn calls(&self) -> Arc<Mutex<Vec<DetectCall>>> {
        Arc::clone(&self.calls)
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl LandmarkDetector for ScriptedDetector {
    async fn detect(
        &mut self,
        image: &RgbImage,
        options: DetectOptions,
    ) -> AppResult<Option<Detection>> {
        lock(&self.calls).push(DetectCall {
            options,
            marker: frame_marker(image),
        });
        match self.script.pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Records every prompt shown.
#[derive(Debug, Clone, Default)]
pub struct RecordingPrompter {
    prompts: Arc<Mutex<Vec<Prompt>>>,
    presented: Arc<Mutex<Vec<usize>>>,
}

impl RecordingPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        lock(&self.prompts).clone()
    }

    /// Capture-list sizes seen by `present_captures`.
    pub fn presented(&self) -> Vec<usize> {
        lock(&self.presented).clone()
    }
}

impl Prompter for RecordingPrompter {
    fn show(&mut self, prompt: &Prompt) {
        lock(&self.prompts).push(prompt.clone());
    }

    fn present_captures(&mut self, captures: &[CapturedImage]) {
        lock(&self.presented).push(captures.len());
    }
}

/// Replays selection events. When exhausted it either reports the input as
/// closed or blocks forever.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    events: VecDeque<SelectionEvent>,
    hang_when_empty: bool,
}

impl ScriptedInput {
    pub fn new<I>(events: I) -> Self
    where
        I: IntoIterator<Item = SelectionEvent>,
    {
        Self {
            events: events.into_iter().collect(),
            hang_when_empty: false,
        }
    }

    pub fn hang_when_empty(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }
}

#[async_trait]
impl SelectionInput for ScriptedInput {
    async fn next_event(&mut self) -> AppResult<Option<SelectionEvent>> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.hang_when_empty => pending().await,
            None => Ok(None),
        }
    }
}

/// Loader that fails on one capability, or on none.
#[derive(Debug, Default)]
pub struct ScriptedLoader {
    pub fail_on: Option<ModelCapability>,
    pub loaded: Vec<ModelCapability>,
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&mut self, capability: ModelCapability) -> Result<(), String> {
        if self.fail_on == Some(capability) {
            return Err(format!("{capability} weights not found"));
        }
        self.loaded.push(capability);
        Ok(())
    }
}

/// Landmarks whose eye-to-jaw distances are exactly `left` and `right`.
pub fn landmarks_with_distances(left: f64, right: f64) -> Landmarks {
    Landmarks {
        left_eye: Point::new(100.0, 100.0),
        jaw_left: Point::new(100.0 - left, 100.0),
        right_eye: Point::new(200.0, 100.0),
        jaw_right: Point::new(200.0 + right, 100.0),
    }
}

pub fn scores(entries: &[(Expression, f64)]) -> ExpressionScores {
    entries.iter().copied().collect()
}
