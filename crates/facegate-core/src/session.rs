use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use uuid::Uuid;

use crate::capture::Frame;
use crate::detector::{Embedding, Expression};

/// Images appended per successful expression match.
pub const BURST_SIZE: usize = 3;
/// Images the user must pick for extraction.
pub const SELECTION_SIZE: usize = 2;
/// Expression prompts in the order the session runs them.
pub const EXPRESSION_PROMPTS: [Expression; 2] = [Expression::Neutral, Expression::Happy];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Direction,
    Expression,
    Capture,
    Selection,
    Extraction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Direction => "direction",
            Stage::Expression => "expression",
            Stage::Capture => "capture",
            Stage::Selection => "selection",
            Stage::Extraction => "extraction",
        };
        f.write_str(name)
    }
}

/// Head-turn flags. Both only ever go from false to true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionState {
    left: bool,
    right: bool,
}

impl DirectionState {
    pub fn left(&self) -> bool {
        self.left
    }

    pub fn right(&self) -> bool {
        self.right
    }

    pub fn is_complete(&self) -> bool {
        self.left && self.right
    }

    pub(crate) fn mark_left(&mut self) {
        self.left = true;
    }

    pub(crate) fn mark_right(&mut self) {
        self.right = true;
    }
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    id: String,
    label: Expression,
    index: usize,
    image: RgbImage,
    captured_at: DateTime<Utc>,
    selected: bool,
}

impl CapturedImage {
    pub fn new(label: Expression, index: usize, frame: Frame) -> Self {
        Self {
            id: format!("{label}_{index}"),
            label,
            index,
            image: frame.image,
            captured_at: frame.captured_at,
            selected: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> Expression {
        self.label
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }
}

/// State of one enrollment run. Owned by the pipeline controller; stages
/// borrow it for the duration of their turn.
#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    direction: DirectionState,
    pending_expressions: VecDeque<Expression>,
    captures: Vec<CapturedImage>,
    embeddings: Option<[Embedding; 2]>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            direction: DirectionState::default(),
            pending_expressions: EXPRESSION_PROMPTS.into_iter().collect(),
            captures: Vec::new(),
            embeddings: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> DirectionState {
        self.direction
    }

    pub fn pending_expressions(&self) -> impl Iterator<Item = Expression> + '_ {
        self.pending_expressions.iter().copied()
    }

    /// Captures in the order they were taken.
    pub fn captures(&self) -> &[CapturedImage] {
        &self.captures
    }

    pub fn capture(&self, id: &str) -> Option<&CapturedImage> {
        self.captures.iter().find(|image| image.id == id)
    }

    /// Selected ids in capture order.
    pub fn selected_ids(&self) -> Vec<&str> {
        self.captures
            .iter()
            .filter(|image| image.selected)
            .map(|image| image.id.as_str())
            .collect()
    }

    pub fn selected_count(&self) -> usize {
        self.captures.iter().filter(|image| image.selected).count()
    }

    pub fn embeddings(&self) -> Option<&[Embedding; 2]> {
        self.embeddings.as_ref()
    }

    /// Starts over with a fresh id and empty state.
    pub fn reset(&mut self) {
        *self = SessionState::new();
    }

    pub(crate) fn direction_mut(&mut self) -> &mut DirectionState {
        &mut self.direction
    }

    /// The prompt still to be satisfied. It stays queued until its burst is
    /// stored so an aborted prompt is never silently skipped.
    pub(crate) fn current_expression(&self) -> Option<Expression> {
        self.pending_expressions.front().copied()
    }

    pub(crate) fn complete_expression(&mut self, expression: Expression) {
        if self.pending_expressions.front() == Some(&expression) {
            self.pending_expressions.pop_front();
        }
    }

    pub(crate) fn append_captures(&mut self, burst: Vec<CapturedImage>) {
        self.captures.extend(burst);
    }

    pub(crate) fn captures_mut(&mut self) -> &mut [CapturedImage] {
        &mut self.captures
    }

    pub(crate) fn set_embeddings(&mut self, embeddings: [Embedding; 2]) {
        self.embeddings = Some(embeddings);
    }
}
