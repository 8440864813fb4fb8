use std::fmt;

use serde::Serialize;

use crate::detector::Expression;
use crate::session::CapturedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// User-facing guidance emitted by the stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "prompt", rename_all = "snake_case")]
pub enum Prompt {
    LookLeft,
    LookRight,
    DirectionDetected { side: Side },
    DirectionsComplete,
    ShowExpression { label: Expression },
    ExpressionDetected { label: Expression },
    BurstCaptured { label: Expression, ids: Vec<String> },
    SelectImages { ids: Vec<String> },
    SelectionChanged { selected: Vec<String> },
    SelectionFull { id: String },
    /// Correctable: confirm pressed with the wrong number of images.
    SelectionRejected { selected: usize },
    /// Correctable: toggle named an id that was never captured.
    UnknownImage { id: String },
    SelectionConfirmed { ids: Vec<String> },
    ExtractionComplete,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::LookLeft => f.write_str("Please look to the left"),
            Prompt::LookRight => f.write_str("Please look to the right"),
            Prompt::DirectionDetected { side } => write!(f, "Looking to the {side}"),
            Prompt::DirectionsComplete => f.write_str("Both directions detected"),
            Prompt::ShowExpression { label } => write!(f, "Please show a {label} expression"),
            Prompt::ExpressionDetected { label } => write!(f, "{label} expression detected"),
            Prompt::BurstCaptured { label, ids } => {
                write!(f, "Captured {} {label} images: {}", ids.len(), ids.join(", "))
            }
            Prompt::SelectImages { ids } => {
                write!(f, "Select exactly 2 images, then confirm: {}", ids.join(", "))
            }
            Prompt::SelectionChanged { selected } if selected.is_empty() => {
                f.write_str("Selected: none")
            }
            Prompt::SelectionChanged { selected } => write!(f, "Selected: {}", selected.join(", ")),
            Prompt::SelectionFull { id } => {
                write!(f, "Already 2 images selected; deselect one before adding {id}")
            }
            Prompt::SelectionRejected { selected } => {
                write!(f, "Please select exactly 2 images ({selected} selected)")
            }
            Prompt::UnknownImage { id } => write!(f, "No captured image named {id}"),
            Prompt::SelectionConfirmed { ids } => write!(f, "Extracting embeddings for {}", ids.join(", ")),
            Prompt::ExtractionComplete => f.write_str("Embeddings extracted"),
        }
    }
}

/// Side-effect sink for user guidance. Holds no pipeline logic.
pub trait Prompter: Send {
    fn show(&mut self, prompt: &Prompt);

    /// Called once a burst has been appended so the UI can present images.
    fn present_captures(&mut self, _captures: &[CapturedImage]) {}
}

/// Discards every prompt.
#[derive(Debug, Default)]
pub struct SilentPrompter;

impl Prompter for SilentPrompter {
    fn show(&mut self, _prompt: &Prompt) {}
}
