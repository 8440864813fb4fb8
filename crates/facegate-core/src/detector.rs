//! Contract with the external face model: landmarks, expression scores and
//! identity descriptors computed from a single image.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Keypoints used by the direction gate. Coordinates are in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub jaw_left: Point,
    pub jaw_right: Point,
}

impl Landmarks {
    pub const LAYOUT_68_LEN: usize = 68;

    /// Picks the anchors out of the common 68-point layout: jaw outline is
    /// 0..=16, left eye starts at 36 and right eye at 42.
    pub fn from_68_points(points: &[Point]) -> Option<Self> {
        if points.len() < Self::LAYOUT_68_LEN {
            return None;
        }
        Some(Self {
            left_eye: points[36],
            right_eye: points[42],
            jaw_left: points[0],
            jaw_right: points[16],
        })
    }

    pub fn left_distance(&self) -> f64 {
        self.left_eye.distance(&self.jaw_left)
    }

    pub fn right_distance(&self) -> f64 {
        self.right_eye.distance(&self.jaw_right)
    }
}

/// Expression labels in their canonical order. The order drives score
/// iteration and therefore argmax tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expression {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown expression label '{value}'"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores(BTreeMap<Expression, f64>);

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scores are probabilities; out-of-range values are clamped and NaN is
    /// dropped.
    pub fn insert(&mut self, label: Expression, score: f64) {
        if score.is_nan() {
            return;
        }
        self.0.insert(label, score.clamp(0.0, 1.0));
    }

    pub fn get(&self, label: Expression) -> Option<f64> {
        self.0.get(&label).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Label with the highest score. On a tie the label later in canonical
    /// order wins.
    pub fn dominant(&self) -> Option<Expression> {
        let mut best: Option<(Expression, f64)> = None;
        for (&label, &score) in &self.0 {
            match best {
                Some((_, best_score)) if score < best_score => {}
                _ => best = Some((label, score)),
            }
        }
        best.map(|(label, _)| label)
    }
}

impl FromIterator<(Expression, f64)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (Expression, f64)>>(iter: I) -> Self {
        let mut scores = ExpressionScores::new();
        for (label, score) in iter {
            scores.insert(label, score);
        }
        scores
    }
}

/// Identity descriptor produced by the face encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn magnitude(&self) -> f64 {
        self.0.iter().map(|value| value * value).sum::<f64>().sqrt()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub landmarks: Option<Landmarks>,
    pub expressions: Option<ExpressionScores>,
    pub embedding: Option<Embedding>,
}

/// Selects which outputs a detection call computes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectOptions {
    pub landmarks: bool,
    pub expressions: bool,
    pub descriptor: bool,
}

impl DetectOptions {
    pub fn landmarks() -> Self {
        Self {
            landmarks: true,
            ..Self::default()
        }
    }

    pub fn expressions() -> Self {
        Self {
            expressions: true,
            ..Self::default()
        }
    }

    /// Descriptors are computed from aligned landmarks, so both are requested.
    pub fn descriptor() -> Self {
        Self {
            landmarks: true,
            descriptor: true,
            ..Self::default()
        }
    }
}

/// Face model. `Ok(None)` means no face was found in the image; `Err` is a
/// backend failure and is fatal to the session.
#[async_trait]
pub trait LandmarkDetector: Send {
    async fn detect(
        &mut self,
        image: &RgbImage,
        options: DetectOptions,
    ) -> AppResult<Option<Detection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCapability {
    Detector,
    Landmark,
    Expression,
}

impl ModelCapability {
    pub const ALL: [ModelCapability; 3] = [
        ModelCapability::Detector,
        ModelCapability::Landmark,
        ModelCapability::Expression,
    ];
}

impl fmt::Display for ModelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelCapability::Detector => "detector",
            ModelCapability::Landmark => "landmark",
            ModelCapability::Expression => "expression",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait ModelLoader: Send {
    async fn load(&mut self, capability: ModelCapability) -> Result<(), String>;
}

/// Proof that every model capability loaded. Only [`initialise_models`]
/// constructs it, and the pipeline controller requires one.
#[derive(Debug)]
pub struct ModelsReady {
    _private: (),
}

pub async fn initialise_models<L>(loader: &mut L) -> AppResult<ModelsReady>
where
    L: ModelLoader + ?Sized,
{
    for capability in ModelCapability::ALL {
        info!(%capability, "loading model");
        loader
            .load(capability)
            .await
            .map_err(|message| AppError::ModelLoad {
                capability: capability.to_string(),
                message,
            })?;
    }
    Ok(ModelsReady { _private: () })
}
