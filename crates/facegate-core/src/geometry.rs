//! Expression scoring from 68-point landmark geometry.

use crate::detector::{Expression, ExpressionScores, Point};

/// Turns a face's landmark points into expression probabilities.
pub trait ExpressionModel: Send {
    fn load(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn score(&self, points: &[Point]) -> Option<ExpressionScores>;
}

/// Mouth-shape heuristic: raised, widened lip corners read as happy, a
/// wide-open mouth as surprised, anything else as neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthGeometryModel {
    pub lift_gain: f64,
    pub width_gain: f64,
    pub rest_width: f64,
    pub open_gain: f64,
    pub rest_opening: f64,
}

impl Default for MouthGeometryModel {
    fn default() -> Self {
        Self {
            lift_gain: 40.0,
            width_gain: 12.0,
            rest_width: 0.40,
            open_gain: 30.0,
            rest_opening: 0.12,
        }
    }
}

const JAW_LEFT: usize = 0;
const JAW_RIGHT: usize = 16;
const MOUTH_LEFT: usize = 48;
const UPPER_LIP_TOP: usize = 51;
const MOUTH_RIGHT: usize = 54;
const LOWER_LIP_BOTTOM: usize = 57;
const INNER_UPPER: usize = 62;
const INNER_LOWER: usize = 66;

impl ExpressionModel for MouthGeometryModel {
    fn score(&self, points: &[Point]) -> Option<ExpressionScores> {
        if points.len() < 68 {
            return None;
        }
        let face_width = points[JAW_LEFT].distance(&points[JAW_RIGHT]);
        if face_width <= f64::EPSILON {
            return None;
        }

        let mouth_width = points[MOUTH_LEFT].distance(&points[MOUTH_RIGHT]) / face_width;
        // Image y grows downwards, so lifted corners sit above the lip centre.
        let lip_centre_y = (points[UPPER_LIP_TOP].y + points[LOWER_LIP_BOTTOM].y) / 2.0;
        let corner_y = (points[MOUTH_LEFT].y + points[MOUTH_RIGHT].y) / 2.0;
        let lift = (lip_centre_y - corner_y) / face_width;
        let opening = points[INNER_UPPER].distance(&points[INNER_LOWER]) / face_width;

        let happy = logistic(self.lift_gain * lift + self.width_gain * (mouth_width - self.rest_width));
        let surprised = logistic(self.open_gain * (opening - self.rest_opening));
        let neutral = (1.0 - happy.max(surprised)).max(0.0);

        let total = happy + surprised + neutral;
        Some(
            [
                (Expression::Neutral, neutral / total),
                (Expression::Happy, happy / total),
                (Expression::Surprised, surprised / total),
            ]
            .into_iter()
            .collect(),
        )
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Face 200px wide with a configurable mouth.
    fn face(corner_lift: f64, mouth_half_width: f64, opening: f64) -> Vec<Point> {
        let mut points = vec![Point::new(100.0, 100.0); 68];
        points[JAW_LEFT] = Point::new(0.0, 100.0);
        points[JAW_RIGHT] = Point::new(200.0, 100.0);
        points[UPPER_LIP_TOP] = Point::new(100.0, 150.0);
        points[LOWER_LIP_BOTTOM] = Point::new(100.0, 170.0);
        points[MOUTH_LEFT] = Point::new(100.0 - mouth_half_width, 160.0 - corner_lift);
        points[MOUTH_RIGHT] = Point::new(100.0 + mouth_half_width, 160.0 - corner_lift);
        points[INNER_UPPER] = Point::new(100.0, 158.0);
        points[INNER_LOWER] = Point::new(100.0, 158.0 + opening);
        points
    }

    #[test]
    fn relaxed_mouth_reads_neutral() {
        let scores = MouthGeometryModel::default().score(&face(0.0, 38.0, 0.0)).unwrap();
        assert_eq!(scores.dominant(), Some(Expression::Neutral));
    }

    #[test]
    fn lifted_wide_mouth_reads_happy() {
        let scores = MouthGeometryModel::default().score(&face(10.0, 48.0, 2.0)).unwrap();
        assert_eq!(scores.dominant(), Some(Expression::Happy));
    }

    #[test]
    fn open_mouth_reads_surprised() {
        let scores = MouthGeometryModel::default().score(&face(0.0, 36.0, 60.0)).unwrap();
        assert_eq!(scores.dominant(), Some(Expression::Surprised));
    }

    #[test]
    fn scores_sum_to_one() {
        let scores = MouthGeometryModel::default().score(&face(4.0, 40.0, 10.0)).unwrap();
        let total: f64 = Expression::ALL.iter().filter_map(|label| scores.get(*label)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn short_layouts_are_not_scored() {
        assert!(MouthGeometryModel::default().score(&[Point::new(0.0, 0.0); 10]).is_none());
    }
}
