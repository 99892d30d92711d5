use derive_more::Display;
use serde::Serialize;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;
pub const MIN_POINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Display, Serialize)]
pub enum NotPossible {
    #[display(fmt = "not enough data ({} point(s), need at least {})", points, MIN_POINTS)]
    Insufficient { points: usize },
    #[display(fmt = "all attempts share one index")]
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Display, Serialize)]
pub enum Prediction {
    #[display(fmt = "{:.2}", value)]
    Predicted {
        /// Fitted projection clipped into the score range.
        value: f64,
        raw: f64,
        slope: f64,
        intercept: f64,
    },
    #[display(fmt = "prediction not possible: {}", _0)]
    NotPossible(NotPossible),
}

impl Prediction {
    pub fn value(&self) -> Option<f64> {
        match self {
            Prediction::Predicted { value, .. } => Some(*value),
            Prediction::NotPossible(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares over `(x, y)` pairs.
pub fn fit(points: &[(f64, f64)]) -> Result<LinearFit, NotPossible> {
    if points.len() < MIN_POINTS {
        return Err(NotPossible::Insufficient {
            points: points.len(),
        });
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });

    if sxx.abs() < f64::EPSILON {
        return Err(NotPossible::Degenerate);
    }

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

pub fn predict_next(points: &[(f64, f64)], next_x: f64) -> Prediction {
    match fit(points) {
        Ok(line) => {
            let raw = line.at(next_x);
            Prediction::Predicted {
                value: raw.clamp(SCORE_MIN, SCORE_MAX),
                raw,
                slope: line.slope,
                intercept: line.intercept,
            }
        }
        Err(reason) => Prediction::NotPossible(reason),
    }
}

/// Scores are attempts `1..=n`; predicts attempt `n + 1`.
pub fn predict_next_attempt(scores: &[f64]) -> Prediction {
    let points = scores
        .iter()
        .enumerate()
        .map(|(ix, score)| ((ix + 1) as f64, *score))
        .collect::<Vec<_>>();

    predict_next(&points, (scores.len() + 1) as f64)
}
