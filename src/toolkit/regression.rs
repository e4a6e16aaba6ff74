use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegressionError {
    #[error("linear regression needs at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("points have no variance along x")]
    ZeroVariance,
    #[error("point {0} has a non-finite coordinate")]
    NonFinite(usize),
}

/// Ordinary least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearRegression {
    intercept: f64,
    slope: f64,
}

impl LinearRegression {
    pub fn fit(points: &[Point]) -> Result<Self, RegressionError> {
        if points.len() < 2 {
            return Err(RegressionError::TooFewPoints(points.len()));
        }
        if let Some(idx) = points
            .iter()
            .position(|point| !point.x.is_finite() || !point.y.is_finite())
        {
            return Err(RegressionError::NonFinite(idx));
        }

        let n = points.len() as f64;
        let (sum_x, sum_y, sum_xy, sum_x2) =
            points
                .iter()
                .fold((0.0, 0.0, 0.0, 0.0), |(sx, sy, sxy, sx2), point| {
                    (
                        sx + point.x,
                        sy + point.y,
                        sxy + point.x * point.y,
                        sx2 + point.x * point.x,
                    )
                });

        let denominator = n * sum_x2 - sum_x * sum_x;
        if denominator.abs() <= f64::EPSILON * (n * sum_x2).abs().max(1.0) {
            return Err(RegressionError::ZeroVariance);
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        Ok(LinearRegression { intercept, slope })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(raw: &[(f64, f64)]) -> Vec<Point> {
        raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn fits_identity_line() {
        let regression =
            LinearRegression::fit(&points(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)])).expect("fit");
        assert!((regression.slope() - 1.0).abs() < 1e-12);
        assert!(regression.intercept().abs() < 1e-12);
        assert!((regression.predict(10.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn fits_noisy_line() {
        let regression =
            LinearRegression::fit(&points(&[(0.0, 1.0), (1.0, 3.1), (2.0, 4.9), (3.0, 7.0)]))
                .expect("fit");
        assert!((regression.slope() - 1.98).abs() < 1e-9);
        assert!((regression.intercept() - 1.03).abs() < 1e-9);
    }

    #[test]
    fn rejects_degenerate_input() {
        assert_eq!(
            LinearRegression::fit(&points(&[(1.0, 1.0)])),
            Err(RegressionError::TooFewPoints(1))
        );
        assert_eq!(
            LinearRegression::fit(&points(&[(2.0, 1.0), (2.0, 5.0), (2.0, 3.0)])),
            Err(RegressionError::ZeroVariance)
        );
        assert_eq!(
            LinearRegression::fit(&points(&[(0.0, 1.0), (f64::NAN, 2.0)])),
            Err(RegressionError::NonFinite(1))
        );
    }
}
