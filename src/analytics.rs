//! Display-ready figures for decoded sessions.

use serde::Serialize;

use crate::activity::summary::seconds_between;
use crate::activity::{ActivityFile, Session};
use crate::toolkit::{
    LinearRegression, Point, RegressionError, distance_to_human, format_pace, seconds_to_clock,
    seconds_to_human, session_has_pace,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    pub sport: String,
    pub distance: String,
    pub elapsed_clock: String,
    pub elapsed: String,
    pub moving: Option<String>,
    /// Average pace per kilometer, only for sessions that carry pace.
    pub avg_pace: Option<String>,
    /// Pace from a least squares fit of elapsed time over distance.
    pub estimated_pace: Option<String>,
    pub avg_speed_kmh: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub lap_count: usize,
    pub record_count: usize,
}

impl From<&Session> for SessionOverview {
    fn from(session: &Session) -> Self {
        let metrics = &session.metrics;
        let elapsed = metrics.total_elapsed_time.unwrap_or(0.0);
        let has_pace = session_has_pace(session);

        SessionOverview {
            sport: session.sport.clone(),
            distance: distance_to_human(metrics.total_distance, 2),
            elapsed_clock: seconds_to_clock(elapsed),
            elapsed: seconds_to_human(elapsed),
            moving: metrics.total_moving_time.map(seconds_to_human),
            avg_pace: metrics
                .avg_pace
                .filter(|_| has_pace)
                .map(format_pace),
            estimated_pace: has_pace
                .then(|| estimate_pace(session).ok())
                .flatten()
                .map(format_pace),
            avg_speed_kmh: metrics.avg_speed.map(|speed| round_to(speed * 3.6, 2)),
            avg_heart_rate: metrics.avg_heart_rate.map(f64::round),
            max_heart_rate: metrics.max_heart_rate,
            lap_count: session.laps.len(),
            record_count: session.records.len(),
        }
    }
}

/// Overviews for every session of every activity, in order.
pub fn overview(activities: &[ActivityFile]) -> Vec<SessionOverview> {
    activities
        .iter()
        .flat_map(|activity| activity.sessions.iter().map(SessionOverview::from))
        .collect()
}

/// Seconds per kilometer, the slope of elapsed time against distance.
pub fn estimate_pace(session: &Session) -> Result<f64, RegressionError> {
    let start = session.first_timestamp();
    let points: Vec<Point> = session
        .records
        .iter()
        .filter_map(|record| match (start, record.timestamp, record.distance) {
            (Some(start), Some(at), Some(distance)) => {
                Some(Point::new(distance / 1000.0, seconds_between(start, at)))
            }
            _ => None,
        })
        .collect();

    LinearRegression::fit(&points).map(|fit| fit.slope())
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
