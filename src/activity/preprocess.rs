use chrono::{DateTime, Utc};

use super::catalog::is_considered_moving;
use super::summary::seconds_between;
use super::types::Record;
use crate::toolkit::{avg, sport_has_pace};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Distance window, in meters, for the altitude moving average.
pub const DEFAULT_SMOOTHING_DISTANCE: f64 = 30.0;
/// Distance window, in meters, over which grade is measured.
pub const DEFAULT_GRADE_DISTANCE: f64 = 100.0;

/// Cleans and enriches raw decoded records before summaries are derived.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    smoothing_distance: f64,
    grade_distance: f64,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor {
            smoothing_distance: DEFAULT_SMOOTHING_DISTANCE,
            grade_distance: DEFAULT_GRADE_DISTANCE,
        }
    }
}

impl Preprocessor {
    pub fn with_smoothing_distance(mut self, meters: f64) -> Self {
        if meters > 0.0 {
            self.smoothing_distance = meters;
        }
        self
    }

    pub fn with_grade_distance(mut self, meters: f64) -> Self {
        if meters > 0.0 {
            self.grade_distance = meters;
        }
        self
    }

    /// Run every enrichment step on one session's records, in order.
    pub fn run(&self, sport: &str, records: &mut [Record]) {
        fill_distance_and_speed(records);
        if sport_has_pace(sport) {
            compute_pace(sport, records);
        }
        self.smooth_altitude(records);
        self.compute_grade(records);
    }

    /// Moving average of altitude over the trailing smoothing window.
    pub fn smooth_altitude(&self, records: &mut [Record]) {
        let samples: Vec<(Option<f64>, Option<f64>)> = records
            .iter()
            .map(|record| (record.distance, record.altitude))
            .collect();

        for (idx, record) in records.iter_mut().enumerate() {
            let (Some(distance), Some(altitude)) = samples[idx] else {
                record.smoothed_altitude = record.altitude;
                continue;
            };

            let window = samples[..idx]
                .iter()
                .rev()
                .take_while(|(previous, _)| {
                    previous.is_none_or(|previous| distance - previous <= self.smoothing_distance)
                })
                .map(|(_, altitude)| *altitude);
            record.smoothed_altitude = avg(window.chain(std::iter::once(Some(altitude))));
        }
    }

    /// Percent grade between each record and the furthest record still inside
    /// the grade window ahead of it.
    pub fn compute_grade(&self, records: &mut [Record]) {
        let samples: Vec<Option<(f64, f64)>> = records
            .iter()
            .map(|record| record.distance.zip(record.effective_altitude()))
            .collect();

        for (idx, record) in records.iter_mut().enumerate() {
            let Some((distance, altitude)) = samples[idx] else {
                continue;
            };

            let ahead = samples[idx + 1..]
                .iter()
                .flatten()
                .take_while(|(next_distance, _)| next_distance - distance <= self.grade_distance)
                .last();

            if let Some((next_distance, next_altitude)) = ahead {
                let run = next_distance - distance;
                if run > 0.0 {
                    record.grade = Some((next_altitude - altitude) / run * 100.0);
                }
            }
        }
    }
}

/// Merge records that share a timestamp into a single sample. Positions keep
/// the first value seen, sensor readings are averaged.
pub fn aggregate_by_timestamp(records: Vec<Record>) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(records.len());
    let mut group: Vec<Record> = Vec::new();

    for record in records {
        let same_instant = match (group.last().and_then(|last| last.timestamp), record.timestamp) {
            (Some(previous), Some(current)) => previous == current,
            _ => false,
        };
        if !same_instant && !group.is_empty() {
            merged.push(merge_group(std::mem::take(&mut group)));
        }
        group.push(record);
    }
    if !group.is_empty() {
        merged.push(merge_group(group));
    }
    merged
}

fn merge_group(group: Vec<Record>) -> Record {
    if group.len() == 1 {
        return group.into_iter().next().unwrap_or_default();
    }

    let mean = |select: fn(&Record) -> Option<f64>| avg(group.iter().map(select));
    let first = |select: fn(&Record) -> Option<f64>| group.iter().find_map(select);

    Record {
        timestamp: group[0].timestamp,
        position_lat: first(|record| record.position_lat),
        position_long: first(|record| record.position_long),
        altitude: mean(|record| record.altitude),
        smoothed_altitude: mean(|record| record.smoothed_altitude),
        cadence: mean(|record| record.cadence),
        distance: group.iter().rev().find_map(|record| record.distance),
        heart_rate: mean(|record| record.heart_rate),
        power: mean(|record| record.power),
        speed: mean(|record| record.speed),
        temperature: mean(|record| record.temperature),
        grade: mean(|record| record.grade),
        pace: mean(|record| record.pace),
    }
}

/// Fill absent cumulative distance from consecutive positions and absent
/// speed from the distance covered since the previous record.
pub fn fill_distance_and_speed(records: &mut [Record]) {
    let mut last_position: Option<(f64, f64)> = None;
    let mut last_distance: Option<f64> = None;
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    for record in records.iter_mut() {
        let position = record.position_lat.zip(record.position_long);

        let step = match (last_position, position) {
            (Some((lat1, lon1)), Some((lat2, lon2))) => Some(haversine_distance(lat1, lon1, lat2, lon2)),
            _ => None,
        };

        if record.distance.is_none() {
            record.distance = match (last_distance, step, position) {
                (Some(previous), Some(step), _) => Some(previous + step),
                (None, _, Some(_)) => Some(0.0),
                _ => None,
            };
        }

        if record.speed.is_none() {
            let covered = match (last_distance, record.distance) {
                (Some(previous), Some(current)) => Some(current - previous),
                _ => step,
            };
            if let (Some(covered), Some(from), Some(to)) = (covered, last_timestamp, record.timestamp) {
                let seconds = seconds_between(from, to);
                if seconds > 0.0 && covered >= 0.0 {
                    record.speed = Some(covered / seconds);
                }
            }
        }

        if position.is_some() {
            last_position = position;
        }
        if record.distance.is_some() {
            last_distance = record.distance;
        }
        if record.timestamp.is_some() {
            last_timestamp = record.timestamp;
        }
    }
}

/// Instantaneous pace in seconds per kilometer for samples above the sport's
/// moving threshold.
pub fn compute_pace(sport: &str, records: &mut [Record]) {
    for record in records.iter_mut() {
        if record.pace.is_some() {
            continue;
        }
        if is_considered_moving(sport, record.speed) {
            record.pace = record.speed.map(|speed| 1000.0 / speed);
        }
    }
}

/// Great-circle distance in meters between two coordinates in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}
