use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::GENERIC_SPORT;

/// One decoded input: file identity, optional activity metadata and the
/// sessions it recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFile {
    pub file_id: FileId,
    #[serde(default)]
    pub activity: Option<Activity>,
    /// Hours east of UTC at the time of recording.
    #[serde(default)]
    pub timezone: i32,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl ActivityFile {
    pub fn first_record_timestamp(&self) -> Option<DateTime<Utc>> {
        self.sessions
            .iter()
            .flat_map(|session| &session.records)
            .find_map(|record| record.timestamp)
    }

    pub fn record_count(&self) -> usize {
        self.sessions.iter().map(|session| session.records.len()).sum()
    }
}

/// Device provenance of a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileId {
    /// Creator display name, e.g. `Garmin Fenix 6`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<ManufacturerRef>,
    #[serde(default)]
    pub product: Option<u16>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
}

/// Manufacturers arrive either as a numeric profile id or, for names the
/// decoder already resolved, as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManufacturerRef {
    Id(u16),
    Name(String),
}

impl fmt::Display for ManufacturerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManufacturerRef::Id(id) => write!(f, "{id}"),
            ManufacturerRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub num_sessions: Option<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkoutType {
    #[default]
    Moving,
    Stationary,
}

/// Aggregates shared by sessions and laps. Every field is optional: `None`
/// means the device did not record it, which is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Seconds.
    #[serde(default)]
    pub total_elapsed_time: Option<f64>,
    #[serde(default)]
    pub total_timer_time: Option<f64>,
    #[serde(default)]
    pub total_moving_time: Option<f64>,
    /// Meters.
    #[serde(default)]
    pub total_distance: Option<f64>,
    #[serde(default)]
    pub total_ascent: Option<f64>,
    #[serde(default)]
    pub total_descent: Option<f64>,
    #[serde(default)]
    pub total_cycles: Option<f64>,
    #[serde(default)]
    pub total_calories: Option<f64>,
    #[serde(default)]
    pub min_speed: Option<f64>,
    #[serde(default)]
    pub avg_speed: Option<f64>,
    #[serde(default)]
    pub max_speed: Option<f64>,
    #[serde(default)]
    pub min_heart_rate: Option<f64>,
    #[serde(default)]
    pub avg_heart_rate: Option<f64>,
    #[serde(default)]
    pub max_heart_rate: Option<f64>,
    #[serde(default)]
    pub min_cadence: Option<f64>,
    #[serde(default)]
    pub avg_cadence: Option<f64>,
    #[serde(default)]
    pub max_cadence: Option<f64>,
    #[serde(default)]
    pub min_power: Option<f64>,
    #[serde(default)]
    pub avg_power: Option<f64>,
    #[serde(default)]
    pub max_power: Option<f64>,
    #[serde(default)]
    pub min_temperature: Option<f64>,
    #[serde(default)]
    pub avg_temperature: Option<f64>,
    #[serde(default)]
    pub max_temperature: Option<f64>,
    #[serde(default)]
    pub min_altitude: Option<f64>,
    #[serde(default)]
    pub avg_altitude: Option<f64>,
    #[serde(default)]
    pub max_altitude: Option<f64>,
    /// Seconds per kilometer over moving time.
    #[serde(default)]
    pub avg_pace: Option<f64>,
    /// Seconds per kilometer over elapsed time.
    #[serde(default)]
    pub avg_elapsed_pace: Option<f64>,
}

impl Metrics {
    /// Every numeric field with its wire name, in declaration order.
    pub fn fields(&self) -> [(&'static str, Option<f64>); 28] {
        [
            ("totalElapsedTime", self.total_elapsed_time),
            ("totalTimerTime", self.total_timer_time),
            ("totalMovingTime", self.total_moving_time),
            ("totalDistance", self.total_distance),
            ("totalAscent", self.total_ascent),
            ("totalDescent", self.total_descent),
            ("totalCycles", self.total_cycles),
            ("totalCalories", self.total_calories),
            ("minSpeed", self.min_speed),
            ("avgSpeed", self.avg_speed),
            ("maxSpeed", self.max_speed),
            ("minHeartRate", self.min_heart_rate),
            ("avgHeartRate", self.avg_heart_rate),
            ("maxHeartRate", self.max_heart_rate),
            ("minCadence", self.min_cadence),
            ("avgCadence", self.avg_cadence),
            ("maxCadence", self.max_cadence),
            ("minPower", self.min_power),
            ("avgPower", self.avg_power),
            ("maxPower", self.max_power),
            ("minTemperature", self.min_temperature),
            ("avgTemperature", self.avg_temperature),
            ("maxTemperature", self.max_temperature),
            ("minAltitude", self.min_altitude),
            ("avgAltitude", self.avg_altitude),
            ("maxAltitude", self.max_altitude),
            ("avgPace", self.avg_pace),
            ("avgElapsedPace", self.avg_elapsed_pace),
        ]
    }
}

/// A contiguous workout segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sport: String,
    #[serde(default)]
    pub sub_sport: Option<String>,
    #[serde(default)]
    pub workout_type: WorkoutType,
    #[serde(flatten)]
    pub metrics: Metrics,
    #[serde(default)]
    pub laps: Vec<Lap>,
    /// Time-ascending samples.
    #[serde(default)]
    pub records: Vec<Record>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            timestamp: None,
            start_time: None,
            end_time: None,
            sport: GENERIC_SPORT.to_string(),
            sub_sport: None,
            workout_type: WorkoutType::default(),
            metrics: Metrics::default(),
            laps: Vec::new(),
            records: Vec::new(),
        }
    }
}

impl Session {
    /// Whether `timestamp` falls inside the session. A session without an end
    /// is open towards the future.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        within(timestamp, self.start_time, self.end_time)
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().find_map(|record| record.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().rev().find_map(|record| record.timestamp)
    }

    pub fn summary(&self) -> Summary {
        Summary::from(self)
    }
}

/// Sub-segment of a session. Always owned by exactly one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl Lap {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        within(timestamp, self.start_time, self.end_time)
    }
}

/// One timestamped sensor sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Degrees.
    #[serde(default)]
    pub position_lat: Option<f64>,
    #[serde(default)]
    pub position_long: Option<f64>,
    /// Meters.
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub smoothed_altitude: Option<f64>,
    #[serde(default)]
    pub cadence: Option<f64>,
    /// Meters covered so far.
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
    /// Meters per second.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Percent.
    #[serde(default)]
    pub grade: Option<f64>,
    /// Seconds per kilometer.
    #[serde(default)]
    pub pace: Option<f64>,
}

impl Record {
    pub fn has_position(&self) -> bool {
        self.position_lat.is_some() && self.position_long.is_some()
    }

    /// Altitude used for climb statistics: the smoothed series when present.
    pub fn effective_altitude(&self) -> Option<f64> {
        self.smoothed_altitude.or(self.altitude)
    }
}

/// Read-only projection of a session's aggregates for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub sport: String,
    pub sub_sport: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub workout_type: WorkoutType,
    pub lap_count: usize,
    pub record_count: usize,
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl From<&Session> for Summary {
    fn from(session: &Session) -> Self {
        Summary {
            sport: session.sport.clone(),
            sub_sport: session.sub_sport.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            workout_type: session.workout_type,
            lap_count: session.laps.len(),
            record_count: session.records.len(),
            metrics: session.metrics.clone(),
        }
    }
}

fn within(
    timestamp: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => timestamp >= start && timestamp <= end,
        (Some(start), None) => timestamp >= start,
        (None, Some(end)) => timestamp <= end,
        (None, None) => false,
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
