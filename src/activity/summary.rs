use chrono::{DateTime, Duration, Utc};

use super::catalog::is_considered_moving;
use super::types::{Lap, Metrics, Record, Session, WorkoutType};
use crate::toolkit::{Accumulator, sport_has_pace};

/// Aggregate a run of records into a lap spanning their first and last
/// timestamp.
pub fn lap_from_records(records: &[Record], sport: &str) -> Lap {
    let start_time = records.iter().find_map(|record| record.timestamp);
    let end_time = records.iter().rev().find_map(|record| record.timestamp);

    Lap {
        timestamp: end_time,
        start_time,
        end_time,
        metrics: metrics_from_records(records, sport),
    }
}

/// Fold laps into a session: totals are summed, averages averaged and
/// extremes kept. Records are left for the caller to attach.
pub fn session_from_laps(laps: Vec<Lap>, sport: &str) -> Session {
    let mut acc = LapAccumulator::default();
    for lap in &laps {
        acc.collect(&lap.metrics);
    }

    let start_time = laps.iter().find_map(|lap| lap.start_time);
    let end_time = laps.iter().rev().find_map(|lap| lap.end_time);

    let mut metrics = acc.finish();
    if let (Some(start), Some(end)) = (start_time, end_time) {
        metrics.total_elapsed_time = Some(seconds_between(start, end));
    }
    apply_pace(&mut metrics, sport);

    Session {
        timestamp: end_time,
        start_time,
        end_time,
        sport: sport.to_string(),
        laps,
        metrics,
        ..Session::default()
    }
}

/// Fill every session aggregate the source left absent from the session's
/// own records, then settle its time bounds and workout type.
pub fn summarize(session: &mut Session) {
    let derived = metrics_from_records(&session.records, &session.sport);
    fill_missing(&mut session.metrics, &derived);

    if session.start_time.is_none() {
        session.start_time = session.first_timestamp();
    }
    if session.end_time.is_none() {
        session.end_time = match (session.start_time, session.metrics.total_elapsed_time) {
            (Some(start), Some(elapsed)) => {
                Some(start + Duration::milliseconds((elapsed * 1000.0) as i64))
            }
            _ => session.last_timestamp(),
        };
    }
    if session.timestamp.is_none() {
        session.timestamp = session.end_time;
    }

    apply_pace(&mut session.metrics, &session.sport);

    let travelled = session.metrics.total_distance.is_some_and(|distance| distance > 0.0);
    session.workout_type = if travelled || session.records.iter().any(Record::has_position) {
        WorkoutType::Moving
    } else {
        WorkoutType::Stationary
    };
}

/// Re-derive laps after records changed. Each existing lap keeps the records
/// inside its time range; laps left without records disappear. A session
/// without usable laps gets a single lap covering every record.
pub fn rebuild_laps(session: &mut Session) {
    let sport = session.sport.clone();
    let mut laps: Vec<Lap> = session
        .laps
        .iter()
        .filter_map(|lap| {
            let members: Vec<Record> = session
                .records
                .iter()
                .filter(|record| record.timestamp.is_some_and(|ts| lap.contains(ts)))
                .cloned()
                .collect();
            (!members.is_empty()).then(|| lap_from_records(&members, &sport))
        })
        .collect();

    if laps.is_empty() && !session.records.is_empty() {
        laps.push(lap_from_records(&session.records, &sport));
    }
    session.laps = laps;
}

/// Rebuild a session from its records: laps first, then the session
/// aggregates from the laps, then any gaps from the records.
pub fn recompute_session(session: &mut Session) {
    rebuild_laps(session);
    let laps = std::mem::take(&mut session.laps);
    let records = std::mem::take(&mut session.records);

    let mut rebuilt = session_from_laps(laps, &session.sport);
    rebuilt.sub_sport = session.sub_sport.take();
    rebuilt.records = records;
    summarize(&mut rebuilt);
    *session = rebuilt;
}

/// Seconds spent above the sport's moving-speed tolerance.
pub fn total_moving_time(records: &[Record], sport: &str) -> Option<f64> {
    let timed: Vec<&Record> = records
        .iter()
        .filter(|record| record.timestamp.is_some())
        .collect();
    if timed.len() < 2 {
        return None;
    }

    Some(
        timed
            .windows(2)
            .filter_map(|pair| match (pair[0].timestamp, pair[1].timestamp) {
                (Some(from), Some(to)) if is_considered_moving(sport, pair[1].speed) => {
                    Some(seconds_between(from, to))
                }
                _ => None,
            })
            .sum(),
    )
}

/// Total ascent and descent in meters from the altitude series.
pub fn elevation_change(records: &[Record]) -> (Option<f64>, Option<f64>) {
    let altitudes: Vec<f64> = records
        .iter()
        .filter_map(Record::effective_altitude)
        .collect();
    if altitudes.is_empty() {
        return (None, None);
    }

    let (ascent, descent) = altitudes
        .windows(2)
        .fold((0.0, 0.0), |(up, down), pair| {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                (up + delta, down)
            } else {
                (up, down - delta)
            }
        });
    (Some(ascent), Some(descent))
}

/// Average pace over moving and elapsed time, for sports that use pace.
pub fn apply_pace(metrics: &mut Metrics, sport: &str) {
    if !sport_has_pace(sport) {
        return;
    }
    let Some(kilometers) = metrics
        .total_distance
        .filter(|distance| *distance > 0.0)
        .map(|distance| distance / 1000.0)
    else {
        return;
    };

    if metrics.avg_pace.is_none() {
        metrics.avg_pace = metrics.total_moving_time.map(|moving| moving / kilometers);
    }
    if metrics.avg_elapsed_pace.is_none() {
        metrics.avg_elapsed_pace = metrics.total_elapsed_time.map(|elapsed| elapsed / kilometers);
    }
}

pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn metrics_from_records(records: &[Record], sport: &str) -> Metrics {
    let series = |select: fn(&Record) -> Option<f64>| -> Accumulator {
        records.iter().map(select).collect()
    };

    let speed = series(|record| record.speed);
    let heart_rate = series(|record| record.heart_rate);
    let cadence = series(|record| record.cadence);
    let power = series(|record| record.power);
    let temperature = series(|record| record.temperature);
    let altitude = series(|record| record.altitude);

    let first_distance = records.iter().find_map(|record| record.distance);
    let last_distance = records.iter().rev().find_map(|record| record.distance);
    let first_timestamp = records.iter().find_map(|record| record.timestamp);
    let last_timestamp = records.iter().rev().find_map(|record| record.timestamp);

    let elapsed = match (first_timestamp, last_timestamp) {
        (Some(first), Some(last)) => Some(seconds_between(first, last)),
        _ => None,
    };
    let (total_ascent, total_descent) = elevation_change(records);

    let mut metrics = Metrics {
        total_elapsed_time: elapsed,
        total_timer_time: elapsed,
        total_moving_time: total_moving_time(records, sport),
        total_distance: match (first_distance, last_distance) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        },
        total_ascent,
        total_descent,
        min_speed: speed.min(),
        avg_speed: speed.avg(),
        max_speed: speed.max(),
        min_heart_rate: heart_rate.min(),
        avg_heart_rate: heart_rate.avg(),
        max_heart_rate: heart_rate.max(),
        min_cadence: cadence.min(),
        avg_cadence: cadence.avg(),
        max_cadence: cadence.max(),
        min_power: power.min(),
        avg_power: power.avg(),
        max_power: power.max(),
        min_temperature: temperature.min(),
        avg_temperature: temperature.avg(),
        max_temperature: temperature.max(),
        min_altitude: altitude.min(),
        avg_altitude: altitude.avg(),
        max_altitude: altitude.max(),
        ..Metrics::default()
    };
    apply_pace(&mut metrics, sport);
    metrics
}

macro_rules! fill_fields {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if $target.$field.is_none() {
                $target.$field = $source.$field;
            }
        )+
    };
}

pub(crate) fn fill_missing(target: &mut Metrics, source: &Metrics) {
    fill_fields!(
        target,
        source,
        total_elapsed_time,
        total_timer_time,
        total_moving_time,
        total_distance,
        total_ascent,
        total_descent,
        total_cycles,
        total_calories,
        min_speed,
        avg_speed,
        max_speed,
        min_heart_rate,
        avg_heart_rate,
        max_heart_rate,
        min_cadence,
        avg_cadence,
        max_cadence,
        min_power,
        avg_power,
        max_power,
        min_temperature,
        avg_temperature,
        max_temperature,
        min_altitude,
        avg_altitude,
        max_altitude,
    );
}

#[derive(Default)]
struct LapAccumulator {
    totals: [Accumulator; 8],
    averages: [Accumulator; 6],
    minimums: [Accumulator; 6],
    maximums: [Accumulator; 6],
}

impl LapAccumulator {
    fn collect(&mut self, metrics: &Metrics) {
        let totals = [
            metrics.total_elapsed_time,
            metrics.total_timer_time,
            metrics.total_moving_time,
            metrics.total_distance,
            metrics.total_ascent,
            metrics.total_descent,
            metrics.total_cycles,
            metrics.total_calories,
        ];
        let averages = [
            metrics.avg_speed,
            metrics.avg_heart_rate,
            metrics.avg_cadence,
            metrics.avg_power,
            metrics.avg_temperature,
            metrics.avg_altitude,
        ];
        let minimums = [
            metrics.min_speed,
            metrics.min_heart_rate,
            metrics.min_cadence,
            metrics.min_power,
            metrics.min_temperature,
            metrics.min_altitude,
        ];
        let maximums = [
            metrics.max_speed,
            metrics.max_heart_rate,
            metrics.max_cadence,
            metrics.max_power,
            metrics.max_temperature,
            metrics.max_altitude,
        ];

        for (acc, value) in self.totals.iter_mut().zip(totals) {
            acc.collect(value);
        }
        for (acc, value) in self.averages.iter_mut().zip(averages) {
            acc.collect(value);
        }
        for (acc, value) in self.minimums.iter_mut().zip(minimums) {
            acc.collect(value);
        }
        for (acc, value) in self.maximums.iter_mut().zip(maximums) {
            acc.collect(value);
        }
    }

    fn finish(&self) -> Metrics {
        let [elapsed, timer, moving, distance, ascent, descent, cycles, calories] = &self.totals;
        let [avg_speed, avg_hr, avg_cad, avg_power, avg_temp, avg_alt] = &self.averages;
        let [min_speed, min_hr, min_cad, min_power, min_temp, min_alt] = &self.minimums;
        let [max_speed, max_hr, max_cad, max_power, max_temp, max_alt] = &self.maximums;

        Metrics {
            total_elapsed_time: elapsed.sum(),
            total_timer_time: timer.sum(),
            total_moving_time: moving.sum(),
            total_distance: distance.sum(),
            total_ascent: ascent.sum(),
            total_descent: descent.sum(),
            total_cycles: cycles.sum(),
            total_calories: calories.sum(),
            min_speed: min_speed.min(),
            avg_speed: avg_speed.avg(),
            max_speed: max_speed.max(),
            min_heart_rate: min_hr.min(),
            avg_heart_rate: avg_hr.avg(),
            max_heart_rate: max_hr.max(),
            min_cadence: min_cad.min(),
            avg_cadence: avg_cad.avg(),
            max_cadence: max_cad.max(),
            min_power: min_power.min(),
            avg_power: avg_power.avg(),
            max_power: max_power.max(),
            min_temperature: min_temp.min(),
            avg_temperature: avg_temp.avg(),
            max_temperature: max_temp.max(),
            min_altitude: min_alt.min(),
            avg_altitude: avg_alt.avg(),
            max_altitude: max_alt.max(),
            avg_pace: None,
            avg_elapsed_pace: None,
        }
    }
}
