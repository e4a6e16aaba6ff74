use chrono::{DateTime, Duration, Utc};
use fitparser::profile::MesgNum;
use fitparser::profile::field_types::Manufacturer as ProfileManufacturer;
use fitparser::{FitDataField, FitDataRecord, Value};
use tracing::warn;

use crate::activity::catalog::title_case;
use crate::activity::preprocess::aggregate_by_timestamp;
use crate::activity::{
    Activity, ActivityFile, Catalog, FileId, GENERIC_SPORT, Lap, ManufacturerRef, Metrics,
    Preprocessor, Record, Session, UNKNOWN_NAME,
};
use crate::codec::{CodecError, finalize_session};

const DEGREES_PER_SEMICIRCLE: f64 = 180.0 / 2_147_483_648.0;

/// Messages collected for one FIT file. Chained files start a new one at
/// every `file_id` message.
#[derive(Default)]
struct RawFile {
    seen_file_id: bool,
    not_activity: bool,
    manufacturer: Option<u16>,
    manufacturer_name: Option<String>,
    product: Option<u16>,
    product_name: Option<String>,
    time_created: Option<DateTime<Utc>>,
    activity: Option<Activity>,
    local_timestamp: Option<DateTime<Utc>>,
    sessions: Vec<Session>,
    laps: Vec<Lap>,
    records: Vec<Record>,
}

pub fn decode_activities(
    bytes: &[u8],
    catalog: &Catalog,
    preprocessor: &Preprocessor,
) -> Result<Vec<ActivityFile>, CodecError> {
    let messages =
        fitparser::from_bytes(bytes).map_err(|err| CodecError::FitDecode(err.to_string()))?;

    let mut files: Vec<RawFile> = Vec::new();
    let mut current = RawFile::default();

    for message in &messages {
        match message.kind() {
            MesgNum::FileId => {
                if current.seen_file_id || !current.records.is_empty() {
                    files.push(std::mem::take(&mut current));
                }
                current.seen_file_id = true;
                read_file_id(message, catalog, &mut current);
            }
            MesgNum::Activity => {
                let (activity, local_timestamp) = read_activity(message);
                current.activity = Some(activity);
                current.local_timestamp = local_timestamp;
            }
            MesgNum::Session => current.sessions.push(read_session(message, catalog)),
            MesgNum::Lap => current.laps.push(read_lap(message)),
            MesgNum::Record => current.records.push(read_record(message)),
            _ => {}
        }
    }
    files.push(current);

    let activities: Vec<ActivityFile> = files
        .into_iter()
        .filter(|raw| !raw.not_activity)
        .filter_map(|raw| assemble(raw, catalog, preprocessor))
        .collect();

    if activities.is_empty() {
        return Err(CodecError::NoActivity);
    }
    Ok(activities)
}

fn read_file_id(message: &FitDataRecord, catalog: &Catalog, raw: &mut RawFile) {
    for field in message.fields() {
        match field.name() {
            "type" => {
                raw.not_activity = match field.value() {
                    Value::String(kind) => kind != "activity",
                    other => value_f64(other).is_some_and(|kind| kind != 4.0),
                };
            }
            "manufacturer" => match field.value() {
                Value::String(name) => {
                    raw.manufacturer = catalog
                        .manufacturer_by_name(name)
                        .map(|m| m.id)
                        .or_else(|| profile_manufacturer(name));
                    raw.manufacturer_name = Some(name.clone());
                }
                other => raw.manufacturer = value_u16(other),
            },
            name if name == "product" || name.ends_with("_product") => match field.value() {
                Value::String(product) => raw.product_name = Some(product.clone()),
                other => raw.product = value_u16(other),
            },
            "time_created" => raw.time_created = value_time(field.value()),
            _ => {}
        }
    }

    if raw.product.is_none() {
        if let (Some(manufacturer), Some(product_name)) = (
            raw.manufacturer.and_then(|id| catalog.manufacturer(id)),
            raw.product_name.as_deref(),
        ) {
            raw.product = manufacturer.product_by_name(product_name).map(|p| p.id);
        }
    }
}

/// Profile id behind a manufacturer name the decoder resolved, for names
/// the catalog does not list.
fn profile_manufacturer(name: &str) -> Option<u16> {
    match ProfileManufacturer::from(name) {
        ProfileManufacturer::Value(_) => None,
        manufacturer => Some(manufacturer.as_u16()),
    }
}

fn read_activity(message: &FitDataRecord) -> (Activity, Option<DateTime<Utc>>) {
    let mut activity = Activity::default();
    let mut local_timestamp = None;

    for field in message.fields() {
        match field.name() {
            "timestamp" => activity.timestamp = value_time(field.value()),
            "type" => activity.activity_type = value_string(field.value()),
            "event" => activity.event = value_string(field.value()),
            "event_type" => activity.event_type = value_string(field.value()),
            "num_sessions" => activity.num_sessions = value_u16(field.value()),
            "local_timestamp" => local_timestamp = value_time(field.value()),
            _ => {}
        }
    }
    (activity, local_timestamp)
}

fn read_session(message: &FitDataRecord, catalog: &Catalog) -> Session {
    let mut session = Session::default();

    for field in message.fields() {
        match field.name() {
            "timestamp" => session.timestamp = value_time(field.value()),
            "start_time" => session.start_time = value_time(field.value()),
            "sport" => session.sport = sport_name(field.value(), catalog),
            "sub_sport" => session.sub_sport = value_string(field.value()).map(|s| title_case(&s)),
            name => apply_metric(&mut session.metrics, name, field),
        }
    }

    session.end_time = end_of(session.start_time, session.metrics.total_elapsed_time)
        .or(session.timestamp);
    session
}

fn read_lap(message: &FitDataRecord) -> Lap {
    let mut lap = Lap::default();

    for field in message.fields() {
        match field.name() {
            "timestamp" => lap.timestamp = value_time(field.value()),
            "start_time" => lap.start_time = value_time(field.value()),
            name => apply_metric(&mut lap.metrics, name, field),
        }
    }

    lap.end_time = end_of(lap.start_time, lap.metrics.total_elapsed_time).or(lap.timestamp);
    lap
}

fn read_record(message: &FitDataRecord) -> Record {
    let mut record = Record::default();

    for field in message.fields() {
        let value = value_f64(field.value());
        match field.name() {
            "timestamp" => record.timestamp = value_time(field.value()),
            "position_lat" => record.position_lat = degrees(field),
            "position_long" => record.position_long = degrees(field),
            "altitude" | "enhanced_altitude" => record.altitude = value.or(record.altitude),
            "heart_rate" => record.heart_rate = value,
            "cadence" => record.cadence = value,
            "distance" => record.distance = value,
            "speed" | "enhanced_speed" => record.speed = value.or(record.speed),
            "power" => record.power = value,
            "temperature" => record.temperature = value,
            "grade" => record.grade = value,
            _ => {}
        }
    }
    record
}

fn apply_metric(metrics: &mut Metrics, name: &str, field: &FitDataField) {
    let slot = match name {
        "total_elapsed_time" => &mut metrics.total_elapsed_time,
        "total_timer_time" => &mut metrics.total_timer_time,
        "total_moving_time" => &mut metrics.total_moving_time,
        "total_distance" => &mut metrics.total_distance,
        "total_ascent" => &mut metrics.total_ascent,
        "total_descent" => &mut metrics.total_descent,
        "total_cycles" | "total_strides" | "total_strokes" => &mut metrics.total_cycles,
        "total_calories" => &mut metrics.total_calories,
        "avg_speed" | "enhanced_avg_speed" => &mut metrics.avg_speed,
        "max_speed" | "enhanced_max_speed" => &mut metrics.max_speed,
        "min_heart_rate" => &mut metrics.min_heart_rate,
        "avg_heart_rate" => &mut metrics.avg_heart_rate,
        "max_heart_rate" => &mut metrics.max_heart_rate,
        "avg_cadence" | "avg_running_cadence" => &mut metrics.avg_cadence,
        "max_cadence" | "max_running_cadence" => &mut metrics.max_cadence,
        "avg_power" => &mut metrics.avg_power,
        "max_power" => &mut metrics.max_power,
        "min_temperature" => &mut metrics.min_temperature,
        "avg_temperature" => &mut metrics.avg_temperature,
        "max_temperature" => &mut metrics.max_temperature,
        "min_altitude" | "enhanced_min_altitude" => &mut metrics.min_altitude,
        "avg_altitude" | "enhanced_avg_altitude" => &mut metrics.avg_altitude,
        "max_altitude" | "enhanced_max_altitude" => &mut metrics.max_altitude,
        _ => return,
    };
    if let Some(value) = value_f64(field.value()) {
        *slot = Some(value);
    }
}

/// Turn one file's messages into an activity: records are deduplicated and
/// distributed to the session whose time range holds them, records outside
/// every session form a trailing generic session.
fn assemble(raw: RawFile, catalog: &Catalog, preprocessor: &Preprocessor) -> Option<ActivityFile> {
    let records = aggregate_by_timestamp(raw.records);
    let mut sessions = raw.sessions;
    if sessions.is_empty() && records.is_empty() {
        return None;
    }
    sessions.sort_by_key(|session| session.start_time);

    let mut orphans: Vec<Record> = Vec::new();
    let mut last_index: Option<usize> = None;
    for record in records {
        let index = match record.timestamp {
            Some(timestamp) => sessions.iter().position(|session| session.contains(timestamp)),
            None => last_index,
        };
        match index {
            Some(index) => sessions[index].records.push(record),
            None => orphans.push(record),
        }
        last_index = index;
    }

    for lap in raw.laps {
        let index = lap
            .start_time
            .and_then(|start| sessions.iter().position(|session| session.contains(start)));
        match index {
            Some(index) => sessions[index].laps.push(lap),
            None => warn!(start = ?lap.start_time, "dropping lap outside every session"),
        }
    }

    if !orphans.is_empty() {
        sessions.push(Session {
            sport: GENERIC_SPORT.to_string(),
            records: orphans,
            ..Session::default()
        });
    }

    for session in &mut sessions {
        finalize_session(preprocessor, session);
    }

    let name = match catalog.creator_name(raw.manufacturer, raw.product) {
        name if name != UNKNOWN_NAME => name,
        _ => raw
            .manufacturer_name
            .as_deref()
            .map(title_case)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
    };
    let manufacturer = raw
        .manufacturer
        .map(ManufacturerRef::Id)
        .or(raw.manufacturer_name.map(ManufacturerRef::Name));

    let timezone = match (raw.activity.as_ref().and_then(|a| a.timestamp), raw.local_timestamp) {
        (Some(utc), Some(local)) => ((local - utc).num_seconds() as f64 / 3600.0).round() as i32,
        _ => 0,
    };

    Some(ActivityFile {
        file_id: FileId {
            name,
            manufacturer,
            product: raw.product,
            time_created: raw.time_created,
        },
        activity: raw.activity,
        timezone,
        sessions,
    })
}

fn end_of(start: Option<DateTime<Utc>>, elapsed: Option<f64>) -> Option<DateTime<Utc>> {
    match (start, elapsed) {
        (Some(start), Some(elapsed)) => Some(start + Duration::milliseconds((elapsed * 1000.0) as i64)),
        _ => None,
    }
}

fn sport_name(value: &Value, catalog: &Catalog) -> String {
    match value {
        Value::String(name) => title_case(name),
        other => value_u16(other)
            .and_then(|id| u8::try_from(id).ok())
            .and_then(|id| catalog.sport(id))
            .map(|sport| sport.name.clone())
            .unwrap_or_else(|| GENERIC_SPORT.to_string()),
    }
}

fn degrees(field: &FitDataField) -> Option<f64> {
    let value = value_f64(field.value())?;
    if field.units() == "semicircles" || value.abs() > 180.0 {
        Some(value * DEGREES_PER_SEMICIRCLE)
    } else {
        Some(value)
    }
}

fn value_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(timestamp) => Some(timestamp.with_timezone(&Utc)),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        other => value_f64(other).map(|number| number.to_string()),
    }
}

fn value_u16(value: &Value) -> Option<u16> {
    value_f64(value)
        .filter(|number| *number >= 0.0 && *number <= f64::from(u16::MAX))
        .map(|number| number as u16)
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(f64::from(*v)),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(f64::from(*v)),
        Value::UInt8(v) | Value::UInt8z(v) | Value::Byte(v) | Value::Enum(v) => Some(f64::from(*v)),
        Value::SInt16(v) => Some(f64::from(*v)),
        Value::UInt16(v) | Value::UInt16z(v) => Some(f64::from(*v)),
        Value::SInt32(v) => Some(f64::from(*v)),
        Value::UInt32(v) | Value::UInt32z(v) => Some(f64::from(*v)),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) | Value::UInt64z(v) => Some(*v as f64),
        Value::Array(values) => values.iter().find_map(value_f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, number: u8, value: Value) -> FitDataField {
        FitDataField::new(name.to_string(), number, None, value, String::new())
    }

    fn file_id(manufacturer: Value, product: Value) -> FitDataRecord {
        let mut message = FitDataRecord::new(MesgNum::FileId);
        message.push(field("type", 0, Value::String("activity".into())));
        message.push(field("manufacturer", 1, manufacturer));
        message.push(field("product", 2, product));
        message
    }

    #[test]
    fn named_manufacturer_keeps_its_profile_id() {
        let catalog = Catalog::load().expect("catalog");
        let mut raw = RawFile::default();
        read_file_id(
            &file_id(Value::String("sigmasport".into()), Value::UInt16(12)),
            &catalog,
            &mut raw,
        );

        assert_eq!(raw.manufacturer, Some(70));
        assert_eq!(raw.product, Some(12));
        assert!(!raw.not_activity);
        assert_eq!(profile_manufacturer("no_such_maker"), None);
    }

    #[test]
    fn garmin_product_names_resolve_to_ids() {
        let catalog = Catalog::load().expect("catalog");
        let mut raw = RawFile::default();
        read_file_id(
            &file_id(Value::String("garmin".into()), Value::String("fenix6".into())),
            &catalog,
            &mut raw,
        );

        assert_eq!(raw.manufacturer, Some(1));
        assert_eq!(raw.product, Some(3290));
    }
}
