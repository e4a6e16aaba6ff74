use chrono::{DateTime, Local, Utc};
use fitparser::profile::MesgNum;
use fitparser::profile::field_types::{Manufacturer, Sport};
use fitparser::{FitDataField, FitDataRecord, Value, encode_records};

use crate::activity::{ActivityFile, Catalog, Lap, ManufacturerRef, Metrics, Record, Session};
use crate::codec::CodecError;

/// Seconds between the Unix epoch and the FIT epoch (1989-12-31T00:00:00Z).
const FIT_EPOCH_OFFSET: i64 = 631_065_600;
const SEMICIRCLES_PER_DEGREE: f64 = 2_147_483_648.0 / 180.0;

/// Serialize one activity as a FIT activity file.
pub fn encode_activity(activity: &ActivityFile, catalog: &Catalog) -> Result<Vec<u8>, CodecError> {
    let records = activity_messages(activity, catalog)?;
    encode_records(&records).map_err(|err| CodecError::FitEncode(err.to_string()))
}

/// The messages of an activity file in the order devices write them:
/// file_id, then records, laps and session per session, then activity.
fn activity_messages(
    activity: &ActivityFile,
    catalog: &Catalog,
) -> Result<Vec<FitDataRecord>, CodecError> {
    let manufacturer = match &activity.file_id.manufacturer {
        Some(ManufacturerRef::Id(id)) => Some(*id),
        Some(ManufacturerRef::Name(name)) => Some(
            catalog
                .manufacturer_by_name(name)
                .map(|manufacturer| manufacturer.id)
                .ok_or_else(|| CodecError::UnknownManufacturer(name.clone()))?,
        ),
        None => None,
    };
    let time_created = activity
        .file_id
        .time_created
        .or_else(|| activity.first_record_timestamp());

    let mut messages = Vec::new();
    messages.push(
        Message::new(MesgNum::FileId)
            .text("type", 0, Some("activity"))
            .manufacturer(manufacturer)
            .uint16("product", 2, activity.file_id.product.map(f64::from), "")
            .time("time_created", 4, time_created)
            .build(),
    );

    for session in &activity.sessions {
        let sport = sport_name(catalog, &session.sport);
        messages.extend(session.records.iter().map(record_message));
        messages.extend(session.laps.iter().map(|lap| lap_message(lap, &sport)));
        messages.push(session_message(session, &sport));
    }

    let last_timestamp = activity
        .sessions
        .iter()
        .rev()
        .find_map(|session| session.timestamp.or(session.end_time))
        .or(time_created);
    let total_timer = activity
        .sessions
        .iter()
        .map(|session| session.metrics.total_timer_time)
        .fold(None, |total: Option<f64>, value| match (total, value) {
            (Some(total), Some(value)) => Some(total + value),
            (total, value) => total.or(value),
        });
    let local_timestamp = last_timestamp
        .map(|timestamp| timestamp + chrono::Duration::hours(i64::from(activity.timezone)));

    messages.push(
        Message::new(MesgNum::Activity)
            .time("timestamp", 253, last_timestamp)
            .float("total_timer_time", 0, total_timer, "s")
            .uint16("num_sessions", 1, Some(activity.sessions.len() as f64), "")
            .text("type", 2, Some("manual"))
            .text("event", 3, Some("activity"))
            .text("event_type", 4, Some("stop"))
            .time("local_timestamp", 5, local_timestamp)
            .build(),
    );
    Ok(messages)
}

fn record_message(record: &Record) -> FitDataRecord {
    Message::new(MesgNum::Record)
        .time("timestamp", 253, record.timestamp)
        .semicircles("position_lat", 0, record.position_lat)
        .semicircles("position_long", 1, record.position_long)
        .float("altitude", 2, record.altitude, "m")
        .uint8("heart_rate", 3, record.heart_rate, "bpm")
        .uint8("cadence", 4, record.cadence, "rpm")
        .float("distance", 5, record.distance, "m")
        .float("speed", 6, record.speed, "m/s")
        .uint16("power", 7, record.power, "watts")
        .float("grade", 9, record.grade, "%")
        .sint8("temperature", 13, record.temperature, "C")
        .build()
}

fn lap_message(lap: &Lap, sport: &str) -> FitDataRecord {
    let m = &lap.metrics;
    Message::new(MesgNum::Lap)
        .time("timestamp", 253, lap.timestamp.or(lap.end_time))
        .text("event", 0, Some("lap"))
        .text("event_type", 1, Some("stop"))
        .time("start_time", 2, lap.start_time)
        .float("total_elapsed_time", 7, m.total_elapsed_time, "s")
        .float("total_timer_time", 8, m.total_timer_time, "s")
        .float("total_distance", 9, m.total_distance, "m")
        .uint32("total_cycles", 10, m.total_cycles, "cycles")
        .uint16("total_calories", 11, m.total_calories, "kcal")
        .float("avg_speed", 13, m.avg_speed, "m/s")
        .float("max_speed", 14, m.max_speed, "m/s")
        .uint8("avg_heart_rate", 15, m.avg_heart_rate, "bpm")
        .uint8("max_heart_rate", 16, m.max_heart_rate, "bpm")
        .uint8("avg_cadence", 17, m.avg_cadence, "rpm")
        .uint8("max_cadence", 18, m.max_cadence, "rpm")
        .uint16("avg_power", 19, m.avg_power, "watts")
        .uint16("max_power", 20, m.max_power, "watts")
        .uint16("total_ascent", 21, m.total_ascent, "m")
        .uint16("total_descent", 22, m.total_descent, "m")
        .text("sport", 25, Some(sport))
        .float("avg_altitude", 42, m.avg_altitude, "m")
        .float("max_altitude", 43, m.max_altitude, "m")
        .sint8("avg_temperature", 50, m.avg_temperature, "C")
        .sint8("max_temperature", 51, m.max_temperature, "C")
        .float("total_moving_time", 52, m.total_moving_time, "s")
        .build()
}

fn session_message(session: &Session, sport: &str) -> FitDataRecord {
    let m: &Metrics = &session.metrics;
    Message::new(MesgNum::Session)
        .time("timestamp", 253, session.timestamp.or(session.end_time))
        .text("event", 0, Some("session"))
        .text("event_type", 1, Some("stop"))
        .time("start_time", 2, session.start_time)
        .text("sport", 5, Some(sport))
        .float("total_elapsed_time", 7, m.total_elapsed_time, "s")
        .float("total_timer_time", 8, m.total_timer_time, "s")
        .float("total_distance", 9, m.total_distance, "m")
        .uint32("total_cycles", 10, m.total_cycles, "cycles")
        .uint16("total_calories", 11, m.total_calories, "kcal")
        .float("avg_speed", 14, m.avg_speed, "m/s")
        .float("max_speed", 15, m.max_speed, "m/s")
        .uint8("avg_heart_rate", 16, m.avg_heart_rate, "bpm")
        .uint8("max_heart_rate", 17, m.max_heart_rate, "bpm")
        .uint8("avg_cadence", 18, m.avg_cadence, "rpm")
        .uint8("max_cadence", 19, m.max_cadence, "rpm")
        .uint16("avg_power", 20, m.avg_power, "watts")
        .uint16("max_power", 21, m.max_power, "watts")
        .uint16("total_ascent", 22, m.total_ascent, "m")
        .uint16("total_descent", 23, m.total_descent, "m")
        .uint16("num_laps", 26, Some(session.laps.len() as f64), "")
        .float("avg_altitude", 49, m.avg_altitude, "m")
        .float("max_altitude", 50, m.max_altitude, "m")
        .sint8("avg_temperature", 57, m.avg_temperature, "C")
        .sint8("max_temperature", 58, m.max_temperature, "C")
        .float("total_moving_time", 59, m.total_moving_time, "s")
        .build()
}

/// FIT profile name of `sport`; unknown labels are written as `generic`.
fn sport_name(catalog: &Catalog, sport: &str) -> String {
    let id = catalog.sport_by_name(sport).map_or(0, |sport| sport.id);
    Sport::from(id).to_string()
}

/// Collects the present fields of one message. Absent values are left out
/// so the message carries no invalid sentinels.
struct Message {
    record: FitDataRecord,
}

impl Message {
    fn new(kind: MesgNum) -> Self {
        Message {
            record: FitDataRecord::new(kind),
        }
    }

    fn push(mut self, name: &str, number: u8, value: Option<Value>, units: &str) -> Self {
        if let Some(value) = value {
            self.record
                .push(FitDataField::new(name.to_string(), number, None, value, units.to_string()));
        }
        self
    }

    fn time(self, name: &str, number: u8, timestamp: Option<DateTime<Utc>>) -> Self {
        let value = timestamp
            .filter(|timestamp| timestamp.timestamp() >= FIT_EPOCH_OFFSET)
            .map(|timestamp| Value::Timestamp(timestamp.with_timezone(&Local)));
        self.push(name, number, value, "s")
    }

    fn text(self, name: &str, number: u8, value: Option<&str>) -> Self {
        self.push(name, number, value.map(|value| Value::String(value.to_string())), "")
    }

    /// Named manufacturers are written with their profile name, anything else
    /// with the raw id.
    fn manufacturer(self, id: Option<u16>) -> Self {
        let value = id.map(|id| {
            if Manufacturer::is_named_variant(i64::from(id)) {
                Value::String(Manufacturer::from(id).to_string())
            } else {
                Value::UInt16(id)
            }
        });
        self.push("manufacturer", 1, value, "")
    }

    fn float(self, name: &str, number: u8, value: Option<f64>, units: &str) -> Self {
        let value = value.filter(|value| value.is_finite()).map(Value::Float64);
        self.push(name, number, value, units)
    }

    fn semicircles(self, name: &str, number: u8, degrees: Option<f64>) -> Self {
        let value = integral(degrees.map(|degrees| degrees * SEMICIRCLES_PER_DEGREE))
            .and_then(|value| i32::try_from(value).ok())
            .map(Value::SInt32);
        self.push(name, number, value, "semicircles")
    }

    fn uint8(self, name: &str, number: u8, value: Option<f64>, units: &str) -> Self {
        let value = integral(value)
            .and_then(|value| u8::try_from(value).ok())
            .filter(|value| *value != u8::MAX)
            .map(Value::UInt8);
        self.push(name, number, value, units)
    }

    fn sint8(self, name: &str, number: u8, value: Option<f64>, units: &str) -> Self {
        let value = integral(value)
            .and_then(|value| i8::try_from(value).ok())
            .filter(|value| *value != i8::MAX)
            .map(Value::SInt8);
        self.push(name, number, value, units)
    }

    fn uint16(self, name: &str, number: u8, value: Option<f64>, units: &str) -> Self {
        let value = integral(value)
            .and_then(|value| u16::try_from(value).ok())
            .filter(|value| *value != u16::MAX)
            .map(Value::UInt16);
        self.push(name, number, value, units)
    }

    fn uint32(self, name: &str, number: u8, value: Option<f64>, units: &str) -> Self {
        let value = integral(value)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value != u32::MAX)
            .map(Value::UInt32);
        self.push(name, number, value, units)
    }

    fn build(self) -> FitDataRecord {
        self.record
    }
}

fn integral(value: Option<f64>) -> Option<i64> {
    value
        .filter(|value| value.is_finite())
        .map(|value| value.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn field<'a>(message: &'a FitDataRecord, name: &str) -> Option<&'a Value> {
        message
            .fields()
            .iter()
            .find(|field| field.name() == name)
            .map(FitDataField::value)
    }

    #[test]
    fn record_fields_follow_the_profile() {
        let record = Record {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            position_lat: Some(90.0),
            altitude: Some(100.0),
            heart_rate: Some(151.6),
            distance: Some(12.34),
            ..Record::default()
        };
        let message = record_message(&record);

        assert_eq!(message.kind(), MesgNum::Record);
        assert_eq!(field(&message, "position_lat"), Some(&Value::SInt32(1 << 30)));
        assert_eq!(field(&message, "position_long"), None);
        assert_eq!(field(&message, "altitude"), Some(&Value::Float64(100.0)));
        assert_eq!(field(&message, "heart_rate"), Some(&Value::UInt8(152)));
        assert_eq!(field(&message, "distance"), Some(&Value::Float64(12.34)));
        assert_eq!(field(&message, "speed"), None);
    }

    #[test]
    fn timestamps_before_the_fit_epoch_are_left_out() {
        let record = Record {
            timestamp: Some(Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap()),
            ..Record::default()
        };
        assert!(record_message(&record).fields().is_empty());
    }

    #[test]
    fn file_id_names_profile_manufacturers() {
        let catalog = Catalog::load().expect("catalog");
        let mut activity = ActivityFile {
            sessions: vec![Session::default()],
            ..ActivityFile::default()
        };
        activity.file_id.manufacturer = Some(ManufacturerRef::Id(70));

        let messages = activity_messages(&activity, &catalog).expect("messages");
        assert_eq!(messages[0].kind(), MesgNum::FileId);
        assert_eq!(
            field(&messages[0], "manufacturer"),
            Some(&Value::String("sigmasport".into()))
        );
        assert_eq!(messages.last().map(FitDataRecord::kind), Some(MesgNum::Activity));
        let session = &messages[messages.len() - 2];
        assert_eq!(field(session, "sport"), Some(&Value::String("generic".into())));
    }

    #[test]
    fn unknown_manufacturer_name_is_rejected() {
        let mut activity = ActivityFile {
            sessions: vec![Session::default()],
            ..ActivityFile::default()
        };
        activity.file_id.manufacturer = Some(ManufacturerRef::Name("acme".into()));
        let catalog = Catalog::load().expect("catalog");
        assert!(matches!(
            encode_activity(&activity, &catalog),
            Err(CodecError::UnknownManufacturer(_))
        ));
    }
}
