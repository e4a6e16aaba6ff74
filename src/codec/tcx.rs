//! Garmin Training Center (TCX) activities. Each `<Activity>` becomes a
//! session, each `<Lap>` a lap and its trackpoints the session's records.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use super::{CodecError, FormatCodec};
use crate::activity::summary::{fill_missing, lap_from_records, session_from_laps, summarize};
use crate::activity::{
    ActivityFile, Catalog, FileId, FileType, GENERIC_SPORT, Lap, Metrics, Preprocessor, Record,
    Session, UNKNOWN_NAME,
};

const AUTHOR: &str = "RustyActivity";
const TCX_NS: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const ACTIVITY_EXTENSION_NS: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";
const SCHEMA_LOCATION: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

pub struct TcxCodec {
    catalog: Arc<Catalog>,
    preprocessor: Preprocessor,
}

impl TcxCodec {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        TcxCodec {
            catalog,
            preprocessor: Preprocessor::default(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// TCX schema sports are `Running`, `Biking` and `Other`. Other catalog
    /// names are accepted as written; anything else is generic.
    fn sport_of(&self, sport: Option<&str>) -> String {
        match sport.map(str::trim) {
            Some(kind) if kind.eq_ignore_ascii_case("biking") => "Cycling".to_string(),
            Some(kind) if !kind.is_empty() => self
                .catalog
                .sport_by_name(kind)
                .map(|sport| sport.name.clone())
                .unwrap_or_else(|| GENERIC_SPORT.to_string()),
            _ => GENERIC_SPORT.to_string(),
        }
    }

    fn build_session(&self, activity: TcxActivity) -> Option<Session> {
        let sport = self.sport_of(activity.sport.as_deref());

        let laps: Vec<TcxLap> = activity
            .laps
            .into_iter()
            .filter(|lap| !lap.records.is_empty())
            .collect();
        if laps.is_empty() {
            return None;
        }

        let bounds: Vec<usize> = laps.iter().map(|lap| lap.records.len()).collect();
        let mut records = Vec::with_capacity(bounds.iter().sum());
        let mut summaries = Vec::with_capacity(laps.len());
        for lap in laps {
            records.extend(lap.records);
            summaries.push((lap.start_time, lap.metrics));
        }
        self.preprocessor.run(&sport, &mut records);

        // Lap values from the file win, records fill in the rest.
        let mut offset = 0;
        let mut session_laps = Vec::with_capacity(bounds.len());
        for (len, (start_time, metrics)) in bounds.into_iter().zip(summaries) {
            let derived = lap_from_records(&records[offset..offset + len], &sport);
            offset += len;

            let mut lap = Lap {
                start_time: start_time.or(derived.start_time),
                metrics,
                ..derived.clone()
            };
            fill_missing(&mut lap.metrics, &derived.metrics);
            session_laps.push(lap);
        }

        let mut session = session_from_laps(session_laps, &sport);
        if activity.id.is_some() {
            session.start_time = activity.id;
        }
        session.records = records;
        summarize(&mut session);
        Some(session)
    }
}

impl FormatCodec for TcxCodec {
    fn file_type(&self) -> FileType {
        FileType::Tcx
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<ActivityFile>, CodecError> {
        let activities = read_activities(bytes)?;

        let time_created = activities.iter().find_map(|activity| activity.id);
        let name = activities
            .iter()
            .find_map(|activity| activity.creator.clone())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        let product = activities.iter().find_map(|activity| activity.product);

        let mut sessions: Vec<Session> = activities
            .into_iter()
            .filter_map(|activity| self.build_session(activity))
            .collect();
        if sessions.is_empty() {
            return Err(CodecError::NoActivity);
        }
        sessions.sort_by_key(|session| session.start_time);

        let activity = ActivityFile {
            file_id: FileId {
                name,
                manufacturer: None,
                product,
                time_created: time_created.or(sessions[0].start_time),
            },
            sessions,
            ..ActivityFile::default()
        };
        debug!(records = activity.record_count(), bytes = bytes.len(), "decoded TCX file");
        Ok(vec![activity])
    }

    fn encode(&self, activity: &ActivityFile) -> Result<Vec<u8>, CodecError> {
        let mut out = TcxWriter::new();
        out.declaration()?;

        let mut root = BytesStart::new("TrainingCenterDatabase");
        root.push_attribute(("xmlns", TCX_NS));
        root.push_attribute(("xmlns:xsi", XSI_NS));
        root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
        root.push_attribute(("xmlns:ns3", ACTIVITY_EXTENSION_NS));
        out.start(root)?;

        out.open("Activities")?;
        for session in &activity.sessions {
            write_session(&mut out, session, &activity.file_id)?;
        }
        out.close("Activities")?;

        let mut author = BytesStart::new("Author");
        author.push_attribute(("xsi:type", "Application_t"));
        out.start(author)?;
        out.text("Name", AUTHOR)?;
        out.close("Author")?;

        out.close("TrainingCenterDatabase")?;
        let buffer = out.finish();
        debug!(bytes = buffer.len(), sessions = activity.sessions.len(), "encoded TCX file");
        Ok(buffer)
    }
}

#[derive(Debug, Default)]
struct TcxActivity {
    sport: Option<String>,
    id: Option<DateTime<Utc>>,
    creator: Option<String>,
    product: Option<u16>,
    laps: Vec<TcxLap>,
}

#[derive(Debug, Default)]
struct TcxLap {
    start_time: Option<DateTime<Utc>>,
    metrics: Metrics,
    records: Vec<Record>,
}

/// Walk the document keeping the open element names, so every leaf value is
/// read in the context of its parents.
fn read_activities(bytes: &[u8]) -> Result<Vec<TcxActivity>, CodecError> {
    let mut reader = Reader::from_reader(bytes);
    let mut path: Vec<String> = Vec::new();
    let mut activities = Vec::new();
    let mut activity: Option<TcxActivity> = None;
    let mut lap: Option<TcxLap> = None;
    let mut record: Option<Record> = None;

    loop {
        match reader.read_event().map_err(decode_error)? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "Activity" if path.last().is_some_and(|parent| parent == "Activities") => {
                        activity = Some(TcxActivity {
                            sport: attribute(&start, "Sport")?,
                            ..TcxActivity::default()
                        });
                    }
                    "Lap" if activity.is_some() => {
                        lap = Some(TcxLap {
                            start_time: attribute(&start, "StartTime")?
                                .map(|value| parse_time(&value))
                                .transpose()?,
                            ..TcxLap::default()
                        });
                    }
                    "Trackpoint" if lap.is_some() => record = Some(Record::default()),
                    _ => {}
                }
                path.push(name);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(decode_error)?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let (Some(element), parent) = (path.last(), path.iter().rev().nth(1)) else {
                    continue;
                };
                let parent = parent.map(String::as_str).unwrap_or_default();

                if let Some(record) = record.as_mut() {
                    read_trackpoint_value(record, element, parent, text)?;
                } else if let Some(lap) = lap.as_mut() {
                    read_lap_value(lap, element, parent, text)?;
                } else if let Some(activity) = activity.as_mut() {
                    match (parent, element.as_str()) {
                        ("Activity", "Id") => activity.id = Some(parse_time(text)?),
                        ("Creator", "Name") => activity.creator = Some(text.to_string()),
                        ("Creator", "ProductID") => activity.product = text.parse().ok(),
                        _ => {}
                    }
                }
            }
            Event::End(_) => match path.pop().as_deref() {
                Some("Trackpoint") => {
                    if let (Some(done), Some(lap)) = (record.take(), lap.as_mut()) {
                        lap.records.push(done);
                    }
                }
                Some("Lap") => {
                    if let (Some(done), Some(activity)) = (lap.take(), activity.as_mut()) {
                        activity.laps.push(done);
                    }
                }
                Some("Activity") => activities.extend(activity.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(activities)
}

fn read_trackpoint_value(
    record: &mut Record,
    element: &str,
    parent: &str,
    text: &str,
) -> Result<(), CodecError> {
    match (parent, element) {
        (_, "Time") => record.timestamp = Some(parse_time(text)?),
        ("Position", "LatitudeDegrees") => record.position_lat = Some(number(element, text)?),
        ("Position", "LongitudeDegrees") => record.position_long = Some(number(element, text)?),
        (_, "AltitudeMeters") => record.altitude = Some(number(element, text)?),
        (_, "DistanceMeters") => record.distance = Some(number(element, text)?),
        ("HeartRateBpm", "Value") => record.heart_rate = Some(number(parent, text)?),
        (_, "Cadence") => record.cadence = Some(number(element, text)?),
        ("TPX", "Speed") => record.speed = Some(number(element, text)?),
        ("TPX", "Watts") => record.power = Some(number(element, text)?),
        _ => {}
    }
    Ok(())
}

fn read_lap_value(
    lap: &mut TcxLap,
    element: &str,
    parent: &str,
    text: &str,
) -> Result<(), CodecError> {
    let metrics = &mut lap.metrics;
    let slot = match (parent, element) {
        ("Lap", "TotalTimeSeconds") => &mut metrics.total_elapsed_time,
        ("Lap", "DistanceMeters") => &mut metrics.total_distance,
        ("Lap", "MaximumSpeed") => &mut metrics.max_speed,
        ("Lap", "Calories") => &mut metrics.total_calories,
        ("Lap", "Cadence") => &mut metrics.avg_cadence,
        ("AverageHeartRateBpm", "Value") => &mut metrics.avg_heart_rate,
        ("MaximumHeartRateBpm", "Value") => &mut metrics.max_heart_rate,
        _ => return Ok(()),
    };
    *slot = Some(number(element, text)?);
    Ok(())
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, CodecError> {
    match start.try_get_attribute(name).map_err(decode_error)? {
        Some(attribute) => {
            let value = attribute.unescape_value().map_err(decode_error)?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn number(element: &str, text: &str) -> Result<f64, CodecError> {
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CodecError::TcxDecode(format!("unreadable {element} value {text:?}")))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| CodecError::TcxDecode(format!("unreadable time {text:?}: {err}")))
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_session(out: &mut TcxWriter, session: &Session, file_id: &FileId) -> Result<(), CodecError> {
    let mut element = BytesStart::new("Activity");
    let sport = match session.sport.as_str() {
        "Cycling" => "Biking",
        GENERIC_SPORT => "Other",
        sport => sport,
    };
    element.push_attribute(("Sport", sport));
    out.start(element)?;

    let id = session
        .start_time
        .or(session.timestamp)
        .or_else(|| session.first_timestamp());
    if let Some(id) = id {
        out.text("Id", &format_time(id))?;
    }

    let mut remaining: Vec<&Record> = session.records.iter().collect();
    if session.laps.is_empty() && !remaining.is_empty() {
        let lap = lap_from_records(&session.records, &session.sport);
        write_lap(out, &lap, &remaining)?;
    }
    // A record belongs to the first lap that contains it.
    for lap in &session.laps {
        let (members, rest): (Vec<&Record>, Vec<&Record>) = remaining
            .into_iter()
            .partition(|record| record.timestamp.is_some_and(|ts| lap.contains(ts)));
        remaining = rest;
        write_lap(out, lap, &members)?;
    }

    if file_id.name != UNKNOWN_NAME && !file_id.name.is_empty() {
        let mut creator = BytesStart::new("Creator");
        creator.push_attribute(("xsi:type", "Device_t"));
        out.start(creator)?;
        out.text("Name", &file_id.name)?;
        out.text("UnitId", "0")?;
        out.integer("ProductID", file_id.product.map(f64::from))?;
        out.close("Creator")?;
    }
    out.close("Activity")
}

fn write_lap(out: &mut TcxWriter, lap: &Lap, records: &[&Record]) -> Result<(), CodecError> {
    let mut element = BytesStart::new("Lap");
    let start = lap.start_time.or_else(|| records.iter().find_map(|record| record.timestamp));
    if let Some(start) = start {
        element.push_attribute(("StartTime", format_time(start).as_str()));
    }
    out.start(element)?;

    let m = &lap.metrics;
    out.number("TotalTimeSeconds", m.total_elapsed_time.or(Some(0.0)))?;
    out.number("DistanceMeters", m.total_distance.or(Some(0.0)))?;
    out.number("MaximumSpeed", m.max_speed)?;
    out.integer("Calories", m.total_calories.or(Some(0.0)))?;
    out.value("AverageHeartRateBpm", m.avg_heart_rate)?;
    out.value("MaximumHeartRateBpm", m.max_heart_rate)?;
    out.text("Intensity", "Active")?;
    out.integer("Cadence", m.avg_cadence)?;
    out.text("TriggerMethod", "Manual")?;

    if !records.is_empty() {
        out.open("Track")?;
        for record in records {
            write_trackpoint(out, record)?;
        }
        out.close("Track")?;
    }
    out.close("Lap")
}

fn write_trackpoint(out: &mut TcxWriter, record: &Record) -> Result<(), CodecError> {
    out.open("Trackpoint")?;
    if let Some(timestamp) = record.timestamp {
        out.text("Time", &format_time(timestamp))?;
    }
    if let (Some(lat), Some(lon)) = (record.position_lat, record.position_long) {
        out.open("Position")?;
        out.number("LatitudeDegrees", Some(lat))?;
        out.number("LongitudeDegrees", Some(lon))?;
        out.close("Position")?;
    }
    out.number("AltitudeMeters", record.altitude)?;
    out.number("DistanceMeters", record.distance)?;
    out.value("HeartRateBpm", record.heart_rate)?;
    out.integer("Cadence", record.cadence)?;
    if record.speed.is_some() || record.power.is_some() {
        out.open("Extensions")?;
        out.open("ns3:TPX")?;
        out.number("ns3:Speed", record.speed)?;
        out.integer("ns3:Watts", record.power)?;
        out.close("ns3:TPX")?;
        out.close("Extensions")?;
    }
    out.close("Trackpoint")
}

struct TcxWriter {
    writer: Writer<Vec<u8>>,
}

impl TcxWriter {
    fn new() -> Self {
        TcxWriter {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn declaration(&mut self) -> Result<(), CodecError> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn start(&mut self, element: BytesStart<'_>) -> Result<(), CodecError> {
        self.write(Event::Start(element))
    }

    fn open(&mut self, name: &str) -> Result<(), CodecError> {
        self.write(Event::Start(BytesStart::new(name)))
    }

    fn close(&mut self, name: &str) -> Result<(), CodecError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, name: &str, text: &str) -> Result<(), CodecError> {
        self.writer
            .create_element(name)
            .write_text_content(BytesText::new(text))
            .map_err(encode_error)?;
        Ok(())
    }

    fn number(&mut self, name: &str, value: Option<f64>) -> Result<(), CodecError> {
        match value.filter(|value| value.is_finite()) {
            Some(value) => self.text(name, &value.to_string()),
            None => Ok(()),
        }
    }

    fn integer(&mut self, name: &str, value: Option<f64>) -> Result<(), CodecError> {
        match value.filter(|value| value.is_finite()) {
            Some(value) => self.text(name, &(value.round() as i64).to_string()),
            None => Ok(()),
        }
    }

    /// `<name><Value>n</Value></name>`, the TCX shape for heart rates.
    fn value(&mut self, name: &str, value: Option<f64>) -> Result<(), CodecError> {
        if value.is_none_or(|value| !value.is_finite()) {
            return Ok(());
        }
        self.open(name)?;
        self.integer("Value", value)?;
        self.close(name)
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), CodecError> {
        self.writer.write_event(event).map_err(encode_error)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn decode_error(err: impl Display) -> CodecError {
    CodecError::TcxDecode(err.to_string())
}

fn encode_error(err: impl Display) -> CodecError {
    CodecError::TcxEncode(err.to_string())
}
