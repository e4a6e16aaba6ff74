//! GPX 1.1 tracks. Each track becomes a session and each track segment a lap.
//!
//! The `gpx` crate skips `<extensions>`, so sensor readings are read and
//! written in a second pass over the document with `quick-xml`.

use std::fmt::Display;
use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{CodecError, FormatCodec};
use crate::activity::catalog::title_case;
use crate::activity::preprocess::aggregate_by_timestamp;
use crate::activity::summary::{lap_from_records, session_from_laps, summarize};
use crate::activity::{
    ActivityFile, Catalog, FileId, FileType, GENERIC_SPORT, Preprocessor, Record, Session,
    UNKNOWN_NAME,
};

const CREATOR: &str = "RustyActivity";
const TRACK_POINT_EXTENSION_NS: &str = "http://www.garmin.com/xmlschemas/TrackPointExtension/v1";

pub struct GpxCodec {
    catalog: Arc<Catalog>,
    preprocessor: Preprocessor,
}

impl GpxCodec {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        GpxCodec {
            catalog,
            preprocessor: Preprocessor::default(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    fn sport_of(&self, track_type: Option<&str>) -> String {
        match track_type.map(str::trim).filter(|kind| !kind.is_empty()) {
            Some(kind) => self
                .catalog
                .sport_by_name(kind)
                .map(|sport| sport.name.clone())
                .unwrap_or_else(|| title_case(kind)),
            None => GENERIC_SPORT.to_string(),
        }
    }

    fn decode_track(
        &self,
        track: ::gpx::Track,
        extensions: &mut impl Iterator<Item = PointExtension>,
    ) -> Result<Option<Session>, CodecError> {
        let sport = self.sport_of(track.type_.as_deref());

        let mut segments: Vec<Vec<Record>> = Vec::with_capacity(track.segments.len());
        for segment in track.segments {
            let mut records = Vec::with_capacity(segment.points.len());
            for point in segment.points {
                let mut record = waypoint_to_record(&point)?;
                extensions.next().unwrap_or_default().apply(&mut record);
                records.push(record);
            }
            let records = aggregate_by_timestamp(records);
            if !records.is_empty() {
                segments.push(records);
            }
        }
        if segments.is_empty() {
            return Ok(None);
        }

        // Distance and pace run across segment boundaries, so preprocess the
        // whole track before splitting it back into laps.
        let bounds: Vec<usize> = segments.iter().map(Vec::len).collect();
        let mut records: Vec<Record> = segments.into_iter().flatten().collect();
        self.preprocessor.run(&sport, &mut records);

        let mut laps = Vec::with_capacity(bounds.len());
        let mut offset = 0;
        for len in bounds {
            laps.push(lap_from_records(&records[offset..offset + len], &sport));
            offset += len;
        }

        let mut session = session_from_laps(laps, &sport);
        session.records = records;
        summarize(&mut session);
        Ok(Some(session))
    }
}

impl FormatCodec for GpxCodec {
    fn file_type(&self) -> FileType {
        FileType::Gpx
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<ActivityFile>, CodecError> {
        let document = ::gpx::read(Cursor::new(bytes)).map_err(decode_error)?;

        let time_created = match document.metadata.as_ref().and_then(|meta| meta.time.as_ref()) {
            Some(time) => Some(gpx_time(time)?),
            None => None,
        };
        let name = document
            .creator
            .as_deref()
            .map(str::trim)
            .filter(|creator| !creator.is_empty())
            .unwrap_or(UNKNOWN_NAME)
            .to_string();

        let mut extensions = read_point_extensions(bytes)?.into_iter();
        let mut sessions = Vec::with_capacity(document.tracks.len());
        for track in document.tracks {
            if let Some(session) = self.decode_track(track, &mut extensions)? {
                sessions.push(session);
            }
        }
        if sessions.is_empty() {
            return Err(CodecError::NoActivity);
        }
        sessions.sort_by_key(|session| session.start_time);

        let activity = ActivityFile {
            file_id: FileId {
                name,
                manufacturer: None,
                product: None,
                time_created,
            },
            sessions,
            ..ActivityFile::default()
        };
        debug!(records = activity.record_count(), bytes = bytes.len(), "decoded GPX file");
        Ok(vec![activity])
    }

    fn encode(&self, activity: &ActivityFile) -> Result<Vec<u8>, CodecError> {
        let mut document = ::gpx::Gpx {
            version: ::gpx::GpxVersion::Gpx11,
            creator: Some(CREATOR.to_string()),
            ..Default::default()
        };
        let created = activity
            .file_id
            .time_created
            .or_else(|| activity.first_record_timestamp());
        if let Some(created) = created {
            document.metadata = Some(::gpx::Metadata {
                name: Some(activity.file_id.name.clone()),
                time: Some(to_gpx_time(created)?),
                ..Default::default()
            });
        }

        let mut extensions = Vec::with_capacity(activity.record_count());
        for session in &activity.sessions {
            document.tracks.push(session_to_track(session, &mut extensions)?);
        }

        let mut plain = Vec::new();
        ::gpx::write(&document, &mut plain).map_err(encode_error)?;
        let buffer = write_point_extensions(&plain, &extensions)?;
        debug!(bytes = buffer.len(), sessions = activity.sessions.len(), "encoded GPX file");
        Ok(buffer)
    }
}

fn waypoint_to_record(point: &::gpx::Waypoint) -> Result<Record, CodecError> {
    let timestamp = match point.time.as_ref() {
        Some(time) => Some(gpx_time(time)?),
        None => None,
    };
    let position = point.point();
    Ok(Record {
        timestamp,
        position_lat: Some(position.y()),
        position_long: Some(position.x()),
        altitude: point.elevation,
        ..Record::default()
    })
}

/// One segment per lap. Records without a position cannot be expressed as
/// track points and are left out.
/// `extensions` receives the readings of every emitted point, in document
/// order.
fn session_to_track(
    session: &Session,
    extensions: &mut Vec<PointExtension>,
) -> Result<::gpx::Track, CodecError> {
    let mut track = ::gpx::Track::new();
    track.type_ = Some(session.sport.to_lowercase());

    let mut groups: Vec<Vec<&Record>> = if session.laps.is_empty() {
        vec![session.records.iter().collect()]
    } else {
        session
            .laps
            .iter()
            .map(|lap| {
                session
                    .records
                    .iter()
                    .filter(|record| record.timestamp.is_some_and(|ts| lap.contains(ts)))
                    .collect()
            })
            .collect()
    };
    groups.retain(|group| group.iter().any(|record| record.has_position()));

    for group in groups {
        let mut segment = ::gpx::TrackSegment::new();
        for record in group {
            let (Some(lat), Some(lon)) = (record.position_lat, record.position_long) else {
                continue;
            };
            let mut waypoint = ::gpx::Waypoint::new(geo_types::Point::new(lon, lat));
            waypoint.elevation = record.altitude;
            if let Some(timestamp) = record.timestamp {
                waypoint.time = Some(to_gpx_time(timestamp)?);
            }
            segment.points.push(waypoint);
            extensions.push(PointExtension::from(record));
        }
        track.segments.push(segment);
    }
    Ok(track)
}

/// Sensor readings carried in a track point's `<extensions>`. Garmin's
/// TrackPointExtension names are read along with the Cluetrust and generic
/// spellings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PointExtension {
    heart_rate: Option<f64>,
    cadence: Option<f64>,
    temperature: Option<f64>,
    power: Option<f64>,
    distance: Option<f64>,
}

impl PointExtension {
    fn set(&mut self, element: &[u8], text: &str) {
        let slot = match element {
            b"hr" | b"heartrate" => &mut self.heart_rate,
            b"cad" | b"cadence" => &mut self.cadence,
            b"atemp" | b"temp" | b"temperature" => &mut self.temperature,
            b"power" => &mut self.power,
            b"distance" => &mut self.distance,
            _ => return,
        };
        match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => *slot = Some(value),
            _ => warn!(value = text, "ignoring unreadable track point extension"),
        }
    }

    fn apply(self, record: &mut Record) {
        record.heart_rate = self.heart_rate.or(record.heart_rate);
        record.cadence = self.cadence.or(record.cadence);
        record.temperature = self.temperature.or(record.temperature);
        record.power = self.power.or(record.power);
        record.distance = self.distance.or(record.distance);
    }

    /// Elements written under `gpxtpx:TrackPointExtension`. Power and
    /// distance have no place in that schema.
    fn garmin_fields(&self) -> [(&'static str, Option<f64>); 3] {
        [
            ("gpxtpx:atemp", self.temperature),
            ("gpxtpx:hr", self.heart_rate),
            ("gpxtpx:cad", self.cadence),
        ]
    }
}

impl From<&Record> for PointExtension {
    fn from(record: &Record) -> Self {
        PointExtension {
            heart_rate: record.heart_rate,
            cadence: record.cadence,
            temperature: record.temperature,
            power: record.power,
            distance: record.distance,
        }
    }
}

/// Extension readings of every `<trkpt>` in document order. Points without
/// extensions get an empty entry so the list lines up with the parsed tracks.
fn read_point_extensions(bytes: &[u8]) -> Result<Vec<PointExtension>, CodecError> {
    let mut reader = Reader::from_reader(bytes);
    let mut points = Vec::new();
    let mut current: Option<PointExtension> = None;
    let mut in_extensions = false;
    let mut element: Option<Vec<u8>> = None;

    loop {
        match reader.read_event().map_err(decode_error)? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"trkpt" => current = Some(PointExtension::default()),
                b"extensions" if current.is_some() => in_extensions = true,
                name if in_extensions => element = Some(name.to_vec()),
                _ => {}
            },
            Event::Empty(start) if start.local_name().as_ref() == b"trkpt" => {
                points.push(PointExtension::default());
            }
            Event::Text(text) => {
                if let (Some(point), Some(name)) = (current.as_mut(), element.as_deref()) {
                    let text = text.unescape().map_err(decode_error)?;
                    point.set(name, &text);
                }
            }
            Event::End(end) => {
                element = None;
                match end.local_name().as_ref() {
                    b"trkpt" => {
                        in_extensions = false;
                        points.extend(current.take());
                    }
                    b"extensions" => in_extensions = false,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(points)
}

/// Re-stream a written document, declaring the Garmin extension namespace and
/// closing each `<trkpt>` with its readings.
fn write_point_extensions(
    document: &[u8],
    points: &[PointExtension],
) -> Result<Vec<u8>, CodecError> {
    let mut reader = Reader::from_reader(document);
    let mut writer = Writer::new(Vec::with_capacity(document.len() + points.len() * 96));
    let mut points = points.iter();

    loop {
        match reader.read_event().map_err(encode_error)? {
            Event::Start(start) if start.local_name().as_ref() == b"gpx" => {
                let mut start = start.into_owned();
                start.push_attribute(("xmlns:gpxtpx", TRACK_POINT_EXTENSION_NS));
                writer.write_event(Event::Start(start)).map_err(encode_error)?;
            }
            Event::Empty(start) if start.local_name().as_ref() == b"trkpt" => {
                let start = start.into_owned();
                let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                writer.write_event(Event::Start(start)).map_err(encode_error)?;
                if let Some(point) = points.next() {
                    write_extension(&mut writer, point)?;
                }
                writer.write_event(Event::End(end)).map_err(encode_error)?;
            }
            Event::End(end) if end.local_name().as_ref() == b"trkpt" => {
                if let Some(point) = points.next() {
                    write_extension(&mut writer, point)?;
                }
                writer.write_event(Event::End(end)).map_err(encode_error)?;
            }
            Event::Eof => break,
            event => writer.write_event(event).map_err(encode_error)?,
        }
    }
    Ok(writer.into_inner())
}

fn write_extension(writer: &mut Writer<Vec<u8>>, point: &PointExtension) -> Result<(), CodecError> {
    let fields = point.garmin_fields();
    if fields.iter().all(|(_, value)| value.is_none()) {
        return Ok(());
    }

    writer
        .write_event(Event::Start(BytesStart::new("extensions")))
        .map_err(encode_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("gpxtpx:TrackPointExtension")))
        .map_err(encode_error)?;
    for (name, value) in fields {
        if let Some(value) = value {
            let text = (value.round() as i64).to_string();
            writer
                .create_element(name)
                .write_text_content(BytesText::new(&text))
                .map_err(encode_error)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("gpxtpx:TrackPointExtension")))
        .map_err(encode_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("extensions")))
        .map_err(encode_error)?;
    Ok(())
}

fn decode_error(err: impl Display) -> CodecError {
    CodecError::GpxDecode(err.to_string())
}

fn encode_error(err: impl Display) -> CodecError {
    CodecError::GpxEncode(err.to_string())
}

fn gpx_time(time: &::gpx::Time) -> Result<DateTime<Utc>, CodecError> {
    let formatted = time.format().map_err(decode_error)?;
    DateTime::parse_from_rfc3339(&formatted)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(decode_error)
}

fn to_gpx_time(timestamp: DateTime<Utc>) -> Result<::gpx::Time, CodecError> {
    OffsetDateTime::from_unix_timestamp(timestamp.timestamp())
        .map(::gpx::Time::from)
        .map_err(encode_error)
}
