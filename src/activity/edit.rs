use std::fmt;

use serde::{Deserialize, Serialize};

use super::UNKNOWN_NAME;
use super::types::{Metrics, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolMode {
    /// One output file per input activity.
    Edit,
    /// Every input activity merged into one output file.
    Combine,
    /// One output file per session.
    SplitPerSession,
}

impl ToolMode {
    /// Tag used in generated file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolMode::Edit => "edit",
            ToolMode::Combine => "combine",
            ToolMode::SplitPerSession => "split",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Fit,
    Gpx,
    Tcx,
}

impl FileType {
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Fit => "fit",
            FileType::Gpx => "gpx",
            FileType::Tcx => "tcx",
        }
    }

    /// Identify the format from the payload itself: the `.FIT` signature in a
    /// FIT header, or the root element of an XML document.
    pub fn detect(bytes: &[u8]) -> Option<FileType> {
        if bytes.len() >= 12 && &bytes[8..12] == b".FIT" {
            return Some(FileType::Fit);
        }

        let head = &bytes[..bytes.len().min(4096)];
        let text = String::from_utf8_lossy(head);
        if text.contains("<gpx") {
            Some(FileType::Gpx)
        } else if text.contains("<TrainingCenterDatabase") {
            Some(FileType::Tcx)
        } else {
            None
        }
    }

    pub fn from_extension(name: &str) -> Option<FileType> {
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "fit" => Some(FileType::Fit),
            "gpx" => Some(FileType::Gpx),
            "tcx" => Some(FileType::Tcx),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Half-open record index range `[start_n, end_n)` over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub start_n: usize,
    pub end_n: usize,
}

impl Marker {
    pub fn new(start_n: usize, end_n: usize) -> Self {
        Marker { start_n, end_n }
    }

    pub fn is_valid_for(&self, len: usize) -> bool {
        self.start_n <= self.end_n && self.end_n <= len
    }

    /// Whether the marker spans every record of a session of `len` records.
    pub fn covers(&self, len: usize) -> bool {
        self.start_n == 0 && self.end_n >= len
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_n && index < self.end_n
    }
}

/// Record fields a caller may strip before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordField {
    PositionLat,
    PositionLong,
    Altitude,
    Cadence,
    Distance,
    HeartRate,
    Power,
    Speed,
    Temperature,
}

impl RecordField {
    pub fn clear_record(&self, record: &mut Record) {
        match self {
            RecordField::PositionLat => record.position_lat = None,
            RecordField::PositionLong => record.position_long = None,
            RecordField::Altitude => {
                record.altitude = None;
                record.smoothed_altitude = None;
                record.grade = None;
            }
            RecordField::Cadence => record.cadence = None,
            RecordField::Distance => record.distance = None,
            RecordField::HeartRate => record.heart_rate = None,
            RecordField::Power => record.power = None,
            RecordField::Speed => {
                record.speed = None;
                record.pace = None;
            }
            RecordField::Temperature => record.temperature = None,
        }
    }

    /// Clear the aggregates derived from this field.
    pub fn clear_metrics(&self, metrics: &mut Metrics) {
        match self {
            RecordField::PositionLat | RecordField::PositionLong => {}
            RecordField::Altitude => {
                metrics.total_ascent = None;
                metrics.total_descent = None;
                metrics.min_altitude = None;
                metrics.avg_altitude = None;
                metrics.max_altitude = None;
            }
            RecordField::Cadence => {
                metrics.min_cadence = None;
                metrics.avg_cadence = None;
                metrics.max_cadence = None;
                metrics.total_cycles = None;
            }
            RecordField::Distance => {
                metrics.total_distance = None;
                metrics.avg_pace = None;
                metrics.avg_elapsed_pace = None;
            }
            RecordField::HeartRate => {
                metrics.min_heart_rate = None;
                metrics.avg_heart_rate = None;
                metrics.max_heart_rate = None;
            }
            RecordField::Power => {
                metrics.min_power = None;
                metrics.avg_power = None;
                metrics.max_power = None;
            }
            RecordField::Speed => {
                metrics.min_speed = None;
                metrics.avg_speed = None;
                metrics.max_speed = None;
            }
            RecordField::Temperature => {
                metrics.min_temperature = None;
                metrics.avg_temperature = None;
                metrics.max_temperature = None;
            }
        }
    }
}

/// Caller directives applied to activities before they are re-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeSpecifications {
    pub tool_mode: ToolMode,
    pub target_file_type: FileType,
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default = "unknown_device")]
    pub device_name: String,
    /// Sport label per resulting session. `None` keeps the current sport.
    #[serde(default)]
    pub sports: Vec<Option<String>>,
    /// One marker per input session, or empty to keep every record.
    #[serde(default)]
    pub trim_markers: Vec<Marker>,
    /// One marker per input session; positions outside it are redacted.
    #[serde(default)]
    pub conceal_markers: Vec<Marker>,
    #[serde(default)]
    pub remove_fields: Vec<RecordField>,
}

impl EncodeSpecifications {
    pub fn new(tool_mode: ToolMode, target_file_type: FileType) -> Self {
        EncodeSpecifications {
            tool_mode,
            target_file_type,
            manufacturer_id: None,
            product_id: None,
            device_name: unknown_device(),
            sports: Vec::new(),
            trim_markers: Vec::new(),
            conceal_markers: Vec::new(),
            remove_fields: Vec::new(),
        }
    }

    /// Number of sport labels expected for `input_sessions` input sessions:
    /// one per session when splitting, one overall otherwise.
    pub fn expected_sport_count(&self, input_sessions: usize) -> usize {
        match self.tool_mode {
            ToolMode::SplitPerSession => input_sessions,
            ToolMode::Edit | ToolMode::Combine => 1,
        }
    }
}

fn unknown_device() -> String {
    UNKNOWN_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_formats_from_content() {
        let mut fit = vec![14, 0x20, 0, 0, 0, 0, 0, 0];
        fit.extend_from_slice(b".FIT");
        assert_eq!(FileType::detect(&fit), Some(FileType::Fit));
        assert_eq!(
            FileType::detect(br#"<?xml version="1.0"?><gpx version="1.1">"#),
            Some(FileType::Gpx)
        );
        assert_eq!(
            FileType::detect(b"<TrainingCenterDatabase xmlns=\"x\">"),
            Some(FileType::Tcx)
        );
        assert_eq!(FileType::detect(b"hello"), None);
        assert_eq!(FileType::from_extension("ride.GPX"), Some(FileType::Gpx));
    }

    #[test]
    fn specifications_deserialize_with_defaults() {
        let spec: EncodeSpecifications = serde_json::from_value(json!({
            "toolMode": "splitPerSession",
            "targetFileType": "fit",
            "trimMarkers": [{ "startN": 2, "endN": 10 }],
            "removeFields": ["heartRate", "positionLat"]
        }))
        .expect("valid specification");

        assert_eq!(spec.tool_mode, ToolMode::SplitPerSession);
        assert_eq!(spec.device_name, "Unknown");
        assert_eq!(spec.trim_markers, vec![Marker::new(2, 10)]);
        assert_eq!(
            spec.remove_fields,
            vec![RecordField::HeartRate, RecordField::PositionLat]
        );
        assert_eq!(spec.expected_sport_count(3), 3);
    }

    #[test]
    fn unknown_mode_or_field_is_rejected() {
        assert!(
            serde_json::from_value::<EncodeSpecifications>(json!({
                "toolMode": "unknown",
                "targetFileType": "fit"
            }))
            .is_err()
        );
        assert!(
            serde_json::from_value::<EncodeSpecifications>(json!({
                "toolMode": "edit",
                "targetFileType": "fit",
                "removeFields": ["color"]
            }))
            .is_err()
        );
    }

    #[test]
    fn markers_are_half_open() {
        let marker = Marker::new(2, 5);
        assert!(marker.contains(2));
        assert!(!marker.contains(5));
        assert!(marker.is_valid_for(5));
        assert!(!marker.is_valid_for(4));
        assert!(!Marker::new(3, 1).is_valid_for(10));
        assert!(Marker::new(0, 5).covers(5));
    }
}
