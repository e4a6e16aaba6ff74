use thiserror::Error;

use super::types::{ActivityFile, Session};
use super::{GENERIC_SPORT, UNKNOWN_NAME};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed activity payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("activity has no sessions")]
    NoSessions,
    #[error("session {session}: record {index} is earlier than the record before it")]
    UnorderedRecords { session: usize, index: usize },
    #[error("session {session}: lap {lap} falls outside the session time range")]
    LapOutOfRange { session: usize, lap: usize },
    #[error("session {session}: {field} is not a finite number")]
    NonFinite { session: usize, field: &'static str },
}

impl ActivityFile {
    /// Deserialize and validate a payload in one step.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        let mut activity: ActivityFile = serde_json::from_value(value)?;
        activity.validate()?;
        Ok(activity)
    }

    /// Fill defaults and reject structurally invalid activities.
    pub fn validate(&mut self) -> Result<(), ModelError> {
        if self.file_id.name.trim().is_empty() {
            self.file_id.name = UNKNOWN_NAME.to_string();
        }
        if self.sessions.is_empty() {
            return Err(ModelError::NoSessions);
        }

        for (idx, session) in self.sessions.iter_mut().enumerate() {
            validate_session(idx, session)?;
        }
        Ok(())
    }
}

fn validate_session(idx: usize, session: &mut Session) -> Result<(), ModelError> {
    if session.sport.trim().is_empty() {
        session.sport = GENERIC_SPORT.to_string();
    }

    if let Some((field, _)) = session
        .metrics
        .fields()
        .into_iter()
        .find(|(_, value)| value.is_some_and(|value| !value.is_finite()))
    {
        return Err(ModelError::NonFinite {
            session: idx,
            field,
        });
    }

    let mut previous = None;
    for (record_idx, record) in session.records.iter().enumerate() {
        let Some(timestamp) = record.timestamp else {
            continue;
        };
        if previous.is_some_and(|previous| timestamp < previous) {
            return Err(ModelError::UnorderedRecords {
                session: idx,
                index: record_idx,
            });
        }
        previous = Some(timestamp);
    }

    for (lap_idx, lap) in session.laps.iter().enumerate() {
        let starts_early = matches!(
            (lap.start_time, session.start_time),
            (Some(lap_start), Some(session_start)) if lap_start < session_start
        );
        let ends_late = matches!(
            (lap.end_time, session.end_time),
            (Some(lap_end), Some(session_end)) if lap_end > session_end
        );
        if starts_early || ends_late {
            return Err(ModelError::LapOutOfRange {
                session: idx,
                lap: lap_idx,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_defaults() {
        let activity = ActivityFile::from_value(json!({
            "fileId": { "manufacturer": 1 },
            "sessions": [{ "sport": null, "records": [] }]
        }))
        .expect("valid activity");

        assert_eq!(activity.file_id.name, "Unknown");
        assert_eq!(activity.sessions[0].sport, "Generic");
    }

    #[test]
    fn missing_file_id_is_rejected() {
        let err = ActivityFile::from_value(json!({ "sessions": [{}] })).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
        assert!(err.to_string().contains("fileId"));
    }

    #[test]
    fn empty_activity_is_rejected() {
        let err = ActivityFile::from_value(json!({ "fileId": {}, "sessions": [] })).unwrap_err();
        assert!(matches!(err, ModelError::NoSessions));
    }

    #[test]
    fn records_must_be_time_ordered() {
        let err = ActivityFile::from_value(json!({
            "fileId": {},
            "sessions": [{
                "records": [
                    { "timestamp": "2024-03-01T06:00:10Z" },
                    { "timestamp": "2024-03-01T06:00:05Z" }
                ]
            }]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnorderedRecords {
                session: 0,
                index: 1
            }
        ));
    }

    #[test]
    fn laps_must_fit_their_session() {
        let err = ActivityFile::from_value(json!({
            "fileId": {},
            "sessions": [{
                "startTime": "2024-03-01T06:00:00Z",
                "endTime": "2024-03-01T07:00:00Z",
                "laps": [{
                    "startTime": "2024-03-01T06:30:00Z",
                    "endTime": "2024-03-01T07:30:00Z"
                }]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::LapOutOfRange { session: 0, lap: 0 }));
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let err = ActivityFile::from_value(json!({
            "fileId": {},
            "sessions": [{ "totalDistance": "far" }]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }
}
