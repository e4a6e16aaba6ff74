//! Edits applied to decoded activities before they are re-encoded.

use thiserror::Error;
use tracing::debug;

use crate::activity::summary::{
    apply_pace, recompute_session, seconds_between, session_from_laps, summarize,
};
use crate::activity::{
    ActivityFile, Catalog, EncodeSpecifications, FileType, ManufacturerRef, Marker, ModelError,
    Record, Session, ToolMode, UNKNOWN_NAME,
};
use crate::codec::CodecError;
use crate::toolkit::sport_has_pace;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no activities to encode")]
    NoActivities,
    #[error("expected {expected} sport label(s) for {mode:?}, got {actual}")]
    SportCount {
        mode: ToolMode,
        expected: usize,
        actual: usize,
    },
    #[error("sport {0} is not in the catalog")]
    UnknownSport(String),
    #[error("expected {expected} {kind} marker(s), got {actual}")]
    MarkerCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} marker [{start_n}, {end_n}) does not fit session {session} with {len} records")]
    InvalidMarker {
        kind: &'static str,
        session: usize,
        start_n: usize,
        end_n: usize,
        len: usize,
    },
    #[error("manufacturer {0} is not in the catalog")]
    UnknownManufacturer(u16),
    #[error("no records left after trimming")]
    NothingLeft,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Run the edit pipeline and return the activities to encode, one per output
/// file.
pub fn apply(
    mut activities: Vec<ActivityFile>,
    spec: &EncodeSpecifications,
    catalog: &Catalog,
) -> Result<Vec<ActivityFile>, EncodeError> {
    if activities.is_empty() {
        return Err(EncodeError::NoActivities);
    }
    let lengths: Vec<usize> = activities
        .iter()
        .flat_map(|activity| activity.sessions.iter().map(|session| session.records.len()))
        .collect();
    check_directives(spec, &lengths)?;

    if spec.target_file_type == FileType::Fit {
        if let Some(id) = spec.manufacturer_id {
            if catalog.manufacturer(id).is_none() {
                return Err(EncodeError::UnknownManufacturer(id));
            }
        }
    }

    let sports = resolve_sports(spec, catalog)?;
    let mut index = 0;
    for activity in &mut activities {
        let mut keep = Vec::with_capacity(activity.sessions.len());
        for session in &mut activity.sessions {
            let label = match spec.tool_mode {
                ToolMode::SplitPerSession => sports.get(index),
                ToolMode::Edit | ToolMode::Combine => sports.first(),
            };
            if let Some(Some(sport)) = label {
                change_sport(session, sport);
            }
            if let Some(marker) = spec.conceal_markers.get(index) {
                conceal_outside(session, marker);
            }
            let emptied = match spec.trim_markers.get(index) {
                Some(marker) => trim(session, marker),
                None => false,
            };
            keep.push(!emptied);
            index += 1;
        }
        let mut keep = keep.into_iter();
        activity.sessions.retain(|_| keep.next().unwrap_or(true));
    }
    activities.retain(|activity| !activity.sessions.is_empty());
    if activities.is_empty() {
        return Err(EncodeError::NothingLeft);
    }

    if !spec.remove_fields.is_empty() {
        for session in activities.iter_mut().flat_map(|a| a.sessions.iter_mut()) {
            remove_fields(session, spec);
        }
    }

    for activity in &mut activities {
        apply_identity(activity, spec, catalog);
    }

    let output = match spec.tool_mode {
        ToolMode::Edit => activities,
        ToolMode::Combine => vec![combine(activities)],
        ToolMode::SplitPerSession => split(activities),
    };
    debug!(mode = spec.tool_mode.as_str(), files = output.len(), "applied edits");
    Ok(output)
}

fn check_directives(spec: &EncodeSpecifications, lengths: &[usize]) -> Result<(), EncodeError> {
    let expected = spec.expected_sport_count(lengths.len());
    if !spec.sports.is_empty() && spec.sports.len() != expected {
        return Err(EncodeError::SportCount {
            mode: spec.tool_mode,
            expected,
            actual: spec.sports.len(),
        });
    }

    for (kind, markers) in [("trim", &spec.trim_markers), ("conceal", &spec.conceal_markers)] {
        if markers.is_empty() {
            continue;
        }
        if markers.len() != lengths.len() {
            return Err(EncodeError::MarkerCount {
                kind,
                expected: lengths.len(),
                actual: markers.len(),
            });
        }
        for (session, (marker, len)) in markers.iter().zip(lengths).enumerate() {
            if !marker.is_valid_for(*len) {
                return Err(EncodeError::InvalidMarker {
                    kind,
                    session,
                    start_n: marker.start_n,
                    end_n: marker.end_n,
                    len: *len,
                });
            }
        }
    }
    Ok(())
}

/// Map each label to the catalog's spelling. Unknown labels are an error.
fn resolve_sports(
    spec: &EncodeSpecifications,
    catalog: &Catalog,
) -> Result<Vec<Option<String>>, EncodeError> {
    spec.sports
        .iter()
        .map(|label| match label.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => catalog
                .sport_by_name(name)
                .map(|sport| Some(sport.name.clone()))
                .ok_or_else(|| EncodeError::UnknownSport(name.to_string())),
        })
        .collect()
}

fn change_sport(session: &mut Session, sport: &str) {
    if session.sport == sport {
        return;
    }
    session.sport = sport.to_string();
    session.sub_sport = None;
    if sport_has_pace(sport) {
        apply_pace(&mut session.metrics, sport);
        for lap in &mut session.laps {
            apply_pace(&mut lap.metrics, sport);
        }
    } else {
        for record in &mut session.records {
            record.pace = None;
        }
        for metrics in std::iter::once(&mut session.metrics)
            .chain(session.laps.iter_mut().map(|lap| &mut lap.metrics))
        {
            metrics.avg_pace = None;
            metrics.avg_elapsed_pace = None;
        }
    }
}

/// Redact positions of every record outside `marker`.
fn conceal_outside(session: &mut Session, marker: &Marker) {
    for (idx, record) in session.records.iter_mut().enumerate() {
        if !marker.contains(idx) {
            record.position_lat = None;
            record.position_long = None;
        }
    }
}

/// Keep the records inside `marker`. Distance restarts at zero and laps and
/// session aggregates are rebuilt from what remains. Returns whether the
/// session lost every record.
fn trim(session: &mut Session, marker: &Marker) -> bool {
    let len = session.records.len();
    if marker.covers(len) {
        return false;
    }
    session.records.truncate(marker.end_n);
    session.records.drain(..marker.start_n);
    if session.records.is_empty() {
        return true;
    }

    rebase_distance(&mut session.records);
    session.start_time = None;
    session.end_time = None;
    session.timestamp = None;
    recompute_session(session);
    false
}

fn remove_fields(session: &mut Session, spec: &EncodeSpecifications) {
    for field in &spec.remove_fields {
        for record in &mut session.records {
            field.clear_record(record);
        }
        for lap in &mut session.laps {
            field.clear_metrics(&mut lap.metrics);
        }
        field.clear_metrics(&mut session.metrics);
    }
}

/// Replace the device identity when the caller chose a manufacturer.
fn apply_identity(activity: &mut ActivityFile, spec: &EncodeSpecifications, catalog: &Catalog) {
    let Some(manufacturer) = spec.manufacturer_id else {
        return;
    };
    activity.file_id.manufacturer = Some(ManufacturerRef::Id(manufacturer));
    activity.file_id.product = spec.product_id;
    activity.file_id.name = match spec.device_name.trim() {
        "" | UNKNOWN_NAME => catalog.creator_name(Some(manufacturer), spec.product_id),
        name => name.to_string(),
    };
}

/// Merge every activity into the first one. Distances are offset so they keep
/// increasing and adjacent sessions of one sport become a single session.
fn combine(mut activities: Vec<ActivityFile>) -> ActivityFile {
    activities.sort_by_key(|activity| activity.first_record_timestamp());

    let mut sessions: Vec<Session> = Vec::new();
    let mut offset = 0.0;
    for activity in &mut activities {
        let mut reached = offset;
        for session in &mut activity.sessions {
            for record in &mut session.records {
                if let Some(distance) = record.distance.as_mut() {
                    *distance += offset;
                    reached = f64::max(reached, *distance);
                }
            }
        }
        offset = reached;
        sessions.append(&mut activity.sessions);
    }

    let mut merged: Vec<Session> = Vec::with_capacity(sessions.len());
    for session in sessions {
        match merged.last_mut() {
            Some(last) if last.sport == session.sport => merge_sessions(last, session),
            _ => merged.push(session),
        }
    }

    let mut combined = activities.swap_remove(0);
    combined.sessions = merged;
    if let Some(meta) = combined.activity.as_mut() {
        meta.num_sessions = u16::try_from(combined.sessions.len()).ok();
    }
    combined
}

/// The pause between the two sessions counts towards the timer as well as the
/// elapsed time of the merged session.
fn merge_sessions(into: &mut Session, next: Session) {
    let gap = match (into.end_time, next.start_time) {
        (Some(end), Some(start)) if start > end => Some(seconds_between(end, start)),
        _ => None,
    };
    let mut laps = std::mem::take(&mut into.laps);
    laps.extend(next.laps);
    let mut records = std::mem::take(&mut into.records);
    records.extend(next.records);

    let mut session = session_from_laps(laps, &into.sport);
    session.sub_sport = into.sub_sport.take();
    session.records = records;
    if let (Some(gap), Some(timer)) = (gap, session.metrics.total_timer_time.as_mut()) {
        *timer += gap;
    }
    summarize(&mut session);
    *into = session;
}

fn split(activities: Vec<ActivityFile>) -> Vec<ActivityFile> {
    let mut output = Vec::new();
    for activity in activities {
        for mut session in activity.sessions {
            rebase_distance(&mut session.records);
            let mut meta = activity.activity.clone();
            if let Some(meta) = meta.as_mut() {
                meta.num_sessions = Some(1);
                meta.timestamp = session.timestamp.or(session.end_time);
            }
            output.push(ActivityFile {
                file_id: activity.file_id.clone(),
                activity: meta,
                timezone: activity.timezone,
                sessions: vec![session],
            });
        }
    }
    output
}

fn rebase_distance(records: &mut [Record]) {
    let Some(base) = records.iter().find_map(|record| record.distance) else {
        return;
    };
    for record in records.iter_mut() {
        if let Some(distance) = record.distance.as_mut() {
            *distance = (*distance - base).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::summary::tests::running_records;
    use crate::activity::RecordField;

    fn catalog() -> Catalog {
        Catalog::load().expect("catalog")
    }

    fn running_activity(records: usize) -> ActivityFile {
        let mut session = Session {
            sport: "Running".into(),
            records: running_records(records),
            ..Session::default()
        };
        recompute_session(&mut session);
        ActivityFile {
            sessions: vec![session],
            ..ActivityFile::default()
        }
    }

    #[test]
    fn wrong_sport_count_is_rejected() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.sports = vec![Some("Running".into()), Some("Cycling".into())];
        let err = apply(vec![running_activity(5)], &spec, &catalog()).unwrap_err();
        assert!(matches!(err, EncodeError::SportCount { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn unknown_sport_label_is_rejected() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.sports = vec![Some("Quidditch".into())];
        let err = apply(vec![running_activity(5)], &spec, &catalog()).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownSport(name) if name == "Quidditch"));
    }

    #[test]
    fn changing_to_cycling_clears_pace() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.sports = vec![Some("cycling".into())];
        let out = apply(vec![running_activity(5)], &spec, &catalog()).unwrap();
        let session = &out[0].sessions[0];
        assert_eq!(session.sport, "Cycling");
        assert_eq!(session.metrics.avg_pace, None);
        assert!(session.records.iter().all(|record| record.pace.is_none()));
    }

    #[test]
    fn trim_keeps_marker_range_and_rebases_distance() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.trim_markers = vec![Marker::new(2, 6)];
        let out = apply(vec![running_activity(10)], &spec, &catalog()).unwrap();
        let session = &out[0].sessions[0];
        assert_eq!(session.records.len(), 4);
        assert_eq!(session.records[0].distance, Some(0.0));
        assert_eq!(session.records[3].distance, Some(9.0));
        assert_eq!(session.metrics.total_elapsed_time, Some(3.0));
        assert_eq!(session.metrics.total_distance, Some(9.0));
    }

    #[test]
    fn marker_past_the_end_is_rejected() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.trim_markers = vec![Marker::new(2, 11)];
        let err = apply(vec![running_activity(10)], &spec, &catalog()).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidMarker { kind: "trim", len: 10, .. }));
    }

    #[test]
    fn empty_trim_drops_everything() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.trim_markers = vec![Marker::new(3, 3)];
        let err = apply(vec![running_activity(10)], &spec, &catalog()).unwrap_err();
        assert!(matches!(err, EncodeError::NothingLeft));
    }

    #[test]
    fn conceal_redacts_positions_outside_marker() {
        let mut activity = running_activity(6);
        for record in &mut activity.sessions[0].records {
            record.position_lat = Some(45.0);
            record.position_long = Some(7.0);
        }
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Gpx);
        spec.conceal_markers = vec![Marker::new(1, 4)];
        let out = apply(vec![activity], &spec, &catalog()).unwrap();
        let concealed: Vec<bool> = out[0].sessions[0]
            .records
            .iter()
            .map(Record::has_position)
            .collect();
        assert_eq!(concealed, vec![false, true, true, true, false, false]);
    }

    #[test]
    fn removed_fields_become_absent() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.remove_fields = vec![RecordField::HeartRate];
        let out = apply(vec![running_activity(5)], &spec, &catalog()).unwrap();
        let session = &out[0].sessions[0];
        assert!(session.records.iter().all(|record| record.heart_rate.is_none()));
        assert_eq!(session.metrics.avg_heart_rate, None);
        assert_eq!(session.laps[0].metrics.max_heart_rate, None);
        assert!(session.metrics.total_distance.is_some());
    }

    #[test]
    fn fit_target_requires_known_manufacturer() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.manufacturer_id = Some(9999);
        let err = apply(vec![running_activity(5)], &spec, &catalog()).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownManufacturer(9999)));
    }

    #[test]
    fn identity_is_replaced_with_catalog_name() {
        let mut spec = EncodeSpecifications::new(ToolMode::Edit, FileType::Fit);
        spec.manufacturer_id = Some(1);
        spec.product_id = Some(3290);
        let out = apply(vec![running_activity(5)], &spec, &catalog()).unwrap();
        assert_eq!(out[0].file_id.name, "Garmin Fenix 6");
        assert_eq!(out[0].file_id.manufacturer, Some(ManufacturerRef::Id(1)));
    }

    #[test]
    fn combine_offsets_distance_and_merges_same_sport() {
        let first = running_activity(5);
        let mut second = running_activity(5);
        for record in &mut second.sessions[0].records {
            record.timestamp = record.timestamp.map(|ts| ts + chrono::Duration::seconds(60));
        }
        let mut second_session = second.sessions.remove(0);
        second_session.start_time = None;
        second_session.end_time = None;
        second_session.timestamp = None;
        recompute_session(&mut second_session);
        second.sessions.push(second_session);

        let spec = EncodeSpecifications::new(ToolMode::Combine, FileType::Fit);
        let out = apply(vec![second, first], &spec, &catalog()).unwrap();
        assert_eq!(out.len(), 1);

        let session = &out[0].sessions[0];
        assert_eq!(out[0].sessions.len(), 1);
        assert_eq!(session.records.len(), 10);
        assert_eq!(session.laps.len(), 2);
        assert_eq!(session.records[9].distance, Some(24.0));
        assert_eq!(session.metrics.total_elapsed_time, Some(64.0));
        assert_eq!(session.metrics.total_timer_time, Some(64.0));
        assert_eq!(session.metrics.total_distance, Some(24.0));
    }

    #[test]
    fn split_emits_one_activity_per_session() {
        let mut activity = running_activity(4);
        let mut second = running_activity(4).sessions.remove(0);
        second.sport = "Walking".into();
        activity.sessions.push(second);

        let mut spec = EncodeSpecifications::new(ToolMode::SplitPerSession, FileType::Gpx);
        spec.sports = vec![None, Some("Hiking".into())];
        let out = apply(vec![activity], &spec, &catalog()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sessions[0].sport, "Running");
        assert_eq!(out[1].sessions[0].sport, "Hiking");
        assert_eq!(out[1].sessions[0].records[0].distance, Some(0.0));
    }
}
