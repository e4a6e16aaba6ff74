#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rustyactivity::activity::summary::{lap_from_records, session_from_laps, summarize};
use rustyactivity::activity::{
    Activity, ActivityFile, Catalog, FileId, ManufacturerRef, Metrics, Preprocessor, Record,
    Session,
};
use rustyactivity::codec::{FitCodec, FormatCodec};

pub fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::load().expect("catalog should load"))
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 4, 8, 0, 0).unwrap()
}

/// Records heading north at a steady 3.34 m/s, starting `offset` seconds
/// after [`start_time`].
pub fn northbound_records(count: usize, offset: i64) -> Vec<Record> {
    (0..count)
        .map(|idx| {
            let step = idx as f64;
            Record {
                timestamp: Some(start_time() + Duration::seconds(offset + idx as i64)),
                position_lat: Some(45.0 + step * 0.00003),
                position_long: Some(7.0),
                altitude: Some(200.0 + (step / 10.0).sin() * 5.0),
                heart_rate: Some(140.0 + (idx % 10) as f64),
                cadence: Some(84.0),
                temperature: Some(18.0),
                ..Record::default()
            }
        })
        .collect()
}

/// A session assembled the way the codecs do it: preprocessed records, one
/// lap per chunk, aggregates from the laps.
pub fn session(sport: &str, records: Vec<Record>, laps: usize) -> Session {
    let mut records = records;
    Preprocessor::default().run(sport, &mut records);

    let chunk = records.len().div_ceil(laps.max(1)).max(1);
    let laps = records
        .chunks(chunk)
        .map(|chunk| lap_from_records(chunk, sport))
        .collect();

    let mut session = session_from_laps(laps, sport);
    session.records = records;
    summarize(&mut session);
    session
}

/// A Garmin Fenix 6 run of two laps.
pub fn sample_run() -> ActivityFile {
    let session = session("Running", northbound_records(120, 0), 2);
    ActivityFile {
        file_id: FileId {
            name: "Garmin Fenix 6".into(),
            manufacturer: Some(ManufacturerRef::Id(1)),
            product: Some(3290),
            time_created: Some(start_time()),
        },
        activity: Some(Activity {
            timestamp: session.end_time,
            num_sessions: Some(1),
            ..Activity::default()
        }),
        timezone: 2,
        sessions: vec![session],
    }
}

pub fn sample_fit() -> Vec<u8> {
    FitCodec::new(catalog())
        .encode(&sample_run())
        .expect("sample run should encode")
}

/// Compare every aggregate present on both sides within the precision FIT
/// stores them with.
pub fn assert_metrics_close(expected: &Metrics, actual: &Metrics) {
    for ((name, want), (_, got)) in expected.fields().into_iter().zip(actual.fields()) {
        let (Some(want), Some(got)) = (want, got) else {
            continue;
        };
        let tolerance = f64::max(1.0, want.abs() * 0.01);
        assert!(
            (want - got).abs() <= tolerance,
            "{name}: expected {want}, got {got}"
        );
    }
}
