mod common;

use fitparser::profile::MesgNum;
use rustyactivity::activity::{FileType, ManufacturerRef};
use rustyactivity::codec::{CodecError, FitCodec, FormatCodec, GpxCodec, TcxCodec};

use common::{assert_metrics_close, catalog, sample_fit, sample_run};

#[test]
fn encoded_fit_is_well_formed() {
    let bytes = sample_fit();
    assert_eq!(FileType::detect(&bytes), Some(FileType::Fit));

    let messages = fitparser::from_bytes(&bytes).expect("fitparser reads the file back");
    let kinds: Vec<_> = messages.iter().map(|message| message.kind()).collect();
    assert_eq!(kinds.first(), Some(&MesgNum::FileId));
    assert_eq!(kinds.last(), Some(&MesgNum::Activity));
    assert_eq!(kinds.iter().filter(|kind| **kind == MesgNum::Lap).count(), 2);
    assert_eq!(kinds.iter().filter(|kind| **kind == MesgNum::Record).count(), 120);
}

#[test]
fn fit_round_trip_keeps_identity_and_structure() {
    let original = sample_run();
    let decoded = FitCodec::new(catalog())
        .decode(&sample_fit())
        .expect("decode")
        .remove(0);

    assert_eq!(decoded.file_id.name, "Garmin Fenix 6");
    assert_eq!(decoded.file_id.manufacturer, Some(ManufacturerRef::Id(1)));
    assert_eq!(decoded.file_id.product, Some(3290));
    assert_eq!(decoded.file_id.time_created, original.file_id.time_created);

    assert_eq!(decoded.sessions.len(), 1);
    let session = &decoded.sessions[0];
    assert_eq!(session.sport, "Running");
    assert_eq!(session.laps.len(), 2);
    assert_eq!(session.records.len(), original.sessions[0].records.len());
    assert_eq!(session.start_time, original.sessions[0].start_time);
}

#[test]
fn fit_round_trip_keeps_session_aggregates() {
    let original = sample_run();
    let decoded = FitCodec::new(catalog())
        .decode(&sample_fit())
        .expect("decode")
        .remove(0);

    assert_metrics_close(&original.sessions[0].metrics, &decoded.sessions[0].metrics);
    for (want, got) in original.sessions[0].laps.iter().zip(&decoded.sessions[0].laps) {
        assert_metrics_close(&want.metrics, &got.metrics);
    }
}

#[test]
fn fit_records_keep_positions() {
    let original = sample_run();
    let decoded = FitCodec::new(catalog())
        .decode(&sample_fit())
        .expect("decode")
        .remove(0);

    for (want, got) in original.sessions[0]
        .records
        .iter()
        .zip(&decoded.sessions[0].records)
    {
        assert_eq!(want.timestamp, got.timestamp);
        let lat = got.position_lat.expect("latitude");
        assert!((want.position_lat.unwrap() - lat).abs() < 1e-6);
        assert_eq!(want.heart_rate, got.heart_rate);
    }
}

#[test]
fn gpx_round_trip_keeps_track_shape() {
    let codec = GpxCodec::new(catalog());
    let bytes = codec.encode(&sample_run()).expect("encode");
    assert_eq!(FileType::detect(&bytes), Some(FileType::Gpx));

    let decoded = codec.decode(&bytes).expect("decode").remove(0);
    let session = &decoded.sessions[0];
    assert_eq!(session.sport, "Running");
    assert_eq!(session.laps.len(), 2);
    assert_eq!(session.records.len(), 120);

    let distance = session.metrics.total_distance.expect("distance");
    let expected = sample_run().sessions[0].metrics.total_distance.unwrap();
    assert!((distance - expected).abs() < 5.0, "{distance} vs {expected}");
}

#[test]
fn tcx_round_trip_keeps_laps_and_readings() {
    let codec = TcxCodec::new(catalog());
    let original = sample_run();
    let bytes = codec.encode(&original).expect("encode");
    assert_eq!(FileType::detect(&bytes), Some(FileType::Tcx));

    let decoded = codec.decode(&bytes).expect("decode").remove(0);
    assert_eq!(decoded.file_id.name, "Garmin Fenix 6");
    let session = &decoded.sessions[0];
    assert_eq!(session.sport, "Running");
    assert_eq!(session.laps.len(), 2);
    assert_eq!(session.records.len(), 120);

    for (want, got) in original.sessions[0].records.iter().zip(&session.records) {
        assert_eq!(want.timestamp, got.timestamp);
        assert_eq!(want.heart_rate, got.heart_rate);
        assert_eq!(want.cadence, got.cadence);
        let (Some(want), Some(got)) = (want.distance, got.distance) else {
            panic!("distance missing");
        };
        assert!((want - got).abs() < 1e-6, "{want} vs {got}");
    }
}

#[test]
fn garbage_is_not_a_fit_file() {
    let err = FitCodec::new(catalog()).decode(b"definitely not a fit file").unwrap_err();
    assert!(matches!(err, CodecError::FitDecode(_)));
}
