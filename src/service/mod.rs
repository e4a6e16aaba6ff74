//! The codec service: decode, encode and catalog listings behind one
//! interface. Failures are reported in the `err` field of each result so the
//! timings survive.

pub mod edit;
pub mod result;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::activity::{
    ActivityFile, Catalog, CatalogError, EncodeSpecifications, FileType, ModelError, ToolMode,
};
use crate::codec::{CodecError, FitCodec, FormatCodec, GpxCodec, TcxCodec};

pub use edit::EncodeError;
pub use result::{
    DecodeResult, EncodeRequest, EncodeResult, EncodedFile, ManufacturerList, SportList,
};

const FILE_PREFIX: &str = "rustyactivity";

/// Operations served by the dispatcher's worker.
pub trait ActivityCodec: Send + 'static {
    fn decode(&self, bytes: &[u8]) -> DecodeResult;

    /// `request` is the JSON form of an [`EncodeRequest`]; it is validated
    /// before anything is encoded.
    fn encode(&self, request: Value) -> EncodeResult;

    fn manufacturer_list(&self) -> ManufacturerList;

    fn sport_list(&self) -> SportList;
}

pub struct ActivityService {
    catalog: Arc<Catalog>,
    fit: FitCodec,
    gpx: GpxCodec,
    tcx: TcxCodec,
}

impl ActivityService {
    pub fn new() -> Result<Self, CatalogError> {
        Ok(Self::with_catalog(Arc::new(Catalog::load()?)))
    }

    pub fn with_catalog(catalog: Arc<Catalog>) -> Self {
        ActivityService {
            fit: FitCodec::new(Arc::clone(&catalog)),
            gpx: GpxCodec::new(Arc::clone(&catalog)),
            tcx: TcxCodec::new(Arc::clone(&catalog)),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn codec_for(&self, file_type: FileType) -> &dyn FormatCodec {
        match file_type {
            FileType::Fit => &self.fit,
            FileType::Gpx => &self.gpx,
            FileType::Tcx => &self.tcx,
        }
    }

    fn decode_activities(&self, bytes: &[u8]) -> Result<Vec<ActivityFile>, CodecError> {
        let file_type = FileType::detect(bytes).ok_or(CodecError::UnrecognizedFileType)?;
        let mut activities = self.codec_for(file_type).decode(bytes)?;
        activities.sort_by_key(|activity| {
            (
                activity.file_id.time_created,
                activity.first_record_timestamp(),
            )
        });
        Ok(activities)
    }

    fn encode_files(
        &self,
        activities: Vec<ActivityFile>,
        spec: &EncodeSpecifications,
    ) -> Result<Vec<EncodedFile>, EncodeError> {
        let outputs = edit::apply(activities, spec, &self.catalog)?;
        let codec = self.codec_for(spec.target_file_type);

        let stamp = Utc::now().timestamp();
        let numbered = outputs.len() > 1;
        let mut files = Vec::with_capacity(outputs.len());
        for (idx, activity) in outputs.iter().enumerate() {
            let bytes = codec.encode(activity)?;
            let number = numbered.then_some(idx + 1);
            files.push(EncodedFile {
                name: file_name(stamp, spec.tool_mode, number, codec.file_type()),
                file_type: codec.file_type(),
                bytes,
            });
        }
        Ok(files)
    }
}

impl ActivityCodec for ActivityService {
    fn decode(&self, bytes: &[u8]) -> DecodeResult {
        let started = Instant::now();
        match self.decode_activities(bytes) {
            Ok(activities) => {
                let took = elapsed_ms(started);
                debug!(activities = activities.len(), took_ms = took, "decode finished");
                DecodeResult {
                    err: None,
                    activities,
                    decode_took: took,
                    serialization_took: 0,
                    total_elapsed: took,
                }
            }
            Err(err) => {
                warn!(error = %err, "decode failed");
                DecodeResult::failed(err, elapsed_ms(started))
            }
        }
    }

    fn encode(&self, request: Value) -> EncodeResult {
        let started = Instant::now();
        let request = match parse_request(request) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "encode input rejected");
                return EncodeResult::failed(err, elapsed_ms(started));
            }
        };
        let deserialize_input_took = elapsed_ms(started);

        let encoding = Instant::now();
        match self.encode_files(request.activities, &request.spec) {
            Ok(files) => {
                let encode_took = elapsed_ms(encoding);
                debug!(files = files.len(), took_ms = encode_took, "encode finished");
                EncodeResult {
                    err: None,
                    files,
                    deserialize_input_took,
                    encode_took,
                    serialization_took: 0,
                    total_elapsed: elapsed_ms(started),
                }
            }
            Err(err) => {
                warn!(error = %err, "encode failed");
                EncodeResult {
                    deserialize_input_took,
                    ..EncodeResult::failed(err, elapsed_ms(started))
                }
            }
        }
    }

    fn manufacturer_list(&self) -> ManufacturerList {
        ManufacturerList {
            manufacturers: self.catalog.manufacturers().to_vec(),
        }
    }

    fn sport_list(&self) -> SportList {
        SportList {
            sports: self.catalog.sports().to_vec(),
        }
    }
}

/// Deserialize an encode payload and validate every activity in it.
fn parse_request(request: Value) -> Result<EncodeRequest, EncodeError> {
    let mut request: EncodeRequest =
        serde_json::from_value(request).map_err(ModelError::from)?;
    for activity in &mut request.activities {
        activity.validate()?;
    }
    Ok(request)
}

fn file_name(stamp: i64, mode: ToolMode, number: Option<usize>, file_type: FileType) -> String {
    match number {
        Some(number) => format!(
            "{FILE_PREFIX}-{stamp}-{}-{number}.{}",
            mode.as_str(),
            file_type.extension()
        ),
        None => format!("{FILE_PREFIX}-{stamp}-{}.{}", mode.as_str(), file_type.extension()),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_carry_mode_and_number() {
        assert_eq!(
            file_name(1_700_000_000, ToolMode::Edit, None, FileType::Fit),
            "rustyactivity-1700000000-edit.fit"
        );
        assert_eq!(
            file_name(1_700_000_000, ToolMode::SplitPerSession, Some(2), FileType::Gpx),
            "rustyactivity-1700000000-split-2.gpx"
        );
    }

    #[test]
    fn unrecognized_bytes_report_err() {
        let service = ActivityService::new().expect("service");
        let result = service.decode(b"hello world");
        assert_eq!(result.err.as_deref(), Some("file type is not recognized"));
        assert!(result.activities.is_empty());
    }

    #[test]
    fn tcx_without_activities_reports_err() {
        let service = ActivityService::new().expect("service");
        let result = service.decode(br#"<?xml version="1.0"?><TrainingCenterDatabase/>"#);
        assert_eq!(result.err.as_deref(), Some("file does not contain any activity"));
    }

    #[test]
    fn encode_without_file_id_is_rejected() {
        let service = ActivityService::new().expect("service");
        let result = service.encode(serde_json::json!({
            "activities": [{ "sessions": [] }],
            "spec": { "toolMode": "edit", "targetFileType": "fit" }
        }));
        let err = result.err.expect("err");
        assert!(err.contains("fileId"), "{err}");
        assert!(result.files.is_empty());
    }

    #[test]
    fn listings_come_from_catalog() {
        let service = ActivityService::new().expect("service");
        assert!(service.manufacturer_list().manufacturers.iter().any(|m| m.name == "Garmin"));
        assert!(service.sport_list().sports.iter().any(|s| s.name == "Running"));
    }
}
