use serde::{Deserialize, Serialize};

use crate::activity::{ActivityFile, EncodeSpecifications, FileType, Manufacturer, Sport};

/// Outcome of one decode call. Timings are milliseconds and carry no meaning
/// when `err` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeResult {
    pub err: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityFile>,
    #[serde(default)]
    pub decode_took: u64,
    #[serde(default)]
    pub serialization_took: u64,
    #[serde(default)]
    pub total_elapsed: u64,
}

impl DecodeResult {
    pub fn failed(err: impl ToString, total_elapsed: u64) -> Self {
        DecodeResult {
            err: Some(err.to_string()),
            total_elapsed,
            ..DecodeResult::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFile {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeResult {
    pub err: Option<String>,
    #[serde(default)]
    pub files: Vec<EncodedFile>,
    #[serde(default)]
    pub deserialize_input_took: u64,
    #[serde(default)]
    pub encode_took: u64,
    #[serde(default)]
    pub serialization_took: u64,
    #[serde(default)]
    pub total_elapsed: u64,
}

impl EncodeResult {
    pub fn failed(err: impl ToString, total_elapsed: u64) -> Self {
        EncodeResult {
            err: Some(err.to_string()),
            total_elapsed,
            ..EncodeResult::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManufacturerList {
    pub manufacturers: Vec<Manufacturer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SportList {
    pub sports: Vec<Sport>,
}

/// Payload of an encode call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub activities: Vec<ActivityFile>,
    pub spec: EncodeSpecifications,
}
