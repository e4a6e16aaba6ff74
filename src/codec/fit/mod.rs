//! FIT activity files, read with `fitparser` and written back with its
//! record encoder.

mod decode;
mod encode;

use std::sync::Arc;

use tracing::debug;

use super::{CodecError, FormatCodec};
use crate::activity::{ActivityFile, Catalog, FileType, Preprocessor};

pub struct FitCodec {
    catalog: Arc<Catalog>,
    preprocessor: Preprocessor,
}

impl FitCodec {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        FitCodec {
            catalog,
            preprocessor: Preprocessor::default(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }
}

impl FormatCodec for FitCodec {
    fn file_type(&self) -> FileType {
        FileType::Fit
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<ActivityFile>, CodecError> {
        let activities = decode::decode_activities(bytes, &self.catalog, &self.preprocessor)?;
        debug!(activities = activities.len(), bytes = bytes.len(), "decoded FIT file");
        Ok(activities)
    }

    fn encode(&self, activity: &ActivityFile) -> Result<Vec<u8>, CodecError> {
        let encoded = encode::encode_activity(activity, &self.catalog)?;
        debug!(bytes = encoded.len(), sessions = activity.sessions.len(), "encoded FIT file");
        Ok(encoded)
    }
}
