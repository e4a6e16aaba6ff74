//! Format codecs translating between file bytes and [`ActivityFile`]s.

pub mod fit;
pub mod gpx;
pub mod tcx;

use thiserror::Error;

use crate::activity::summary::{rebuild_laps, recompute_session, summarize};
use crate::activity::{ActivityFile, FileType, Preprocessor, Session};

pub use self::fit::FitCodec;
pub use self::gpx::GpxCodec;
pub use self::tcx::TcxCodec;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode FIT file: {0}")]
    FitDecode(String),
    #[error("failed to encode FIT file: {0}")]
    FitEncode(String),
    #[error("failed to decode GPX file: {0}")]
    GpxDecode(String),
    #[error("failed to encode GPX file: {0}")]
    GpxEncode(String),
    #[error("file type is not recognized")]
    UnrecognizedFileType,
    #[error("failed to decode TCX file: {0}")]
    TcxDecode(String),
    #[error("failed to encode TCX file: {0}")]
    TcxEncode(String),
    #[error("file does not contain any activity")]
    NoActivity,
    #[error("manufacturer {0} is not in the catalog")]
    UnknownManufacturer(String),
}

/// A bidirectional translator for one file format.
pub trait FormatCodec: Send + Sync {
    fn file_type(&self) -> FileType;

    /// Decode every activity contained in `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<ActivityFile>, CodecError>;

    fn encode(&self, activity: &ActivityFile) -> Result<Vec<u8>, CodecError>;
}

/// Enrich a freshly decoded session: preprocess its records, derive laps when
/// the source carried none, and fill absent aggregates.
pub(crate) fn finalize_session(preprocessor: &Preprocessor, session: &mut Session) {
    preprocessor.run(&session.sport, &mut session.records);
    if session.laps.is_empty() && session.metrics == Default::default() {
        recompute_session(session);
    } else {
        if session.laps.is_empty() {
            rebuild_laps(session);
        }
        summarize(session);
    }
}
