//! Canonical activity model shared by every codec, the edit pipeline and the
//! analytics layer.

pub mod catalog;
pub mod edit;
pub mod preprocess;
pub mod summary;
pub mod types;
mod validate;

pub use catalog::{Catalog, CatalogError, Manufacturer, Product, Sport};
pub use edit::{EncodeSpecifications, FileType, Marker, RecordField, ToolMode};
pub use preprocess::Preprocessor;
pub use types::{
    Activity, ActivityFile, FileId, Lap, ManufacturerRef, Metrics, Record, Session, Summary,
    WorkoutType,
};
pub use validate::ModelError;

/// Sport assigned when the source does not name one.
pub const GENERIC_SPORT: &str = "Generic";

/// Creator name used when the device cannot be resolved.
pub const UNKNOWN_NAME: &str = "Unknown";
