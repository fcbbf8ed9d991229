//! Dataset handling
//!
//! - [`acquire`] - download, extract, persist and hash the raw table
//! - [`validation`] - schema, null, range and size checks
//! - [`features`] - label derivation and one-hot feature contract

pub mod acquire;
pub mod features;
pub mod validation;

pub use acquire::{code_version, data_version, file_hash, DatasetSnapshot};
pub use features::{FeatureBuilder, FeatureSet};
pub use validation::{ValidatedTable, ValidationConfig, ValidationReport, ValidationWarning, Validator};
