//! Common errors across the emip-diag crate
use std::path::{Path, PathBuf};

/// Error returned when grouping is requested on an attribute that
/// metadata records do not carry.
#[derive(Debug, thiserror::Error)]
#[error("'{0}' is not a metadata attribute that records can be grouped by")]
pub struct InvalidKeyError(pub String);

/// Errors reading a cube or metadata document from disk.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file does not exist or could not be opened/read at all.
    #[error("Could not read {} because: {reason}", path.display())]
    CouldNotRead { path: PathBuf, reason: String },
    /// The file could be read, but its contents are not a recognizable array
    /// (or metadata collection).
    #[error("{} does not contain a recognizable array: {cause}", path.display())]
    Malformed { path: PathBuf, cause: String },
    /// The file extension does not correspond to any format this build can load.
    #[error("Cannot load {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },
}

impl DataLoadError {
    pub(crate) fn could_not_read<E: ToString>(path: &Path, reason: E) -> Self {
        Self::CouldNotRead { path: path.to_owned(), reason: reason.to_string() }
    }

    pub(crate) fn malformed<S: ToString>(path: &Path, cause: S) -> Self {
        Self::Malformed { path: path.to_owned(), cause: cause.to_string() }
    }

    pub(crate) fn unsupported<S: ToString>(path: &Path, reason: S) -> Self {
        Self::UnsupportedFormat { path: path.to_owned(), reason: reason.to_string() }
    }
}

/// Error returned when two arrays that must share a grid do not.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Array of shape {right:?} cannot be applied to an array of shape {left:?}")]
pub struct ShapeMismatchError {
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

impl ShapeMismatchError {
    pub fn new(left: &[usize], right: &[usize]) -> Self {
        Self { left: left.to_vec(), right: right.to_vec() }
    }
}

/// Error returned when an ensemble/variant identifier is not in the ensemble table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Ensemble '{0}' is not listed in the ensemble table")]
pub struct UnknownEnsembleError(pub String);

/// Errors writing plots or plotted data.
#[derive(Debug, thiserror::Error)]
pub enum OutputWriteError {
    #[error("Could not create output directory {} because: {reason}", path.display())]
    CreateDir { path: PathBuf, reason: String },
    #[error("Could not write {} because: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error("Cannot write {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },
}

impl OutputWriteError {
    pub(crate) fn write<E: ToString>(path: &Path, reason: E) -> Self {
        Self::Write { path: path.to_owned(), reason: reason.to_string() }
    }
}
