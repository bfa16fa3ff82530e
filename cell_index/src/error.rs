//! Error kinds for loading datasets and answering queries.
//!
//! "Found nothing" is never an error: queries return empty collections or `None`. Everything in
//! here means the request was malformed or the search itself failed.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A configured input file is missing on disk.
    #[error("dataset {name:?} not found: {path} does not exist")]
    DatasetNotFound { name: String, path: PathBuf },

    /// The dataset is absent from configuration or its configuration does not match the data.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller sent something we can't evaluate (unknown channel, non-numeric bound, ...).
    #[error("invalid query: {0}")]
    Validation(String),

    #[error("neighborhood {0} not found")]
    NeighborhoodNotFound(u64),

    #[error("dataset {0:?} has no neighborhood composition table")]
    CompositionUnavailable(String),

    /// A persisted spatial index is truncated or not an index at all.
    #[error("malformed spatial index file: {0}")]
    IndexFormat(String),

    /// A persisted spatial index was written by a different format version.
    #[error("spatial index format version {found} is not supported (expected {expected})")]
    IndexVersion { found: u16, expected: u16 },

    /// A persisted neighborhood record could not be read back.
    #[error("malformed neighborhood record: {0}")]
    Record(String),

    /// Input tables have the wrong shape or contain values we can't index.
    #[error("malformed data: {0}")]
    Data(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {

    /// Whether the failure was caused by the request rather than by the server.
    pub fn is_client_error(&self) -> bool {

        return matches!(
            self,
            Error::DatasetNotFound { .. }
                | Error::Configuration(_)
                | Error::Validation(_)
                | Error::NeighborhoodNotFound(_)
                | Error::CompositionUnavailable(_)
        );
    }
}

pub type Result<T> = std::result::Result<T, Error>;
