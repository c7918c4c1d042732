//! Coverage read errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("cannot stat region {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read region {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type CoverageResult<T> = Result<T, CoverageError>;
