//! Error taxonomy for the segmentation pipeline

use polars::prelude::PolarsError;
use thiserror::Error;

/// Every failure is fatal for the run; there is no partial output.
#[derive(Debug, Error)]
pub enum RfmError {
    #[error("no transactions to segment")]
    EmptyDataset,
    #[error("input is missing required column `{0}`")]
    MissingColumn(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid cluster count {k} for {customers} customers: {reason}")]
    InvalidClusterCount {
        k: usize,
        customers: usize,
        reason: &'static str,
    },
    #[error("invalid cluster range {min}..={max}: {reason}")]
    InvalidKRange {
        min: usize,
        max: usize,
        reason: &'static str,
    },
    #[error("{rows} RFM rows but {labels} cluster labels")]
    Misaligned { rows: usize, labels: usize },
    #[error("clustering failed: {0}")]
    Clustering(String),
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
