//! Feature normalization: log1p followed by per-column standardization

use ndarray::{Array1, Array2, Axis};
use tracing::{debug, warn};

use crate::data::RfmTable;
use crate::error::RfmError;

pub const FEATURE_NAMES: [&str; 3] = ["recency_scaled", "frequency_scaled", "monetary_scaled"];

/// Column-wise standardizer using the population standard deviation (ddof = 0)
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    /// Fit column means and standard deviations
    pub fn fit(data: &Array2<f64>) -> crate::Result<Self> {
        let mean = data.mean_axis(Axis(0)).ok_or(RfmError::EmptyDataset)?;
        let std = data.std_axis(Axis(0), 0.0);
        Ok(Self { mean, std })
    }

    /// A column is degenerate when every row holds the same value
    pub fn is_degenerate(&self, column: usize) -> bool {
        let tolerance = 10.0 * f64::EPSILON * self.mean[column].abs().max(1.0);
        self.std[column] <= tolerance
    }

    /// Standardize `data`; degenerate columns become all zeros
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            if self.is_degenerate(j) {
                column.fill(0.0);
            } else {
                let (mean, std) = (self.mean[j], self.std[j]);
                column.mapv_inplace(|v| (v - mean) / std);
            }
        }
        scaled
    }
}

/// Normalized feature matrix, row-aligned with the RFM table it came from
#[derive(Debug, Clone)]
pub struct NormalizedFeatures {
    /// (n_customers, 3): recency, frequency, monetary
    pub matrix: Array2<f64>,
    /// Scaler fitted on the log-transformed values
    pub scaler: StandardScaler,
}

/// Reduce skew with log(1 + x); all RFM values are non-negative
pub fn log_transform(raw: &Array2<f64>) -> Array2<f64> {
    raw.mapv(f64::ln_1p)
}

/// Log-transform and standardize the RFM table
pub fn normalize_rfm(rfm: &RfmTable) -> crate::Result<NormalizedFeatures> {
    if rfm.is_empty() {
        return Err(RfmError::EmptyDataset);
    }

    let logged = log_transform(&rfm.raw_features());
    let scaler = StandardScaler::fit(&logged)?;

    for (j, name) in FEATURE_NAMES.iter().enumerate() {
        if scaler.is_degenerate(j) {
            warn!(feature = *name, "zero variance, column standardized to 0");
        }
    }

    let matrix = scaler.transform(&logged);
    debug!(shape = ?matrix.shape(), "normalized RFM features");

    Ok(NormalizedFeatures { matrix, scaler })
}
