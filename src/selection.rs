//! Cluster count sweep: inertia and silhouette for each candidate k

use std::ops::RangeInclusive;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::error::RfmError;
use crate::model::{fit_kmeans, KMeansConfig};

/// Inclusive range of candidate cluster counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KRange {
    min: usize,
    max: usize,
}

impl KRange {
    pub fn new(min: usize, max: usize) -> crate::Result<Self> {
        if min < 2 {
            return Err(RfmError::InvalidKRange {
                min,
                max,
                reason: "silhouette is undefined below 2 clusters",
            });
        }
        if min > max {
            return Err(RfmError::InvalidKRange {
                min,
                max,
                reason: "lower bound exceeds upper bound",
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn candidates(&self) -> RangeInclusive<usize> {
        self.min..=self.max
    }
}

impl Default for KRange {
    fn default() -> Self {
        Self { min: 2, max: 10 }
    }
}

/// Quality metrics of one candidate k
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterQuality {
    pub k: usize,
    /// Within-cluster sum of squares, for the elbow method
    pub inertia: f64,
    pub silhouette: f64,
}

/// How the final cluster count is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KChoice {
    Fixed(usize),
    /// Highest silhouette among the swept candidates, smallest k on ties
    BestSilhouette,
}

impl Default for KChoice {
    fn default() -> Self {
        KChoice::Fixed(4)
    }
}

impl KChoice {
    pub fn resolve(&self, quality: &[ClusterQuality]) -> crate::Result<usize> {
        match *self {
            KChoice::Fixed(k) => Ok(k),
            KChoice::BestSilhouette => best_silhouette(quality).ok_or_else(|| {
                RfmError::Clustering("no valid candidate k to choose from".to_string())
            }),
        }
    }
}

/// Fit K-Means for every candidate k and record inertia and silhouette
///
/// Candidates without a defined silhouette (k >= number of customers, or
/// fewer than two populated clusters on degenerate data) are skipped; the
/// result may therefore be shorter than the range.
pub fn evaluate_k_range(
    features: &Array2<f64>,
    range: KRange,
    config: &KMeansConfig,
) -> crate::Result<Vec<ClusterQuality>> {
    let n_samples = features.nrows();
    let mut quality = Vec::with_capacity(range.candidates().count());

    for k in range.candidates() {
        if k >= n_samples {
            warn!(k, customers = n_samples, "rejecting candidate k without a defined silhouette");
            continue;
        }

        let model = fit_kmeans(features, k, config)?;
        let silhouette = match model.silhouette(features) {
            Ok(score) => score,
            Err(err) => {
                warn!(k, error = %err, "rejecting candidate k with undefined silhouette");
                continue;
            }
        };
        debug!(k, inertia = model.inertia, silhouette, "evaluated candidate");

        quality.push(ClusterQuality {
            k,
            inertia: model.inertia,
            silhouette,
        });
    }

    info!(
        candidates = quality.len(),
        min = range.min(),
        max = range.max(),
        "cluster count sweep finished"
    );
    Ok(quality)
}

/// The k with the highest silhouette; the earliest wins ties
pub fn best_silhouette(quality: &[ClusterQuality]) -> Option<usize> {
    quality
        .iter()
        .fold(None::<&ClusterQuality>, |best, candidate| match best {
            Some(current) if current.silhouette >= candidate.silhouette => Some(current),
            _ => Some(candidate),
        })
        .map(|best| best.k)
}
