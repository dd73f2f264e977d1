//! K-Means clustering model implementation

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::RfmError;

/// Parameters that make a clustering run reproducible
///
/// The same seed, restart count and input always yield the same labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansConfig {
    /// Seed for centroid initialization
    pub seed: u64,
    /// Independent restarts; the lowest-inertia run is kept
    pub n_runs: usize,
    /// Maximum Lloyd iterations per run
    pub max_iters: u64,
    /// Convergence tolerance on centroid movement
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted clustering with per-customer assignments
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment per row of the feature matrix
    pub labels: Array1<usize>,
    /// Cluster centroids in normalized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Silhouette score of this clustering, if defined for its shape
    pub fn silhouette(&self, features: &Array2<f64>) -> crate::Result<f64> {
        silhouette_score(features, &self.labels, self.n_clusters)
    }
}

/// Fit K-Means on a normalized feature matrix
///
/// # Arguments
/// * `features` - (n_customers, n_features) matrix
/// * `n_clusters` - Number of clusters, at least 2 and at most the number of rows
/// * `config` - Seed, restarts and convergence settings
///
/// # Returns
/// * Fitted `KMeansModel` with labels and inertia
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    config: &KMeansConfig,
) -> crate::Result<KMeansModel> {
    let n_samples = features.nrows();
    if n_clusters < 2 {
        return Err(RfmError::InvalidClusterCount {
            k: n_clusters,
            customers: n_samples,
            reason: "at least 2 clusters are required",
        });
    }
    if n_samples < n_clusters {
        return Err(RfmError::InvalidClusterCount {
            k: n_clusters,
            customers: n_samples,
            reason: "more clusters than customers",
        });
    }

    // Targets are unused by K-Means
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);
    let rng = StdRng::seed_from_u64(config.seed);

    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iters)
        .tolerance(config.tolerance)
        .fit(&dataset)
        .map_err(|err| RfmError::Clustering(err.to_string()))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    if !inertia.is_finite() {
        return Err(RfmError::Clustering(format!(
            "non-finite inertia for k = {n_clusters}"
        )));
    }

    debug!(k = n_clusters, inertia, "fitted k-means");

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Mean silhouette coefficient over all points
///
/// For each point, `a` is the mean distance to the rest of its cluster and
/// `b` the smallest mean distance to another populated cluster; the point
/// scores `(b - a) / max(a, b)`, or 0 when it is alone in its cluster.
/// Only defined for `2 <= n_clusters < n_samples` with at least two
/// populated clusters.
pub fn silhouette_score(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
) -> crate::Result<f64> {
    let n_samples = features.nrows();
    if labels.len() != n_samples {
        return Err(RfmError::Misaligned {
            rows: n_samples,
            labels: labels.len(),
        });
    }
    if n_clusters < 2 || n_clusters >= n_samples {
        return Err(RfmError::InvalidClusterCount {
            k: n_clusters,
            customers: n_samples,
            reason: "silhouette needs 2 <= k < number of customers",
        });
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= n_clusters) {
        return Err(RfmError::Clustering(format!(
            "label {label} out of range for {n_clusters} clusters"
        )));
    }

    let mut populated = vec![false; n_clusters];
    for &label in labels.iter() {
        populated[label] = true;
    }
    if populated.iter().filter(|&&p| p).count() < 2 {
        return Err(RfmError::Clustering(
            "silhouette needs at least two populated clusters".to_string(),
        ));
    }

    let mut silhouette_sum = 0.0;
    let mut sums = vec![0.0; n_clusters];
    let mut counts = vec![0usize; n_clusters];

    for i in 0..n_samples {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        let point = features.row(i);
        for j in 0..n_samples {
            if i == j {
                continue;
            }
            let label = labels[j];
            sums[label] += euclidean_distance(&point, &features.row(j));
            counts[label] += 1;
        }

        let own = labels[i];
        if counts[own] == 0 {
            continue;
        }
        let a_i = sums[own] / counts[own] as f64;

        let b_i = (0..n_clusters)
            .filter(|&c| c != own && counts[c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denominator = a_i.max(b_i);
        if denominator > 0.0 {
            silhouette_sum += (b_i - a_i) / denominator;
        }
    }

    Ok(silhouette_sum / n_samples as f64)
}

/// Compute within-cluster sum of squares (inertia)
pub fn compute_inertia(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    centroids: &Array2<f64>,
) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Three tight groups of two points each
    fn blobs() -> Array2<f64> {
        array![
            [-2.0, -2.0, -2.0],
            [-2.1, -1.9, -2.0],
            [2.0, 2.0, 2.0],
            [2.1, 2.0, 1.9],
            [0.0, 3.0, -3.0],
            [0.1, 3.1, -2.9],
        ]
    }

    #[test]
    fn test_fit_kmeans() {
        let features = blobs();
        let model = fit_kmeans(&features, 3, &KMeansConfig::default()).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[3, 3]);
        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[2], model.labels[3]);
        assert_eq!(model.labels[4], model.labels[5]);
        assert_ne!(model.labels[0], model.labels[2]);
        assert_ne!(model.labels[0], model.labels[4]);
        assert!(model.inertia < 0.1);
    }

    #[test]
    fn test_cluster_sizes() {
        let model = fit_kmeans(&blobs(), 3, &KMeansConfig::default()).unwrap();
        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_same_seed_same_result() {
        let features = blobs();
        let config = KMeansConfig {
            seed: 7,
            ..KMeansConfig::default()
        };
        let first = fit_kmeans(&features, 2, &config).unwrap();
        let second = fit_kmeans(&features, 2, &config).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.inertia, second.inertia);
        assert_eq!(
            first.silhouette(&features).unwrap(),
            second.silhouette(&features).unwrap()
        );
    }

    #[test]
    fn test_invalid_cluster_count() {
        let features = blobs();
        let config = KMeansConfig::default();

        assert!(matches!(
            fit_kmeans(&features, 1, &config),
            Err(RfmError::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            fit_kmeans(&features, 7, &config),
            Err(RfmError::InvalidClusterCount { .. })
        ));
    }

    #[test]
    fn test_silhouette_well_separated() {
        let features = blobs();
        let labels = array![0, 0, 1, 1, 2, 2];
        let score = silhouette_score(&features, &labels, 3).unwrap();
        assert!(score > 0.9, "score {score}");
        assert!(score <= 1.0);
    }

    #[test]
    fn test_silhouette_by_hand() {
        // 1-D points 0, 1 | 5: a(0)=1, b(0)=5; a(1)=1, b(1)=4; point 5 is alone
        let features = array![[0.0], [1.0], [5.0]];
        let labels = array![0, 0, 1];
        let score = silhouette_score(&features, &labels, 2).unwrap();
        let expected = ((5.0 - 1.0) / 5.0 + (4.0 - 1.0) / 4.0 + 0.0) / 3.0;
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_silhouette_undefined() {
        let features = blobs();
        let labels = array![0, 0, 1, 1, 2, 2];
        assert!(silhouette_score(&features, &labels, 1).is_err());
        assert!(silhouette_score(&features, &labels, 6).is_err());

        let one_cluster = array![0, 0, 0, 0, 0, 0];
        assert!(silhouette_score(&features, &one_cluster, 2).is_err());
    }

    #[test]
    fn test_compute_inertia() {
        let features = array![[0.0, 0.0], [2.0, 0.0], [10.0, 10.0]];
        let labels = array![0, 0, 1];
        let centroids = array![[1.0, 0.0], [10.0, 10.0]];
        assert_eq!(compute_inertia(&features, &labels, &centroids), 2.0);
    }
}
