//! End-to-end segmentation: transactions in, labeled tables out
//!
//! Every stage is a pure function of the previous stage's output. Nothing
//! here touches the filesystem or the console; reporting consumes the
//! returned [`SegmentationResult`] afterwards.

use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::data::{compute_rfm, RfmTable};
use crate::features::{normalize_rfm, NormalizedFeatures};
use crate::model::{fit_kmeans, KMeansConfig, KMeansModel};
use crate::segment::{
    assign_segments, summarize_clusters, ClusterSummary, CustomerSegment, PopulationMedians,
};
use crate::selection::{evaluate_k_range, ClusterQuality, KChoice, KRange};

/// Everything that determines the outcome of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub k_choice: KChoice,
    pub k_range: KRange,
    /// Run the cluster count sweep even when k is fixed
    pub sweep: bool,
    pub kmeans: KMeansConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            k_choice: KChoice::default(),
            k_range: KRange::default(),
            sweep: true,
            kmeans: KMeansConfig::default(),
        }
    }
}

/// Read-only output of every pipeline stage
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub rfm: RfmTable,
    pub features: NormalizedFeatures,
    /// Per-k metrics from the sweep; empty when the sweep was skipped
    pub quality: Vec<ClusterQuality>,
    pub model: KMeansModel,
    /// `None` when k equals the number of customers
    pub silhouette: Option<f64>,
    pub medians: PopulationMedians,
    pub summaries: Vec<ClusterSummary>,
    pub customers: Vec<CustomerSegment>,
}

impl SegmentationResult {
    pub fn n_clusters(&self) -> usize {
        self.model.n_clusters
    }
}

/// Run aggregation, normalization, selection, clustering and labeling
///
/// `transactions` must already be validated by
/// [`prepare_transactions`](crate::data::prepare_transactions).
pub fn run_pipeline(
    transactions: &DataFrame,
    config: &PipelineConfig,
) -> crate::Result<SegmentationResult> {
    let rfm = compute_rfm(transactions)?;
    let features = normalize_rfm(&rfm)?;

    let needs_sweep = config.sweep || config.k_choice == KChoice::BestSilhouette;
    let quality = if needs_sweep {
        evaluate_k_range(&features.matrix, config.k_range, &config.kmeans)?
    } else {
        Vec::new()
    };

    let n_clusters = config.k_choice.resolve(&quality)?;
    info!(k = n_clusters, "clustering customers");

    let model = fit_kmeans(&features.matrix, n_clusters, &config.kmeans)?;
    let silhouette = match model.silhouette(&features.matrix) {
        Ok(score) => Some(score),
        Err(err) => {
            warn!(error = %err, "silhouette not available for the final clustering");
            None
        }
    };

    let medians = PopulationMedians::from_rfm(&rfm)?;
    let summaries = summarize_clusters(&rfm, &model.labels, &medians)?;
    let customers = assign_segments(&rfm, &model.labels, &summaries)?;

    info!(
        customers = customers.len(),
        clusters = summaries.len(),
        inertia = model.inertia,
        silhouette = ?silhouette,
        "segmentation complete"
    );

    Ok(SegmentationResult {
        rfm,
        features,
        quality,
        model,
        silhouette,
        medians,
        summaries,
        customers,
    })
}
