//! RFM customer segmentation
//!
//! Computes Recency, Frequency and Monetary scores from transaction records,
//! clusters customers with K-Means on log-scaled, standardized features and
//! names each cluster with a fixed business taxonomy.

pub mod cli;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod segment;
pub mod selection;
pub mod viz;

pub use cli::Args;
pub use data::{compute_rfm, load_transactions, prepare_transactions, RfmRecord, RfmTable};
pub use error::RfmError;
pub use features::{normalize_rfm, NormalizedFeatures, StandardScaler};
pub use model::{fit_kmeans, silhouette_score, KMeansConfig, KMeansModel};
pub use pipeline::{run_pipeline, PipelineConfig, SegmentationResult};
pub use segment::{
    label_cluster, ClusterMeans, ClusterSummary, CustomerSegment, PopulationMedians,
    SegmentLabel,
};
pub use selection::{evaluate_k_range, ClusterQuality, KChoice, KRange};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, RfmError>;
