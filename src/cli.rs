//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::model::KMeansConfig;
use crate::pipeline::PipelineConfig;
use crate::selection::{KChoice, KRange};

/// Customer segmentation CLI: RFM scores, K-Means clusters and segment labels
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transactions CSV (customer_id, purchase_date, amount)
    #[arg(short, long, default_value = "customer_segment_agg.csv")]
    pub input: PathBuf,

    /// Directory for the exported CSV tables and plots
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long, default_value = "4")]
    pub clusters: usize,

    /// Pick the cluster count with the best silhouette instead of --clusters
    #[arg(long)]
    pub auto_k: bool,

    /// Smallest cluster count evaluated in the sweep
    #[arg(long, default_value = "2")]
    pub k_min: usize,

    /// Largest cluster count evaluated in the sweep
    #[arg(long, default_value = "10")]
    pub k_max: usize,

    /// Skip the elbow/silhouette sweep (ignored with --auto-k)
    #[arg(long)]
    pub skip_sweep: bool,

    /// Random seed for centroid initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of K-Means restarts; the lowest-inertia run is kept
    #[arg(long, default_value = "10")]
    pub n_init: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Do not render PNG charts
    #[arg(long)]
    pub no_plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the pipeline configuration, validating the sweep range
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let k_choice = if self.auto_k {
            KChoice::BestSilhouette
        } else {
            KChoice::Fixed(self.clusters)
        };

        Ok(PipelineConfig {
            k_choice,
            k_range: KRange::new(self.k_min, self.k_max)?,
            sweep: !self.skip_sweep,
            kmeans: KMeansConfig {
                seed: self.seed,
                n_runs: self.n_init,
                max_iters: self.max_iters,
                tolerance: self.tolerance,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let args = Args::try_parse_from(["rfm-segmenter"]).unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(!args.no_plots);
    }

    #[test]
    fn test_auto_k_and_overrides() {
        let args = Args::try_parse_from([
            "rfm-segmenter",
            "--input",
            "tx.csv",
            "--auto-k",
            "--k-min",
            "3",
            "--k-max",
            "6",
            "--seed",
            "7",
            "--n-init",
            "4",
        ])
        .unwrap();
        let config = args.pipeline_config().unwrap();

        assert_eq!(args.input, PathBuf::from("tx.csv"));
        assert_eq!(config.k_choice, KChoice::BestSilhouette);
        assert_eq!(config.k_range, KRange::new(3, 6).unwrap());
        assert_eq!(config.kmeans.seed, 7);
        assert_eq!(config.kmeans.n_runs, 4);
    }

    #[test]
    fn test_fixed_k_without_sweep() {
        let args = Args::try_parse_from(["rfm-segmenter", "-k", "5", "--skip-sweep"]).unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.k_choice, KChoice::Fixed(5));
        assert!(!config.sweep);
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let args = Args::try_parse_from(["rfm-segmenter", "--k-min", "1"]).unwrap();
        assert!(args.pipeline_config().is_err());

        let args = Args::try_parse_from(["rfm-segmenter", "--k-min", "8", "--k-max", "4"]).unwrap();
        assert!(args.pipeline_config().is_err());
    }
}
