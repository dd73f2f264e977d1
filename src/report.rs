//! CSV export of the segmentation tables and the console narrative

use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::data::customer_id_schema;
use crate::pipeline::SegmentationResult;
use crate::segment::{ClusterSummary, CustomerSegment, SegmentLabel};
use crate::selection::ClusterQuality;

pub const CUSTOMER_SEGMENTS_FILE: &str = "rfm_customer_segments.csv";
pub const CLUSTER_SUMMARY_FILE: &str = "rfm_cluster_summary.csv";

/// Per-customer table: customer_id, recency, frequency, monetary, cluster, segment
pub fn customer_segments_frame(customers: &[CustomerSegment]) -> crate::Result<DataFrame> {
    let df = df!(
        "customer_id" => customers.iter().map(|c| c.customer_id.as_str()).collect::<Vec<_>>(),
        "recency" => customers.iter().map(|c| c.recency).collect::<Vec<i64>>(),
        "frequency" => customers.iter().map(|c| c.frequency).collect::<Vec<u32>>(),
        "monetary" => customers.iter().map(|c| c.monetary).collect::<Vec<f64>>(),
        "cluster" => customers.iter().map(|c| c.cluster as u32).collect::<Vec<u32>>(),
        "segment" => customers.iter().map(|c| c.segment.as_str()).collect::<Vec<_>>()
    )?;
    Ok(df)
}

/// Per-cluster table in the column order of the summary artifact
pub fn cluster_summary_frame(summaries: &[ClusterSummary]) -> crate::Result<DataFrame> {
    let df = df!(
        "cluster_id" => summaries.iter().map(|s| s.cluster_id as u32).collect::<Vec<u32>>(),
        "recency_mean" => summaries.iter().map(|s| s.recency_mean).collect::<Vec<f64>>(),
        "recency_median" => summaries.iter().map(|s| s.recency_median).collect::<Vec<f64>>(),
        "frequency_mean" => summaries.iter().map(|s| s.frequency_mean).collect::<Vec<f64>>(),
        "frequency_median" => summaries.iter().map(|s| s.frequency_median).collect::<Vec<f64>>(),
        "monetary_mean" => summaries.iter().map(|s| s.monetary_mean).collect::<Vec<f64>>(),
        "monetary_median" => summaries.iter().map(|s| s.monetary_median).collect::<Vec<f64>>(),
        "customer_count" => summaries.iter().map(|s| s.customer_count as u32).collect::<Vec<u32>>(),
        "segment_label" => summaries.iter().map(|s| s.segment_label.as_str()).collect::<Vec<_>>()
    )?;
    Ok(df)
}

pub fn write_customer_segments(
    path: impl AsRef<Path>,
    customers: &[CustomerSegment],
) -> crate::Result<()> {
    let mut df = customer_segments_frame(customers)?;
    write_csv(path.as_ref(), &mut df)
}

pub fn write_cluster_summary(
    path: impl AsRef<Path>,
    summaries: &[ClusterSummary],
) -> crate::Result<()> {
    let mut df = cluster_summary_frame(summaries)?;
    write_csv(path.as_ref(), &mut df)
}

/// Re-import an exported table; `customer_id` is always read as a string
pub fn read_csv_table(path: impl AsRef<Path>) -> crate::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(customer_id_schema()))
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn write_csv(path: &Path, df: &mut DataFrame) -> crate::Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    info!(path = %path.display(), rows = df.height(), "wrote table");
    Ok(())
}

/// Print the per-k sweep as a table
pub fn print_quality_table(quality: &[ClusterQuality]) {
    if quality.is_empty() {
        return;
    }
    println!("\n=== Cluster Count Sweep ===");
    println!("  k  |     WCSS     | Silhouette");
    println!("-----|--------------|-----------");
    for q in quality {
        println!("{:4} | {:12.2} | {:9.3}", q.k, q.inertia, q.silhouette);
    }
}

/// Print segment sizes, averages and suggested actions
pub fn print_segment_report(result: &SegmentationResult) {
    let total = result.rfm.len();

    println!("\n=== Customer Segment Analysis ===");
    println!("Analysis date: {}", result.rfm.analysis_date);
    println!("Customers analyzed: {}", total);
    println!("Clusters: {}", result.n_clusters());
    println!("Within-cluster sum of squares: {:.2}", result.model.inertia);
    match result.silhouette {
        Some(score) => println!("Silhouette score: {:.3}", score),
        None => println!("Silhouette score: n/a"),
    }

    for summary in &result.summaries {
        println!("\n{}", segment_block(summary, total));
    }

    println!("\n=== Segment Totals ===");
    for label in SegmentLabel::ALL {
        let count: usize = result
            .summaries
            .iter()
            .filter(|s| s.segment_label == label)
            .map(|s| s.customer_count)
            .sum();
        if count > 0 {
            println!("  {:<20} {:>6} customers", label.as_str(), count);
        }
    }
}

fn segment_block(summary: &ClusterSummary, total: usize) -> String {
    let percentage = summary.customer_count as f64 / total as f64 * 100.0;
    format!(
        "{} (Cluster {})\n   Customers: {} ({:.1}%)\n   Avg Recency: {:.1} days\n   Avg Frequency: {:.1} purchases\n   Avg Monetary: ${:.2}\n   Strategy: {}",
        summary.segment_label.as_str().to_uppercase(),
        summary.cluster_id,
        summary.customer_count,
        percentage,
        summary.recency_mean,
        summary.frequency_mean,
        summary.monetary_mean,
        summary.segment_label.strategy()
    )
}
