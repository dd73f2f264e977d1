//! Visualization functions using Plotters for cluster analysis

use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::pipeline::SegmentationResult;
use crate::selection::ClusterQuality;

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 8] = [
    RGBColor(228, 26, 28),
    RGBColor(55, 126, 184),
    RGBColor(77, 175, 74),
    RGBColor(255, 127, 0),
    RGBColor(152, 78, 163),
    RGBColor(166, 86, 40),
    RGBColor(247, 129, 191),
    RGBColor(102, 102, 102),
];

const HISTOGRAM_BINS: usize = 30;

fn cluster_color(cluster: usize) -> RGBColor {
    CLUSTER_COLORS[cluster % CLUSTER_COLORS.len()]
}

/// One histogram bar: [lower, upper) and the number of values in it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins over the value range; the maximum falls in the last bin
pub fn histogram_bins(values: &[f64], n_bins: usize) -> Vec<Bin> {
    if values.is_empty() || n_bins == 0 {
        return Vec::new();
    }
    let range = padded_range(values, 0.0);
    let width = (range.end - range.start) / n_bins as f64;

    let mut bins: Vec<Bin> = (0..n_bins)
        .map(|i| Bin {
            lower: range.start + i as f64 * width,
            upper: range.start + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &value in values {
        let index = (((value - range.start) / width) as usize).min(n_bins - 1);
        bins[index].count += 1;
    }
    bins
}

/// Min..max of `values` widened by `padding`; a single value gets a unit span
pub fn padded_range(values: &[f64], padding: f64) -> Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if max - min < f64::EPSILON {
        return (min - 0.5 - padding)..(max + 0.5 + padding);
    }
    (min - padding)..(max + padding)
}

fn draw_histogram(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    values: &[f64],
    title: &str,
    x_desc: &str,
    color: RGBColor,
) -> anyhow::Result<()> {
    let bins = histogram_bins(values, HISTOGRAM_BINS);
    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(1) as f64;
    let x_range = padded_range(values, 0.0);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, 0f64..(max_count * 1.1))?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Customers")
        .draw()?;

    chart.draw_series(bins.iter().map(|bin| {
        Rectangle::new(
            [(bin.lower, 0.0), (bin.upper, bin.count as f64)],
            color.mix(0.7).filled(),
        )
    }))?;

    Ok(())
}

/// Histograms of raw recency, frequency and monetary values side by side
pub fn create_rfm_distributions(
    result: &SegmentationResult,
    output_path: &Path,
) -> anyhow::Result<()> {
    let root = BitMapBackend::new(output_path, (1500, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled("RFM Distributions", ("sans-serif", 30))?;
    let panels = root.split_evenly((1, 3));

    draw_histogram(
        &panels[0],
        &result.rfm.recency_values(),
        "Recency (Days since last purchase)",
        "Days",
        RGBColor(135, 206, 235),
    )?;
    draw_histogram(
        &panels[1],
        &result.rfm.frequency_values(),
        "Frequency (Number of purchases)",
        "Purchases",
        RGBColor(144, 238, 144),
    )?;
    draw_histogram(
        &panels[2],
        &result.rfm.monetary_values(),
        "Monetary (Total spent)",
        "Amount",
        RGBColor(250, 128, 114),
    )?;

    root.present()?;
    info!(path = %output_path.display(), "saved RFM distributions");
    Ok(())
}

/// Elbow (WCSS) and silhouette curves over the swept cluster counts
pub fn create_k_selection_chart(
    quality: &[ClusterQuality],
    output_path: &Path,
) -> anyhow::Result<()> {
    if quality.is_empty() {
        anyhow::bail!("no cluster count sweep to plot");
    }

    let ks: Vec<f64> = quality.iter().map(|q| q.k as f64).collect();
    let k_range = padded_range(&ks, 0.5);

    let root = BitMapBackend::new(output_path, (1200, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let series = [
        (
            "Elbow Method - WCSS",
            "WCSS",
            quality.iter().map(|q| (q.k as f64, q.inertia)).collect::<Vec<_>>(),
            BLUE,
        ),
        (
            "Silhouette Score",
            "Silhouette Score",
            quality.iter().map(|q| (q.k as f64, q.silhouette)).collect::<Vec<_>>(),
            RED,
        ),
    ];

    for (panel, (title, y_desc, points, color)) in panels.iter().zip(series) {
        let ys: Vec<f64> = points.iter().map(|&(_, y)| y).collect();
        let unpadded = padded_range(&ys, 0.0);
        let y_range = padded_range(&ys, 0.05 * (unpadded.end - unpadded.start));

        let mut chart = ChartBuilder::on(panel)
            .caption(title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(k_range.clone(), y_range)?;

        chart
            .configure_mesh()
            .x_desc("Number of Clusters (k)")
            .y_desc(y_desc)
            .draw()?;

        chart.draw_series(LineSeries::new(points.iter().copied(), &color))?;
        chart.draw_series(points.iter().map(|&point| Circle::new(point, 4, color.filled())))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "saved cluster count chart");
    Ok(())
}

/// Raw RFM scatter plots colored by cluster: R vs F, F vs M, R vs M
pub fn create_cluster_visualization(
    result: &SegmentationResult,
    output_path: &Path,
) -> anyhow::Result<()> {
    let recency = result.rfm.recency_values();
    let frequency = result.rfm.frequency_values();
    let monetary = result.rfm.monetary_values();
    let labels = &result.model.labels;

    let root = BitMapBackend::new(output_path, (1800, 550)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 3));

    let pairs = [
        (
            "Recency vs Frequency",
            "Recency (Days)",
            "Frequency (Purchases)",
            &recency,
            &frequency,
        ),
        (
            "Frequency vs Monetary",
            "Frequency (Purchases)",
            "Monetary (Amount)",
            &frequency,
            &monetary,
        ),
        (
            "Recency vs Monetary",
            "Recency (Days)",
            "Monetary (Amount)",
            &recency,
            &monetary,
        ),
    ];

    for (panel, (title, x_desc, y_desc, xs, ys)) in panels.iter().zip(pairs) {
        let mut chart = ChartBuilder::on(panel)
            .caption(title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(padded_range(xs, 1.0), padded_range(ys, 1.0))?;

        chart
            .configure_mesh()
            .x_desc(x_desc)
            .y_desc(y_desc)
            .draw()?;

        for summary in &result.summaries {
            let cluster = summary.cluster_id;
            let color = cluster_color(cluster);
            let points: Vec<(f64, f64)> = labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == cluster)
                .map(|(i, _)| (xs[i], ys[i]))
                .collect();

            chart
                .draw_series(
                    points
                        .into_iter()
                        .map(|point| Circle::new(point, 3, color.mix(0.6).filled())),
                )?
                .label(format!("Cluster {}: {}", cluster, summary.segment_label))
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    info!(path = %output_path.display(), "saved cluster scatter plots");
    Ok(())
}

/// Recency, frequency and monetary on three axes, one colour per cluster
pub fn create_cluster_3d_visualization(
    result: &SegmentationResult,
    output_path: &Path,
) -> anyhow::Result<()> {
    let recency = result.rfm.recency_values();
    let frequency = result.rfm.frequency_values();
    let monetary = result.rfm.monetary_values();
    let labels = &result.model.labels;

    let root = BitMapBackend::new(output_path, (1000, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("3D RFM Clusters", ("sans-serif", 24))
        .margin(20)
        .build_cartesian_3d(
            padded_range(&recency, 1.0),
            padded_range(&frequency, 1.0),
            padded_range(&monetary, 1.0),
        )?;

    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.3;
        pb.scale = 0.8;
        pb.into_matrix()
    });

    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.15))
        .max_light_lines(3)
        .draw()?;

    for summary in &result.summaries {
        let cluster = summary.cluster_id;
        let color = cluster_color(cluster);
        let points: Vec<(f64, f64, f64)> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == cluster)
            .map(|(i, _)| (recency[i], frequency[i], monetary[i]))
            .collect();

        chart
            .draw_series(
                points
                    .into_iter()
                    .map(|point| Circle::new(point, 3, color.mix(0.7).filled())),
            )?
            .label(format!("Cluster {}: {}", cluster, summary.segment_label))
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "saved 3D cluster plot");
    Ok(())
}

/// Generate all charts into `output_dir` and return their paths
pub fn generate_visualization_report(
    result: &SegmentationResult,
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let distributions = output_dir.join("rfm_distributions.png");
    create_rfm_distributions(result, &distributions)?;
    written.push(distributions);

    if !result.quality.is_empty() {
        let k_selection = output_dir.join("k_selection.png");
        create_k_selection_chart(&result.quality, &k_selection)?;
        written.push(k_selection);
    }

    let clusters = output_dir.join("rfm_clusters.png");
    create_cluster_visualization(result, &clusters)?;
    written.push(clusters);

    let clusters_3d = output_dir.join("rfm_clusters_3d.png");
    create_cluster_3d_visualization(result, &clusters_3d)?;
    written.push(clusters_3d);

    Ok(written)
}
