//! Cluster summaries and rule-based business segment labels

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use polars::prelude::*;
use tracing::info;

use crate::data::RfmTable;
use crate::error::RfmError;

const CLUSTER: &str = "cluster";
const RFM_COLUMNS: [&str; 3] = ["recency", "frequency", "monetary"];

/// Named business segment assigned to a whole cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentLabel {
    Champions,
    PotentialLoyalists,
    AtRisk,
    Lost,
}

impl SegmentLabel {
    pub const ALL: [SegmentLabel; 4] = [
        SegmentLabel::Champions,
        SegmentLabel::PotentialLoyalists,
        SegmentLabel::AtRisk,
        SegmentLabel::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::Champions => "Champions",
            SegmentLabel::PotentialLoyalists => "Potential Loyalists",
            SegmentLabel::AtRisk => "At Risk",
            SegmentLabel::Lost => "Lost",
        }
    }

    /// Suggested marketing action for the segment
    pub fn strategy(&self) -> &'static str {
        match self {
            SegmentLabel::Champions => "Reward loyalty, exclusive offers, referral programs",
            SegmentLabel::PotentialLoyalists => {
                "Nurture with personalized offers, encourage repeat purchases"
            }
            SegmentLabel::AtRisk => "Win-back campaigns, limited-time offers, feedback surveys",
            SegmentLabel::Lost => "Minimal investment, reactivation campaigns, exit surveys",
        }
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentLabel {
    type Err = RfmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SegmentLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| RfmError::MalformedInput(format!("unknown segment label `{s}`")))
    }
}

/// Medians over the whole customer population, the thresholds of the labeling rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationMedians {
    pub recency: f64,
    pub frequency: f64,
    pub monetary: f64,
}

impl PopulationMedians {
    /// Midpoint medians for even-sized populations
    pub fn from_rfm(rfm: &RfmTable) -> crate::Result<Self> {
        if rfm.is_empty() {
            return Err(RfmError::EmptyDataset);
        }

        let medians = rfm_frame(rfm)?
            .lazy()
            .select(RFM_COLUMNS.map(|name| col(name).median()))
            .collect()?;

        Ok(Self {
            recency: first_f64(&medians, "recency")?,
            frequency: first_f64(&medians, "frequency")?,
            monetary: first_f64(&medians, "monetary")?,
        })
    }
}

/// Per-cluster means fed into the labeling rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterMeans {
    pub recency: f64,
    pub frequency: f64,
    pub monetary: f64,
}

/// Label a cluster from its means; the first matching rule wins
///
/// Ties at the median count as the favourable side (`<=` for recency,
/// `>=` for frequency and monetary). Anything not caught by the first three
/// rules is `Lost`, including recent-looking spend from infrequent, lapsed
/// customers.
pub fn label_cluster(means: &ClusterMeans, medians: &PopulationMedians) -> SegmentLabel {
    let recent = means.recency <= medians.recency;
    let frequent = means.frequency >= medians.frequency;
    let valuable = means.monetary >= medians.monetary;

    if recent && frequent && valuable {
        SegmentLabel::Champions
    } else if recent && !frequent {
        SegmentLabel::PotentialLoyalists
    } else if !recent && frequent {
        SegmentLabel::AtRisk
    } else {
        SegmentLabel::Lost
    }
}

/// Aggregate statistics of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub recency_mean: f64,
    pub recency_median: f64,
    pub frequency_mean: f64,
    pub frequency_median: f64,
    pub monetary_mean: f64,
    pub monetary_median: f64,
    pub customer_count: usize,
    pub segment_label: SegmentLabel,
}

impl ClusterSummary {
    pub fn means(&self) -> ClusterMeans {
        ClusterMeans {
            recency: self.recency_mean,
            frequency: self.frequency_mean,
            monetary: self.monetary_mean,
        }
    }
}

/// One output row per customer: RFM values plus cluster and segment
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerSegment {
    pub customer_id: String,
    pub recency: i64,
    pub frequency: u32,
    pub monetary: f64,
    pub cluster: usize,
    pub segment: SegmentLabel,
}

/// Group customers by cluster, compute statistics and label each cluster
///
/// Statistics are rounded to two decimals before labeling. Clusters with no
/// members are omitted; summaries are ordered by cluster id.
pub fn summarize_clusters(
    rfm: &RfmTable,
    labels: &Array1<usize>,
    medians: &PopulationMedians,
) -> crate::Result<Vec<ClusterSummary>> {
    check_alignment(rfm, labels)?;

    let clusters: Vec<u32> = labels.iter().map(|&label| label as u32).collect();
    let mut frame = rfm_frame(rfm)?;
    frame.with_column(Series::new(CLUSTER, clusters))?;

    let mut aggregations = Vec::with_capacity(2 * RFM_COLUMNS.len() + 1);
    for name in RFM_COLUMNS {
        aggregations.push(col(name).mean().alias(&format!("{name}_mean")));
        aggregations.push(col(name).median().alias(&format!("{name}_median")));
    }
    aggregations.push(col(CLUSTER).len().alias("customer_count"));

    let stats = frame
        .lazy()
        .group_by([col(CLUSTER)])
        .agg(aggregations)
        .sort([CLUSTER], SortMultipleOptions::default())
        .collect()?;

    let cluster_ids = stats.column(CLUSTER)?.cast(&DataType::UInt32)?;
    let counts = stats.column("customer_count")?.cast(&DataType::UInt32)?;
    let stat = |name: &str| -> crate::Result<Vec<f64>> {
        let column = stats.column(name)?.cast(&DataType::Float64)?;
        Ok(column.f64()?.into_no_null_iter().map(round2).collect())
    };
    let (recency_mean, recency_median) = (stat("recency_mean")?, stat("recency_median")?);
    let (frequency_mean, frequency_median) = (stat("frequency_mean")?, stat("frequency_median")?);
    let (monetary_mean, monetary_median) = (stat("monetary_mean")?, stat("monetary_median")?);

    let summaries: Vec<ClusterSummary> = cluster_ids
        .u32()?
        .into_no_null_iter()
        .zip(counts.u32()?.into_no_null_iter())
        .enumerate()
        .map(|(row, (cluster_id, count))| {
            let means = ClusterMeans {
                recency: recency_mean[row],
                frequency: frequency_mean[row],
                monetary: monetary_mean[row],
            };
            ClusterSummary {
                cluster_id: cluster_id as usize,
                recency_mean: means.recency,
                recency_median: recency_median[row],
                frequency_mean: means.frequency,
                frequency_median: frequency_median[row],
                monetary_mean: means.monetary,
                monetary_median: monetary_median[row],
                customer_count: count as usize,
                segment_label: label_cluster(&means, medians),
            }
        })
        .collect();

    for summary in &summaries {
        info!(
            cluster = summary.cluster_id,
            customers = summary.customer_count,
            segment = %summary.segment_label,
            "labeled cluster"
        );
    }

    Ok(summaries)
}

/// Broadcast each cluster's label to its customers, row-aligned with `rfm`
pub fn assign_segments(
    rfm: &RfmTable,
    labels: &Array1<usize>,
    summaries: &[ClusterSummary],
) -> crate::Result<Vec<CustomerSegment>> {
    check_alignment(rfm, labels)?;

    let by_cluster: BTreeMap<usize, SegmentLabel> = summaries
        .iter()
        .map(|s| (s.cluster_id, s.segment_label))
        .collect();

    rfm.records
        .iter()
        .zip(labels.iter())
        .map(|(record, &cluster)| {
            let segment = by_cluster.get(&cluster).copied().ok_or_else(|| {
                RfmError::Clustering(format!("cluster {cluster} has no summary"))
            })?;
            Ok(CustomerSegment {
                customer_id: record.customer_id.clone(),
                recency: record.recency,
                frequency: record.frequency,
                monetary: record.monetary,
                cluster,
                segment,
            })
        })
        .collect()
}

fn check_alignment(rfm: &RfmTable, labels: &Array1<usize>) -> crate::Result<()> {
    if rfm.len() != labels.len() {
        return Err(RfmError::Misaligned {
            rows: rfm.len(),
            labels: labels.len(),
        });
    }
    Ok(())
}

/// Raw RFM values as a frame, row-aligned with `rfm.records`
fn rfm_frame(rfm: &RfmTable) -> PolarsResult<DataFrame> {
    df!(
        "recency" => rfm.recency_values(),
        "frequency" => rfm.frequency_values(),
        "monetary" => rfm.monetary_values()
    )
}

fn first_f64(frame: &DataFrame, name: &str) -> crate::Result<f64> {
    frame
        .column(name)?
        .cast(&DataType::Float64)?
        .f64()?
        .get(0)
        .ok_or(RfmError::EmptyDataset)
}

/// Round half to even at two decimals
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RfmRecord;
    use chrono::NaiveDate;
    use ndarray::array;

    const MEDIANS: PopulationMedians = PopulationMedians {
        recency: 30.0,
        frequency: 3.0,
        monetary: 200.0,
    };

    fn means(recency: f64, frequency: f64, monetary: f64) -> ClusterMeans {
        ClusterMeans {
            recency,
            frequency,
            monetary,
        }
    }

    fn table(rows: &[(&str, i64, u32, f64)]) -> RfmTable {
        RfmTable {
            analysis_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            records: rows
                .iter()
                .map(|&(id, recency, frequency, monetary)| RfmRecord {
                    customer_id: id.to_string(),
                    recency,
                    frequency,
                    monetary,
                })
                .collect(),
        }
    }

    #[test]
    fn test_label_rules_in_priority_order() {
        assert_eq!(label_cluster(&means(10.0, 5.0, 500.0), &MEDIANS), SegmentLabel::Champions);
        assert_eq!(
            label_cluster(&means(10.0, 1.0, 900.0), &MEDIANS),
            SegmentLabel::PotentialLoyalists
        );
        assert_eq!(label_cluster(&means(90.0, 4.0, 10.0), &MEDIANS), SegmentLabel::AtRisk);
        assert_eq!(label_cluster(&means(90.0, 1.0, 10.0), &MEDIANS), SegmentLabel::Lost);
    }

    #[test]
    fn test_ties_at_median_are_favourable() {
        assert_eq!(label_cluster(&means(30.0, 3.0, 200.0), &MEDIANS), SegmentLabel::Champions);
        assert_eq!(label_cluster(&means(30.1, 3.0, 0.0), &MEDIANS), SegmentLabel::AtRisk);
    }

    #[test]
    fn test_catch_all_branches_are_lost() {
        // Recent and frequent but low spend matches no named rule
        assert_eq!(label_cluster(&means(5.0, 8.0, 50.0), &MEDIANS), SegmentLabel::Lost);
        // Lapsed, infrequent, high spend is not distinguished from Lost
        assert_eq!(label_cluster(&means(90.0, 1.0, 5000.0), &MEDIANS), SegmentLabel::Lost);
    }

    #[test]
    fn test_label_names_round_trip() {
        for label in SegmentLabel::ALL {
            assert_eq!(label.as_str().parse::<SegmentLabel>().unwrap(), label);
        }
        assert!("Sleepers".parse::<SegmentLabel>().is_err());
        assert_eq!(SegmentLabel::PotentialLoyalists.to_string(), "Potential Loyalists");
    }

    #[test]
    fn test_population_medians_odd_count() {
        let rfm = table(&[("a", 3, 1, 9.0), ("b", 1, 4, 1.0), ("c", 2, 2, 5.0)]);
        let medians = PopulationMedians::from_rfm(&rfm).unwrap();
        assert_eq!(medians.recency, 2.0);
        assert_eq!(medians.frequency, 2.0);
        assert_eq!(medians.monetary, 5.0);
    }

    #[test]
    fn test_population_medians() {
        let rfm = table(&[("a", 1, 5, 100.0), ("b", 50, 1, 10.0), ("c", 10, 2, 40.0), ("d", 200, 1, 5.0)]);
        let medians = PopulationMedians::from_rfm(&rfm).unwrap();
        assert_eq!(medians.recency, 30.0);
        assert_eq!(medians.frequency, 1.5);
        assert_eq!(medians.monetary, 25.0);
    }

    #[test]
    fn test_summarize_and_assign() {
        let rfm = table(&[
            ("a", 2, 6, 600.0),
            ("b", 300, 1, 20.0),
            ("c", 4, 4, 400.0),
            ("d", 250, 1, 10.0),
            ("e", 280, 2, 15.0),
        ]);
        let labels = array![1, 0, 1, 0, 0];
        let medians = PopulationMedians::from_rfm(&rfm).unwrap();
        let summaries = summarize_clusters(&rfm, &labels, &medians).unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries.iter().map(|s| s.customer_count).sum::<usize>(), 5);

        let lapsed = &summaries[0];
        assert_eq!(lapsed.cluster_id, 0);
        assert_eq!(lapsed.recency_mean, 276.67);
        assert_eq!(lapsed.recency_median, 280.0);
        assert_eq!(lapsed.frequency_mean, 1.33);
        assert_eq!(lapsed.monetary_median, 15.0);
        assert_eq!(lapsed.segment_label, SegmentLabel::Lost);

        let best = &summaries[1];
        assert_eq!(best.customer_count, 2);
        assert_eq!(best.monetary_mean, 500.0);
        assert_eq!(best.segment_label, SegmentLabel::Champions);

        let customers = assign_segments(&rfm, &labels, &summaries).unwrap();
        let segments: Vec<SegmentLabel> = customers.iter().map(|c| c.segment).collect();
        assert_eq!(
            segments,
            vec![
                SegmentLabel::Champions,
                SegmentLabel::Lost,
                SegmentLabel::Champions,
                SegmentLabel::Lost,
                SegmentLabel::Lost,
            ]
        );
        assert_eq!(customers[1].customer_id, "b");
        assert_eq!(customers[1].cluster, 0);
    }

    #[test]
    fn test_labels_do_not_depend_on_cluster_ids() {
        let rfm = table(&[("a", 2, 6, 600.0), ("b", 300, 1, 20.0), ("c", 4, 4, 400.0)]);
        let medians = PopulationMedians::from_rfm(&rfm).unwrap();
        let first = summarize_clusters(&rfm, &array![0, 1, 0], &medians).unwrap();
        let swapped = summarize_clusters(&rfm, &array![1, 0, 1], &medians).unwrap();

        let label_of = |summaries: &[ClusterSummary], id| {
            summaries.iter().find(|s| s.cluster_id == id).map(|s| s.segment_label)
        };
        assert_eq!(label_of(&first, 0), label_of(&swapped, 1));
        assert_eq!(label_of(&first, 1), label_of(&swapped, 0));
    }

    #[test]
    fn test_misaligned_labels_are_rejected() {
        let rfm = table(&[("a", 1, 1, 1.0), ("b", 2, 2, 2.0)]);
        let medians = PopulationMedians::from_rfm(&rfm).unwrap();
        assert!(matches!(
            summarize_clusters(&rfm, &array![0], &medians),
            Err(RfmError::Misaligned { rows: 2, labels: 1 })
        ));
    }
}
