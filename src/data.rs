//! Transaction loading and RFM aggregation using Polars

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::RfmError;

pub const CUSTOMER_ID: &str = "customer_id";
pub const PURCHASE_DATE: &str = "purchase_date";
pub const AMOUNT: &str = "amount";

const REQUIRED_COLUMNS: [&str; 3] = [CUSTOMER_ID, PURCHASE_DATE, AMOUNT];
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PURCHASE_DAY: &str = "purchase_day";

/// Days from 0001-01-01 to 1970-01-01; Polars stores dates as days since the epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Recency, frequency and monetary value of a single customer
#[derive(Debug, Clone, PartialEq)]
pub struct RfmRecord {
    pub customer_id: String,
    /// Days between the customer's latest purchase and the analysis date
    pub recency: i64,
    /// Number of transaction rows
    pub frequency: u32,
    /// Sum of transaction amounts
    pub monetary: f64,
}

/// One RFM record per distinct customer, in order of first appearance in the input
#[derive(Debug, Clone)]
pub struct RfmTable {
    /// Latest purchase date in the dataset plus one day
    pub analysis_date: NaiveDate,
    pub records: Vec<RfmRecord>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw RFM values as an (n_customers, 3) matrix, row-aligned with `records`
    pub fn raw_features(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.records.len(), 3), |(i, j)| {
            let record = &self.records[i];
            match j {
                0 => record.recency as f64,
                1 => f64::from(record.frequency),
                _ => record.monetary,
            }
        })
    }

    pub fn recency_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.recency as f64).collect()
    }

    pub fn frequency_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| f64::from(r.frequency)).collect()
    }

    pub fn monetary_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.monetary).collect()
    }
}

/// Read a transactions CSV and validate it
///
/// # Arguments
/// * `file_path` - CSV with at least `customer_id`, `purchase_date` and `amount` columns
///
/// # Returns
/// * A frame with exactly those three columns typed as String, Date and Float64
pub fn load_transactions(file_path: impl AsRef<Path>) -> crate::Result<DataFrame> {
    let file_path = file_path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(customer_id_schema()))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()?;

    info!(path = %file_path.display(), rows = df.height(), "loaded transactions");
    prepare_transactions(df)
}

/// Customer ids are opaque strings; "007" and "7" are different customers
pub(crate) fn customer_id_schema() -> SchemaRef {
    Arc::new(Schema::from_iter([Field::new(CUSTOMER_ID, DataType::String)]))
}

/// Check required columns and coerce them to their canonical types
///
/// Dates may be strings in `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` form (the
/// time of day is dropped), Polars dates, or datetimes. Amounts must be numeric and
/// non-negative. Any violation aborts before aggregation.
pub fn prepare_transactions(df: DataFrame) -> crate::Result<DataFrame> {
    for name in REQUIRED_COLUMNS {
        if df.column(name).is_err() {
            return Err(RfmError::MissingColumn(name.to_string()));
        }
    }

    if df.height() == 0 {
        return Err(RfmError::EmptyDataset);
    }

    let date_expr = match df.column(PURCHASE_DATE)?.dtype() {
        DataType::Date => col(PURCHASE_DATE),
        DataType::Datetime(_, _) => col(PURCHASE_DATE).cast(DataType::Date),
        DataType::String => parse_purchase_dates(),
        other => {
            return Err(RfmError::MalformedInput(format!(
                "column `{PURCHASE_DATE}` has type {other}, expected calendar dates"
            )))
        }
    };

    let typed = df
        .lazy()
        .select([
            col(CUSTOMER_ID).cast(DataType::String),
            date_expr.alias(PURCHASE_DATE),
            col(AMOUNT).strict_cast(DataType::Float64),
        ])
        .collect()
        .map_err(|err| RfmError::MalformedInput(err.to_string()))?;

    for name in REQUIRED_COLUMNS {
        let nulls = typed.column(name)?.null_count();
        if nulls > 0 {
            return Err(RfmError::MalformedInput(format!(
                "column `{name}` has {nulls} missing or unparseable values"
            )));
        }
    }

    let invalid_amounts = typed
        .column(AMOUNT)?
        .f64()?
        .into_no_null_iter()
        .filter(|amount| amount.is_nan() || *amount < 0.0)
        .count();
    if invalid_amounts > 0 {
        return Err(RfmError::MalformedInput(format!(
            "column `{AMOUNT}` has {invalid_amounts} negative or NaN values"
        )));
    }

    Ok(typed)
}

/// Exact parse against the date format, falling back to a full timestamp.
/// Anything else becomes null and is reported by the null check.
fn parse_purchase_dates() -> Expr {
    let options = |format: &str| StrptimeOptions {
        format: Some(format.into()),
        strict: false,
        exact: true,
        cache: true,
    };
    let dates = col(PURCHASE_DATE).str().to_date(options(DATE_FORMAT));
    let timestamps = col(PURCHASE_DATE)
        .str()
        .to_datetime(None, None, options(DATETIME_FORMAT), lit("raise"))
        .cast(DataType::Date);
    coalesce(&[dates, timestamps])
}

/// Compute RFM features from prepared transaction data
///
/// The analysis date is the latest purchase date plus one day, so every
/// recency is at least 1.
pub fn compute_rfm(transactions: &DataFrame) -> crate::Result<RfmTable> {
    if transactions.height() == 0 {
        return Err(RfmError::EmptyDataset);
    }

    let days = transactions.clone().lazy().select([
        col(CUSTOMER_ID),
        col(PURCHASE_DATE).cast(DataType::Int32).alias(PURCHASE_DAY),
        col(AMOUNT),
    ]);

    let latest = days
        .clone()
        .select([col(PURCHASE_DAY).max()])
        .collect()?;
    let latest_day = latest
        .column(PURCHASE_DAY)?
        .i32()?
        .get(0)
        .ok_or(RfmError::EmptyDataset)?;
    let analysis_day = latest_day + 1;
    let analysis_date = NaiveDate::from_num_days_from_ce_opt(analysis_day + EPOCH_DAYS_FROM_CE)
        .ok_or_else(|| {
            RfmError::MalformedInput(format!("purchase dates out of range ({latest_day})"))
        })?;

    // Stable grouping keeps customers in order of first appearance
    let rfm_df = days
        .group_by_stable([col(CUSTOMER_ID)])
        .agg([
            (lit(analysis_day) - col(PURCHASE_DAY).max()).alias("recency"),
            col(PURCHASE_DAY).len().alias("frequency"),
            col(AMOUNT).sum().alias("monetary"),
        ])
        .collect()?;

    let records = extract_records(&rfm_df)?;
    if records.is_empty() {
        return Err(RfmError::EmptyDataset);
    }

    info!(
        customers = records.len(),
        analysis_date = %analysis_date,
        "computed RFM table"
    );

    Ok(RfmTable {
        analysis_date,
        records,
    })
}

fn extract_records(rfm_df: &DataFrame) -> crate::Result<Vec<RfmRecord>> {
    let customer_ids = rfm_df.column(CUSTOMER_ID)?.str()?;
    let recency = rfm_df.column("recency")?.cast(&DataType::Int64)?;
    let frequency = rfm_df.column("frequency")?.cast(&DataType::UInt32)?;
    let monetary = rfm_df.column("monetary")?.cast(&DataType::Float64)?;

    let records: Vec<RfmRecord> = customer_ids
        .into_no_null_iter()
        .zip(recency.i64()?.into_no_null_iter())
        .zip(frequency.u32()?.into_no_null_iter())
        .zip(monetary.f64()?.into_no_null_iter())
        .map(|(((customer_id, recency), frequency), monetary)| RfmRecord {
            customer_id: customer_id.to_string(),
            recency,
            frequency,
            monetary,
        })
        .collect();

    debug!(rows = records.len(), "extracted RFM records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,purchase_date,amount,channel").unwrap();
        writeln!(file, "C17850,2011-11-01,15.30,web").unwrap();
        writeln!(file, "C17850,2011-12-01,20.34,store").unwrap();
        writeln!(file, "C13047,2011-06-15,22.00,web").unwrap();
        writeln!(file, "C17850,2011-12-05,11.10,web").unwrap();
        writeln!(file, "C12345,2011-12-08,99.50,store").unwrap();
        file
    }

    fn frame(ids: &[&str], dates: &[&str], amounts: &[f64]) -> DataFrame {
        df!(
            CUSTOMER_ID => ids,
            PURCHASE_DATE => dates,
            AMOUNT => amounts
        )
        .unwrap()
    }

    #[test]
    fn test_load_and_compute_rfm() {
        let test_file = create_test_csv();
        let transactions = load_transactions(test_file.path()).unwrap();
        assert_eq!(transactions.width(), 3);
        assert_eq!(transactions.height(), 5);

        let rfm = compute_rfm(&transactions).unwrap();
        assert_eq!(rfm.analysis_date, NaiveDate::from_ymd_opt(2011, 12, 9).unwrap());

        let ids: Vec<&str> = rfm.records.iter().map(|r| r.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["C17850", "C13047", "C12345"]);

        let first = &rfm.records[0];
        assert_eq!(first.recency, 4);
        assert_eq!(first.frequency, 3);
        assert!((first.monetary - 46.74).abs() < 1e-9);

        let single = &rfm.records[1];
        assert_eq!(single.frequency, 1);
        assert_eq!(single.recency, 177);

        assert_eq!(rfm.records[2].recency, 1);
    }

    #[test]
    fn test_numeric_customer_ids_become_strings() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,purchase_date,amount").unwrap();
        writeln!(file, "17850,2011-12-01,2").unwrap();
        writeln!(file, "13047,2011-12-02,3").unwrap();

        let transactions = load_transactions(file.path()).unwrap();
        let rfm = compute_rfm(&transactions).unwrap();
        assert_eq!(rfm.records[0].customer_id, "17850");
        assert_eq!(rfm.records[0].monetary, 2.0);
    }

    #[test]
    fn test_time_of_day_is_ignored() {
        let df = frame(
            &["a", "a"],
            &["2024-03-01 23:59:00", "2024-03-02 00:01:00"],
            &[1.0, 2.0],
        );
        let rfm = compute_rfm(&prepare_transactions(df).unwrap()).unwrap();
        assert_eq!(rfm.analysis_date, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
        assert_eq!(rfm.records[0].recency, 1);
    }

    #[test]
    fn test_trailing_garbage_after_date_is_rejected() {
        let df = frame(&["a", "b"], &["2024-01-01", "2024-01-02 garbage!!"], &[1.0, 2.0]);
        assert!(matches!(
            prepare_transactions(df),
            Err(RfmError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_leading_zero_ids_stay_distinct() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,purchase_date,amount").unwrap();
        writeln!(file, "007,2024-02-01,10.0").unwrap();
        writeln!(file, "7,2024-02-02,20.0").unwrap();
        writeln!(file, "0042,2024-02-03,30.0").unwrap();

        let transactions = load_transactions(file.path()).unwrap();
        assert_eq!(transactions.column(CUSTOMER_ID).unwrap().dtype(), &DataType::String);

        let rfm = compute_rfm(&transactions).unwrap();
        let ids: Vec<(&str, u32)> = rfm
            .records
            .iter()
            .map(|r| (r.customer_id.as_str(), r.frequency))
            .collect();
        assert_eq!(ids, vec![("007", 1), ("7", 1), ("0042", 1)]);
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let df = df!(CUSTOMER_ID => &["a"], AMOUNT => &[1.0]).unwrap();
        let err = prepare_transactions(df).unwrap_err();
        assert!(matches!(err, RfmError::MissingColumn(ref name) if name == PURCHASE_DATE));
    }

    #[test]
    fn test_unparseable_date_is_rejected() {
        let df = frame(&["a", "b"], &["2024-01-01", "yesterday"], &[1.0, 2.0]);
        assert!(matches!(
            prepare_transactions(df),
            Err(RfmError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_non_numeric_amount_is_rejected() {
        let df = df!(
            CUSTOMER_ID => &["a", "b"],
            PURCHASE_DATE => &["2024-01-01", "2024-01-02"],
            AMOUNT => &["10.5", "ten"]
        )
        .unwrap();
        assert!(matches!(
            prepare_transactions(df),
            Err(RfmError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let df = frame(&["a"], &["2024-01-01"], &[-3.0]);
        assert!(matches!(
            prepare_transactions(df),
            Err(RfmError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,purchase_date,amount").unwrap();
        assert!(matches!(
            load_transactions(file.path()),
            Err(RfmError::EmptyDataset)
        ));
    }

    #[test]
    fn test_raw_features_alignment() {
        let df = frame(
            &["x", "y", "x"],
            &["2024-01-01", "2024-01-05", "2024-01-03"],
            &[5.0, 7.0, 1.0],
        );
        let rfm = compute_rfm(&prepare_transactions(df).unwrap()).unwrap();
        let raw = rfm.raw_features();
        assert_eq!(raw.shape(), &[2, 3]);
        assert_eq!(raw.row(0).to_vec(), vec![3.0, 2.0, 6.0]);
        assert_eq!(raw.row(1).to_vec(), vec![1.0, 1.0, 7.0]);
    }
}
