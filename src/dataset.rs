use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// A calendar date parsed from the `first_day_of_month` column.
///
/// Ordering is derived field-by-field (year, then month, then day), which is
/// all the pipeline needs to sort observations within a county.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservationDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl FromStr for ObservationDate {
    type Err = anyhow::Error;

    /// Parses an ISO `YYYY-MM-DD` date.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '-');
        let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
            anyhow::bail!("malformed date '{}': expected YYYY-MM-DD", s);
        };
        let year: i32 = y.parse().with_context(|| format!("malformed year in date '{}'", s))?;
        let month: u32 = m.parse().with_context(|| format!("malformed month in date '{}'", s))?;
        let day: u32 = d.parse().with_context(|| format!("malformed day in date '{}'", s))?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            anyhow::bail!("date '{}' out of range", s);
        }
        Ok(Self { year, month, day })
    }
}

impl std::fmt::Display for ObservationDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

// Raw CSV row as it appears in the source table.
#[derive(Debug, Deserialize)]
struct RawRecord {
    row_id: String,
    cfips: u32,
    first_day_of_month: String,
    microbusiness_density: Option<f64>,
}

/// One monthly observation for a county (`cfips` group key).
#[derive(Debug, Clone)]
pub struct DensityRecord {
    pub row_id: String,
    pub cfips: u32,
    pub date: ObservationDate,
    pub density: Option<f64>,
}

/// Reads density records from any CSV source with a header row.
pub fn read_records<R: std::io::Read>(reader: R) -> Result<Vec<DensityRecord>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for (line, raw) in csv_reader.deserialize::<RawRecord>().enumerate() {
        let raw = raw.with_context(|| format!("failed to parse CSV record {}", line + 1))?;
        let date = raw
            .first_day_of_month
            .parse::<ObservationDate>()
            .with_context(|| format!("row_id {}", raw.row_id))?;
        records.push(DensityRecord {
            row_id: raw.row_id,
            cfips: raw.cfips,
            date,
            density: raw.microbusiness_density,
        });
    }
    Ok(records)
}

/// Loads density records from a CSV file on disk.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Vec<DensityRecord>> {
    let path_ref = path.as_ref();
    let file = std::fs::File::open(path_ref)
        .map_err(|e| anyhow::anyhow!("Failed to open data file '{}': {}", path_ref.display(), e))?;
    let records = read_records(file)?;
    info!(
        "Loaded {} records from '{}'.",
        records.len(),
        path_ref.display()
    );
    Ok(records)
}

/// Cleans records in place: sort by (cfips, date), then forward-fill missing
/// density values over the sorted order, as the source pipeline does.
pub fn clean_records(records: &mut [DensityRecord]) {
    records.sort_by(|a, b| (a.cfips, a.date).cmp(&(b.cfips, b.date)));

    let mut last_seen: Option<f64> = None;
    for record in records.iter_mut() {
        match record.density {
            Some(v) => last_seen = Some(v),
            None => record.density = last_seen,
        }
    }
    info!("Data cleaning completed ({} records).", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
row_id,cfips,first_day_of_month,microbusiness_density
1001_2022-02-01,1001,2022-02-01,3.1
1001_2022-01-01,1001,2022-01-01,2.9
1003_2022-01-01,1003,2022-01-01,1.5
1001_2022-03-01,1001,2022-03-01,
1003_2022-02-01,1003,2022-02-01,1.7
";

    #[test]
    fn dates_parse_and_order_correctly() {
        let a: ObservationDate = "2022-01-01".parse().unwrap();
        let b: ObservationDate = "2022-02-01".parse().unwrap();
        let c: ObservationDate = "2023-01-01".parse().unwrap();
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "2022-01-01");
    }

    #[test]
    fn malformed_dates_are_rejected() {
        assert!("2022/01/01".parse::<ObservationDate>().is_err());
        assert!("2022-13-01".parse::<ObservationDate>().is_err());
        assert!("not-a-date".parse::<ObservationDate>().is_err());
    }

    #[test]
    fn records_sort_by_group_then_date() {
        let mut records = read_records(SAMPLE.as_bytes()).unwrap();
        clean_records(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "1001_2022-01-01",
                "1001_2022-02-01",
                "1001_2022-03-01",
                "1003_2022-01-01",
                "1003_2022-02-01",
            ]
        );
    }

    #[test]
    fn missing_density_is_forward_filled() {
        let mut records = read_records(SAMPLE.as_bytes()).unwrap();
        clean_records(&mut records);
        // The March 1001 row was empty and inherits the February value.
        assert_eq!(records[2].density, Some(3.1));
    }
}
