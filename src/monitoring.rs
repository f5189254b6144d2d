use anyhow::Result;
use std::fs::File;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Append-only CSV log of named metric values produced during a run.
pub struct MetricsLog {
    writer: csv::Writer<File>,
}

impl MetricsLog {
    /// Creates the log file and writes the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(["unix_time", "metric", "value", "notes"])?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Appends one metric row, stamped with the current unix time.
    pub fn log_metric(&mut self, name: &str, value: f64, notes: &str) -> Result<()> {
        let unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.writer.write_record(&[
            format!("{:.3}", unix_time),
            name.to_string(),
            format!("{}", value),
            notes.to_string(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_rows_accumulate_under_the_header() {
        let path = std::env::temp_dir().join(format!(
            "density-engine-{}-metrics.csv",
            std::process::id()
        ));
        {
            let mut log = MetricsLog::create(&path).unwrap();
            log.log_metric("initial_rmse", 0.25, "").unwrap();
            log.log_metric("drift_p_value", 0.001, "drift detected: true").unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "unix_time,metric,value,notes");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("initial_rmse,0.25"));
        assert!(lines[2].contains("drift_p_value,0.001,drift detected: true"));
        std::fs::remove_file(&path).unwrap();
    }
}
