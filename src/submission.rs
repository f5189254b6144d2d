use anyhow::Result;
use log::info;
use std::path::Path;

/// Writes the two-column prediction table (`row_id, microbusiness_density`).
pub fn write_submission<P: AsRef<Path>>(
    path: P,
    row_ids: &[String],
    predictions: &[f64],
) -> Result<()> {
    if row_ids.len() != predictions.len() {
        anyhow::bail!(
            "submission length mismatch: {} row ids vs {} predictions",
            row_ids.len(),
            predictions.len()
        );
    }

    let path_ref = path.as_ref();
    let mut writer = csv::Writer::from_path(path_ref)?;
    writer.write_record(["row_id", "microbusiness_density"])?;
    for (row_id, prediction) in row_ids.iter().zip(predictions.iter()) {
        writer.write_record(&[row_id.clone(), format!("{:.6}", prediction)])?;
    }
    writer.flush()?;
    info!(
        "Submission file with {} rows written to '{}'.",
        row_ids.len(),
        path_ref.display()
    );
    Ok(())
}
