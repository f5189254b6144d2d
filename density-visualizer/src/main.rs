use anyhow::{Context, Result};
use clap::Parser;
use density_common::GridSnapshot;
use image::{Rgb, RgbImage};
use log::{info, warn};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input snapshot history file (.json, .bin, or .msgpack)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the rendered frames
    #[arg(short, long, default_value = "frames")]
    output_dir: PathBuf,

    /// Snapshot file format: "json", "bincode", or "messagepack"
    #[arg(long, default_value = "json")]
    format: String,

    /// Pixels per grid cell in the rendered frames
    #[arg(long, default_value_t = 8)]
    scale: u32,
}

/// Two-stop green ramp: low activity renders near-white, high activity deep
/// green, matching the heat maps the source project produced.
fn colormap(value: f64) -> Rgb<u8> {
    let t = value.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    Rgb([lerp(247.0, 0.0), lerp(252.0, 68.0), lerp(245.0, 27.0)])
}

fn load_snapshots(args: &Args) -> Result<Vec<GridSnapshot>> {
    let file = File::open(&args.input)
        .with_context(|| format!("failed to open snapshot file '{}'", args.input.display()))?;
    let reader = BufReader::new(file);
    let snapshots: Vec<GridSnapshot> = match args.format.as_str() {
        "json" => serde_json::from_reader(reader)?,
        "bincode" => bincode::deserialize_from(reader)?,
        "messagepack" => rmp_serde::from_read(reader)?,
        other => {
            warn!("Unknown format '{}', trying JSON.", other);
            serde_json::from_reader(reader)?
        }
    };
    Ok(snapshots)
}

/// Renders one snapshot as a PNG heat map, upscaled by `scale`.
fn render_frame(snapshot: &GridSnapshot, scale: u32, path: &PathBuf) -> Result<()> {
    let width = snapshot.cols * scale;
    let height = snapshot.rows * scale;
    let image = RgbImage::from_fn(width, height, |x, y| {
        let row = (y / scale) as usize;
        let col = (x / scale) as usize;
        colormap(snapshot.cells[row * snapshot.cols as usize + col])
    });
    image
        .save(path)
        .with_context(|| format!("failed to write frame '{}'", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Loading snapshots from '{}'...", args.input.display());
    let snapshots = load_snapshots(&args)?;
    if snapshots.is_empty() {
        anyhow::bail!("snapshot file '{}' contains no frames", args.input.display());
    }
    info!(
        "Loaded {} snapshots ({}x{} grid).",
        snapshots.len(),
        snapshots[0].rows,
        snapshots[0].cols
    );

    fs::create_dir_all(&args.output_dir)?;
    let start_time = Instant::now();
    for snapshot in &snapshots {
        let path = args
            .output_dir
            .join(format!("frame_{:05}.png", snapshot.step));
        render_frame(snapshot, args.scale.max(1), &path)?;
    }
    info!(
        "Rendered {} frames to '{}' in {:.2} s.",
        snapshots.len(),
        args.output_dir.display(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colormap_endpoints_and_clamping() {
        assert_eq!(colormap(0.0), Rgb([247, 252, 245]));
        assert_eq!(colormap(1.0), Rgb([0, 68, 27]));
        assert_eq!(colormap(-5.0), colormap(0.0));
        assert_eq!(colormap(5.0), colormap(1.0));
    }

    #[test]
    fn frames_scale_with_the_grid() {
        let snapshot = GridSnapshot {
            step: 0,
            rows: 2,
            cols: 3,
            cells: vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.0],
            total_activity: 2.5,
        };
        let path = std::env::temp_dir().join(format!(
            "density-visualizer-{}-frame.png",
            std::process::id()
        ));
        render_frame(&snapshot, 4, &path).unwrap();
        let image = image::open(&path).unwrap();
        assert_eq!(image.width(), 12);
        assert_eq!(image.height(), 8);
        std::fs::remove_file(&path).unwrap();
    }
}
