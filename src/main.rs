use anyhow::Result;
use density_common::{EngineConfig, GridSnapshot, RunMode};
use density_engine::automaton::{BinaryRule, ContinuousRule, GridSimulator, UpdateRule};
use density_engine::experiments::{simulate_drift_and_retrain, simulate_trajectory};
use density_engine::metrics::calculate_metrics;
use density_engine::model::build_model;
use density_engine::monitoring::MetricsLog;
use density_engine::{dataset, features, submission};
use log::{error, info, warn};
use rand::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Microbusiness Density Engine...");

    // --- Load Configuration ---
    let config = EngineConfig::load("config.toml")?;
    std::fs::create_dir_all(&config.output.directory)?;

    match config.simulation.mode {
        RunMode::Binary => run_binary(&config),
        RunMode::Continuous => run_continuous(&config),
        RunMode::Drift => run_drift(&config),
    }
}

/// Runs the binary-rule automaton from a random initial population.
fn run_binary(config: &EngineConfig) -> Result<()> {
    info!("Initializing binary-rule automaton...");
    let rule = BinaryRule::from_config(&config.binary_rule)?;
    let mut sim = GridSimulator::new(
        config.grid.height as usize,
        config.grid.width as usize,
        rule,
        config.simulation.seed,
    )?;
    sim.initialize_random(config.binary_rule.initial_density)?;
    run_and_save(&mut sim, config)
}

/// Runs the continuous-rule automaton seeded from a synthetic data slice, the
/// stand-in for a density column pulled from the real table.
fn run_continuous(config: &EngineConfig) -> Result<()> {
    info!("Initializing continuous-rule automaton...");
    let rule = ContinuousRule::from_config(&config.continuous_rule)?;
    let mut sim = GridSimulator::new(
        config.grid.height as usize,
        config.grid.width as usize,
        rule,
        config.simulation.seed,
    )?;

    let mut data_rng = StdRng::seed_from_u64(config.simulation.seed.wrapping_add(1));
    let data_slice: Vec<f64> = (0..100).map(|_| data_rng.random::<f64>()).collect();
    sim.initialize_from_data(&data_slice);
    run_and_save(&mut sim, config)
}

/// Advances the simulation and persists the recorded history and activity series.
fn run_and_save<R: UpdateRule>(sim: &mut GridSimulator<R>, config: &EngineConfig) -> Result<()> {
    let steps = config.simulation.steps;
    info!("Starting simulation loop for {} steps...", steps);
    let start_time = Instant::now();
    sim.run(steps);
    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({} history frames, final activity {:.3}).",
        total_duration.as_secs_f64(),
        sim.history().len(),
        sim.grid().total_activity()
    );

    // --- Save Recorded Data ---
    if config.output.save_history {
        save_snapshots(&sim.snapshots(), config)?;
    } else {
        info!("Skipping saving history as per config (save_history is false).");
    }

    if config.output.save_activity {
        let filename = output_path(config, "activity.csv");
        let mut writer = csv::Writer::from_path(&filename)?;
        writer.write_record(["step", "total_activity"])?;
        for (step, activity) in sim.activity_series().iter().enumerate() {
            writer.write_record(&[step.to_string(), format!("{:.4}", activity)])?;
        }
        writer.flush()?;
        info!("Activity series saved to '{}'.", filename.display());
    } else {
        info!("Skipping saving activity series as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn output_path(config: &EngineConfig, suffix: &str) -> PathBuf {
    Path::new(&config.output.directory)
        .join(format!("{}_{}", config.output.base_filename, suffix))
}

/// Serializes the snapshot history in the configured output format.
fn save_snapshots(snapshots: &[GridSnapshot], config: &EngineConfig) -> Result<()> {
    let output_format = config.output.format.as_deref().unwrap_or("json");
    match output_format {
        "json" => {
            let filename = output_path(config, "snapshots.json");
            let mut file = File::create(&filename)?;
            let json_string = serde_json::to_string(snapshots)?;
            file.write_all(json_string.as_bytes())?;
            info!(
                "All snapshots saved to '{}' ({} bytes).",
                filename.display(),
                json_string.len()
            );
        }
        "bincode" => {
            // Binary format (much more compact)
            let filename = output_path(config, "snapshots.bin");
            let file = File::create(&filename)?;
            bincode::serialize_into(file, snapshots)?;
            info!("All snapshots saved to '{}' (binary format).", filename.display());
        }
        "messagepack" => {
            // MessagePack format (compact and cross-platform)
            let filename = output_path(config, "snapshots.msgpack");
            let mut file = File::create(&filename)?;
            rmp_serde::encode::write(&mut file, snapshots)?;
            info!(
                "All snapshots saved to '{}' (MessagePack format).",
                filename.display()
            );
        }
        _ => {
            error!("Unknown output format: {}. Using JSON instead.", output_format);
            let filename = output_path(config, "snapshots.json");
            let mut file = File::create(&filename)?;
            let json_string = serde_json::to_string(snapshots)?;
            file.write_all(json_string.as_bytes())?;
            info!("All snapshots saved to '{}'.", filename.display());
        }
    }
    Ok(())
}

/// Runs the forecasting pipeline with the drift-and-retrain simulation.
fn run_drift(config: &EngineConfig) -> Result<()> {
    let pipeline = &config.pipeline;
    let seed = config.simulation.seed;

    // --- 1. Ingestion & Cleaning ---
    let mut records = dataset::load_csv(&pipeline.data_path)?;
    dataset::clean_records(&mut records);

    // --- 2. Feature Engineering ---
    let matrix =
        features::build_feature_matrix(&records, &pipeline.lags, pipeline.rolling_window)?;
    if matrix.is_empty() {
        anyhow::bail!(
            "no usable training rows after feature engineering; check lags against series lengths"
        );
    }
    let (train_idx, test_idx) =
        features::train_test_split(matrix.len(), pipeline.test_fraction, seed)?;
    let train = matrix.select(&train_idx);
    let test = matrix.select(&test_idx);
    info!(
        "Split {} rows into {} train / {} test.",
        matrix.len(),
        train.len(),
        test.len()
    );

    // --- 3. Train Initial Model ---
    let start_time = Instant::now();
    let mut model = build_model(pipeline.model, &config.model, seed);
    model.fit(&train.rows, &train.targets)?;
    info!(
        "Initial model trained in {:.2} s.",
        start_time.elapsed().as_secs_f64()
    );

    let predictions = model.predict(&test.rows)?;
    let metrics = calculate_metrics(&test.targets, &predictions)?;

    let mut metrics_log = MetricsLog::create(output_path(config, "metrics.csv"))?;
    metrics_log.log_metric("initial_rmse", metrics.rmse, "")?;
    metrics_log.log_metric("initial_mae", metrics.mae, "")?;
    metrics_log.log_metric("initial_smape", metrics.smape, "")?;

    if let Some(importances) = model.feature_importances() {
        let mut ranked: Vec<(&String, f64)> =
            matrix.feature_names.iter().zip(importances).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (name, importance) in ranked.iter().take(5) {
            info!("Feature importance: {} = {:.4}", name, importance);
        }
    }

    // --- 4. Drift Simulation & Retraining ---
    let outcome = simulate_drift_and_retrain(
        model.as_ref(),
        &test,
        &config.drift,
        seed.wrapping_add(1),
        || build_model(pipeline.model, &config.model, seed),
    )?;
    metrics_log.log_metric(
        "drift_p_value",
        outcome.report.p_value,
        &format!("drift detected: {}", outcome.report.drift_detected),
    )?;
    metrics_log.log_metric("degraded_rmse", outcome.degraded.rmse, "")?;
    if let Some(retrained) = &outcome.retrained {
        metrics_log.log_metric("retrained_rmse", retrained.rmse, "")?;
        info!(
            "Retraining recovered RMSE {:.6} (was {:.6} under drift).",
            retrained.rmse, outcome.degraded.rmse
        );
    }

    // --- 5. Outputs ---
    submission::write_submission(
        output_path(config, "submission.csv"),
        &test.row_ids,
        &predictions,
    )?;

    let last_density = records.iter().rev().find_map(|r| r.density).unwrap_or_else(|| {
        warn!("No observed density values; simulating trajectory from 1.0.");
        1.0
    });
    let mut trajectory_rng = StdRng::seed_from_u64(seed.wrapping_add(2));
    let trajectory = simulate_trajectory(last_density, 12, 0.1, &mut trajectory_rng)?;
    for (step, value) in trajectory.iter().enumerate() {
        metrics_log.log_metric("trajectory", *value, &format!("step {}", step + 1))?;
    }

    info!("Pipeline Complete.");
    Ok(())
}
