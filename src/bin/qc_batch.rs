// Batch QC runner
//
// Purpose: Classify a batch of MRIQC metric sets against age norms
// Usage:
//   QC_ITEMS=items.json cargo run --release --bin qc_batch
//   QC_SYNTHETIC=5000 QC_WORKERS=8 cargo run --release --bin qc_batch
//
// Configuration comes from QC_CONFIG (JSON) plus QC_* overrides; see config.rs.

use anyhow::Context;
use qc_scorer_rust::batch::ProgressCallback;
use qc_scorer_rust::{
    run_batch, BatchProgress, BatchResult, EngineConfig, Metric, QcItem, RawMetrics, ScanType,
    SubjectInfo,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Plausible young-to-late adult metric sets, with ~5% out-of-range outliers
fn synthetic_items(count: usize, seed: u64) -> Vec<QcItem> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|i| {
            let age = rng.gen_range(6.0..90.0);
            let mut metrics = RawMetrics::new()
                .with(Metric::Snr, rng.gen_range(8.0..26.0))
                .with(Metric::Cnr, rng.gen_range(2.0..5.5))
                .with(Metric::Efc, rng.gen_range(0.38..0.65))
                .with(Metric::Fber, rng.gen_range(800.0..2000.0))
                .with(Metric::Cjv, rng.gen_range(0.3..0.6));

            let fwhm: [f64; 3] = [
                rng.gen_range(2.4..3.2),
                rng.gen_range(2.4..3.2),
                rng.gen_range(2.4..3.2),
            ];
            metrics = metrics
                .with(Metric::FwhmX, fwhm[0])
                .with(Metric::FwhmY, fwhm[1])
                .with(Metric::FwhmZ, fwhm[2])
                .with(Metric::FwhmAvg, fwhm.iter().sum::<f64>() / 3.0);

            if rng.gen_bool(0.05) {
                metrics = metrics.with(Metric::Efc, 1.5);
            }

            let mut subject = SubjectInfo::new(&format!("sub-{:06}", i), Some(age));
            subject.scan_type = ScanType::T1w;
            QcItem::new(subject, metrics)
        })
        .collect()
}

fn load_items(path: &Path) -> anyhow::Result<Vec<QcItem>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file: {:?}", path))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse items JSON: {:?}", path))
}

fn print_summary(result: &BatchResult) {
    println!("\n{}", "=".repeat(70));
    println!("BATCH SUMMARY ({})", result.job.id);
    println!("{}", "=".repeat(70));
    println!("Items:        {}", result.total);
    println!("Successful:   {}", result.successful);
    println!("Failed:       {}", result.failed);
    println!("Elapsed:      {:.3}s", result.elapsed.as_secs_f64());
    println!("Throughput:   {:.1} items/s", result.throughput);
    println!("Peak memory:  {:.1} MB", result.peak_memory_mb);
    if result.cancelled {
        println!("Status:       cancelled");
    }

    let mut by_status = std::collections::BTreeMap::new();
    for item in &result.results {
        *by_status
            .entry(item.processed.assessment.overall_status.as_str())
            .or_insert(0usize) += 1;
    }
    if !by_status.is_empty() {
        println!("\nOverall status:");
        for (status, count) in &by_status {
            println!("  {:<10} {}", status, count);
        }
    }

    if !result.errors.is_empty() {
        let mut by_type = std::collections::BTreeMap::new();
        for error in &result.errors {
            *by_type.entry(error.error_type.as_str()).or_insert(0usize) += 1;
        }
        println!("\nErrors:");
        for (error_type, count) in &by_type {
            println!("  {:<16} {}", error_type, count);
        }
        for error in result.errors.iter().take(5) {
            println!("  #{} {}: {}", error.index, error.item_id, error.message);
        }
    }
    println!("{}", "=".repeat(70));
}

fn main() -> anyhow::Result<()> {
    // Default log level: info for our crate, warn for others
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qc_scorer_rust=info,qc_batch=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!("Configuration:");
    tracing::info!("  chunk_size: {}", config.batch.chunk_size);
    tracing::info!("  workers: {}", config.batch.worker_count);
    tracing::info!("  execution_mode: {:?}", config.batch.execution_mode);
    tracing::info!("  pool_size: {}", config.pool.pool_size);
    tracing::info!("  percentile_mode: {:?}", config.percentile_mode);

    let items = match std::env::var("QC_ITEMS") {
        Ok(path) => load_items(Path::new(&path))?,
        Err(_) => {
            let count: usize = std::env::var("QC_SYNTHETIC")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(1000);
            let seed: u64 = std::env::var("QC_SEED")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(42);
            tracing::info!("Generating {} synthetic items (seed {})", count, seed);
            synthetic_items(count, seed)
        }
    };

    let blueprint = config.blueprint()?;
    let progress: ProgressCallback = Arc::new(|p: &BatchProgress| {
        tracing::info!(
            "Progress: {}/{} ({:.1}%), chunk {}/{}",
            p.processed,
            p.total,
            p.progress_percent,
            p.chunk,
            p.total_chunks
        );
    });

    let result = run_batch(&items, &config, blueprint, Some(progress))?;
    print_summary(&result);

    if let Ok(path) = std::env::var("QC_OUTPUT") {
        let json = serde_json::to_string_pretty(&result)?;
        fs::write(&path, json).with_context(|| format!("Failed to write results: {}", path))?;
        tracing::info!("Results written to {}", path);
    }

    Ok(())
}
