//! Batch Engine
//!
//! Runs the per-item pipeline over large item sets under bounded concurrency.
//!
//! Items are split into order-preserving chunks of `chunk_size`. With the
//! chunk barrier on, chunks run strictly one after another; inside a chunk
//! every item is dispatched to `worker_count` workers and gathered by
//! completion over a channel, paired by item index.
//!
//! Execution modes:
//! - Shared: one pipeline behind an `Arc`, items run on a rayon thread pool
//! - Isolated: per dispatch, each worker thread rebuilds its own pipeline
//!   (own pool, own cache) from the serialized blueprint
//!
//! Every item ends up exactly once in either `results` or `errors`; a panic
//! or error in one item never affects its siblings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use uuid::Uuid;

use crate::cache::{keys, CacheKey, CacheLayer, BATCH_STATUS_TTL};
use crate::config::{duration_secs, EngineConfig};
use crate::error::{QcError, Result};
use crate::pipeline::{ItemProcessor, PipelineBlueprint};
use crate::types::{ProcessedSubject, QcItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Shared,
    Isolated,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shared" => Ok(ExecutionMode::Shared),
            "isolated" => Ok(ExecutionMode::Isolated),
            other => Err(format!("Unknown execution mode: {}", other)),
        }
    }
}

/// Default worker count: available CPUs, at most 8
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub worker_count: usize,
    pub execution_mode: ExecutionMode,
    pub cache_enabled: bool,
    pub chunk_barrier: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            worker_count: default_worker_count(),
            execution_mode: ExecutionMode::Shared,
            cache_enabled: true,
            chunk_barrier: true,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QcError::InvalidConfig("chunk_size must be at least 1".to_string()));
        }
        if self.worker_count == 0 {
            return Err(QcError::InvalidConfig("worker_count must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Progress snapshot reported after each chunk boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub job_id: Uuid,
    pub processed: usize,
    pub total: usize,
    pub progress_percent: f64,
    pub chunk: usize,
    pub total_chunks: usize,
    pub successful: usize,
    pub failed: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Cooperative cancellation, checked before each item starts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identity and shape of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub chunk_size: usize,
    pub worker_count: usize,
    pub execution_mode: ExecutionMode,
}

impl BatchJob {
    fn new(total: usize, config: &BatchConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            total,
            chunk_size: config.chunk_size,
            worker_count: config.worker_count,
            execution_mode: config.execution_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedItem {
    pub index: usize,
    pub item_id: String,
    pub processed: ProcessedSubject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub index: usize,
    pub item_id: String,
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub job: BatchJob,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Sorted by index
    pub results: Vec<CompletedItem>,
    /// Sorted by index
    pub errors: Vec<FailedItem>,
    pub peak_memory_mb: f64,
    pub throughput: f64,
    pub cancelled: bool,
}

/// Snapshot written to the cache after every chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub job_id: Uuid,
    pub state: String,
    pub progress: BatchProgress,
    pub updated_at: DateTime<Utc>,
}

/// What each worker runs
pub enum Workload {
    /// One pipeline shared by every worker
    Shared(Arc<dyn ItemProcessor>),
    /// Each worker rebuilds its own pipeline from the blueprint
    Isolated(PipelineBlueprint),
}

enum Outcome {
    Completed(CompletedItem),
    Failed(FailedItem),
}

impl Outcome {
    fn index(&self) -> usize {
        match self {
            Outcome::Completed(c) => c.index,
            Outcome::Failed(f) => f.index,
        }
    }
}

/// Order-preserving chunk ranges covering `0..total`
pub fn chunk_bounds(total: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..total)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total))
        .collect()
}

/// Samples this process's resident memory
struct MemorySampler {
    system: System,
    pid: Option<Pid>,
    peak_bytes: u64,
}

impl MemorySampler {
    fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::debug!("Memory sampling unavailable: {}", e))
            .ok();
        let mut sampler = Self {
            system: System::new(),
            pid,
            peak_bytes: 0,
        };
        sampler.sample();
        sampler
    }

    fn sample(&mut self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let bytes = self.system.process(pid).map(|p| p.memory()).unwrap_or(0);
        self.peak_bytes = self.peak_bytes.max(bytes);
        bytes
    }

    fn peak_mb(&self) -> f64 {
        self.peak_bytes as f64 / (1024.0 * 1024.0)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn failed(index: usize, item: &QcItem, error_type: &str, message: String) -> Outcome {
    Outcome::Failed(FailedItem {
        index,
        item_id: item.id().to_string(),
        error_type: error_type.to_string(),
        message,
    })
}

/// Run one item, turning errors and panics into failed outcomes
fn run_item(
    processor: &dyn ItemProcessor,
    index: usize,
    item: &QcItem,
    cancel: &CancellationToken,
) -> Outcome {
    if cancel.is_cancelled() {
        let err = QcError::Cancelled;
        return failed(index, item, err.kind(), err.to_string());
    }

    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(item))) {
        Ok(Ok(processed)) => Outcome::Completed(CompletedItem {
            index,
            item_id: item.id().to_string(),
            processed,
        }),
        Ok(Err(e)) => failed(index, item, e.kind(), e.to_string()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!("Item {} ({}) panicked: {}", index, item.id(), message);
            failed(index, item, "panic", message)
        }
    }
}

/// Isolated worker: build a private pipeline, then pull item indices
fn isolated_worker(
    worker_id: usize,
    blueprint_json: &str,
    items: &[QcItem],
    next: &AtomicUsize,
    end: usize,
    tx: Sender<Outcome>,
    cancel: &CancellationToken,
) {
    let built = panic::catch_unwind(|| {
        PipelineBlueprint::from_json(blueprint_json).and_then(|blueprint| blueprint.build())
    });
    let pipeline = match built {
        Ok(Ok(pipeline)) => Ok(pipeline),
        Ok(Err(e)) => Err(QcError::WorkerInit(e.to_string())),
        Err(payload) => Err(QcError::WorkerInit(panic_message(payload.as_ref()))),
    };
    if let Err(e) = &pipeline {
        tracing::warn!("Isolated worker {} failed to start: {}", worker_id, e);
    }

    loop {
        let index = next.fetch_add(1, Ordering::SeqCst);
        if index >= end {
            break;
        }
        let item = &items[index];
        let outcome = match &pipeline {
            Ok(pipeline) => run_item(pipeline, index, item, cancel),
            Err(e) => failed(index, item, e.kind(), e.to_string()),
        };
        if tx.send(outcome).is_err() {
            break;
        }
    }
}

pub struct BatchEngine {
    config: BatchConfig,
    thread_pool: rayon::ThreadPool,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    status_cache: Option<Arc<CacheLayer>>,
}

impl BatchEngine {
    /// Validates the configuration before anything is dispatched
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|i| format!("qc-worker-{}", i))
            .build()
            .map_err(|e| QcError::WorkerInit(e.to_string()))?;

        Ok(Self {
            config,
            thread_pool,
            progress: None,
            cancel: CancellationToken::new(),
            status_cache: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cache that receives batch status snapshots (when caching is enabled)
    pub fn with_status_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.status_cache = Some(cache);
        self
    }

    pub fn status_cache(&self) -> Option<&Arc<CacheLayer>> {
        self.status_cache.as_ref()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process `items`; item failures are recorded, never returned
    pub fn run(&self, items: &[QcItem], workload: &Workload) -> Result<BatchResult> {
        let started = Instant::now();
        let job = BatchJob::new(items.len(), &self.config);
        let bounds = chunk_bounds(items.len(), self.config.chunk_size);
        let total_chunks = bounds.len();

        // Serialized once; isolated workers deserialize their own copy
        let blueprint_json = match workload {
            Workload::Isolated(blueprint) => Some(blueprint.to_json()?),
            Workload::Shared(_) => None,
        };

        tracing::info!(
            "Batch {} started: {} items, {} chunks of {}, {} workers ({:?})",
            job.id,
            items.len(),
            total_chunks,
            self.config.chunk_size,
            self.config.worker_count,
            self.config.execution_mode
        );

        let mut memory = MemorySampler::new();
        let mut results: Vec<CompletedItem> = Vec::with_capacity(items.len());
        let mut errors: Vec<FailedItem> = Vec::new();

        if self.config.chunk_barrier {
            for (chunk_no, range) in bounds.iter().enumerate() {
                let chunk_started = Instant::now();
                let mut chunk_outcomes = Vec::with_capacity(range.len());
                self.dispatch(items, range.clone(), workload, blueprint_json.as_deref(), &mut |o: Outcome| {
                    chunk_outcomes.push(o)
                });

                for outcome in chunk_outcomes {
                    match outcome {
                        Outcome::Completed(c) => results.push(c),
                        Outcome::Failed(f) => errors.push(f),
                    }
                }

                let progress = self.progress_snapshot(&job, chunk_no + 1, total_chunks, &results, &errors);
                let rss = memory.sample();
                tracing::info!(
                    "Chunk {}/{} done in {:.2}s ({}/{} items, {:.1} MB resident)",
                    chunk_no + 1,
                    total_chunks,
                    chunk_started.elapsed().as_secs_f64(),
                    progress.processed,
                    progress.total,
                    rss as f64 / (1024.0 * 1024.0)
                );
                self.report(&progress, "running");
            }
        } else {
            let chunk_size = self.config.chunk_size;
            let total = items.len();
            let mut processed = 0;
            let mut outcomes = Vec::with_capacity(total);

            self.dispatch(items, 0..total, workload, blueprint_json.as_deref(), &mut |o: Outcome| {
                outcomes.push(o);
                processed += 1;
                if processed % chunk_size == 0 || processed == total {
                    let (successful, failed) = outcomes.iter().fold((0, 0), |(s, f), o| match o {
                        Outcome::Completed(_) => (s + 1, f),
                        Outcome::Failed(_) => (s, f + 1),
                    });
                    let progress = BatchProgress {
                        job_id: job.id,
                        processed,
                        total,
                        progress_percent: percent(processed, total),
                        chunk: processed.div_ceil(chunk_size),
                        total_chunks,
                        successful,
                        failed,
                    };
                    memory.sample();
                    self.report(&progress, "running");
                }
            });

            for outcome in outcomes {
                match outcome {
                    Outcome::Completed(c) => results.push(c),
                    Outcome::Failed(f) => errors.push(f),
                }
            }
        }

        results.sort_by_key(|c| c.index);
        errors.sort_by_key(|f| f.index);
        memory.sample();

        let elapsed = started.elapsed();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            items.len() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let cancelled = self.cancel.is_cancelled();

        let final_progress = self.progress_snapshot(&job, total_chunks, total_chunks, &results, &errors);
        self.write_status(&final_progress, if cancelled { "cancelled" } else { "completed" });

        tracing::info!(
            "Batch {} finished: {} ok, {} failed in {:.2}s ({:.1} items/s, peak {:.1} MB)",
            job.id,
            results.len(),
            errors.len(),
            elapsed.as_secs_f64(),
            throughput,
            memory.peak_mb()
        );

        Ok(BatchResult {
            total: items.len(),
            successful: results.len(),
            failed: errors.len(),
            elapsed,
            results,
            errors,
            peak_memory_mb: memory.peak_mb(),
            throughput,
            cancelled,
            job,
        })
    }

    /// Run `range` concurrently, handing each outcome to `sink` as it completes
    fn dispatch(
        &self,
        items: &[QcItem],
        range: Range<usize>,
        workload: &Workload,
        blueprint_json: Option<&str>,
        sink: &mut dyn FnMut(Outcome),
    ) {
        let (tx, rx) = mpsc::channel::<Outcome>();
        let cancel = &self.cancel;

        match (workload, blueprint_json) {
            (Workload::Isolated(_), Some(json)) => {
                let next = AtomicUsize::new(range.start);
                let end = range.end;
                let workers = self.config.worker_count.min(range.len()).max(1);

                thread::scope(|scope| {
                    let mut spawned = 0;
                    for worker_id in 0..workers {
                        let tx = tx.clone();
                        let next = &next;
                        let result = thread::Builder::new()
                            .name(format!("qc-isolated-{}", worker_id))
                            .spawn_scoped(scope, move || {
                                isolated_worker(worker_id, json, items, next, end, tx, cancel)
                            });
                        match result {
                            Ok(_) => spawned += 1,
                            Err(e) => tracing::warn!("Failed to spawn isolated worker: {}", e),
                        }
                    }

                    if spawned == 0 {
                        isolated_worker(0, json, items, &next, end, tx, cancel);
                    } else {
                        drop(tx);
                    }

                    for outcome in rx {
                        sink(outcome);
                    }
                });
            }
            (Workload::Shared(processor), _) => {
                let processor: &dyn ItemProcessor = processor.as_ref();

                self.thread_pool.in_place_scope(|scope| {
                    for index in range {
                        let tx = tx.clone();
                        let item = &items[index];
                        scope.spawn(move |_| {
                            let outcome = run_item(processor, index, item, cancel);
                            let _ = tx.send(outcome);
                        });
                    }
                    drop(tx);

                    for outcome in rx {
                        tracing::debug!("Item {} completed", outcome.index());
                        sink(outcome);
                    }
                });
            }
            (Workload::Isolated(_), None) => {
                // Blueprint serialization happens before dispatch
                for index in range {
                    let err = QcError::WorkerInit("blueprint unavailable".to_string());
                    sink(failed(index, &items[index], err.kind(), err.to_string()));
                }
            }
        }
    }

    fn progress_snapshot(
        &self,
        job: &BatchJob,
        chunk: usize,
        total_chunks: usize,
        results: &[CompletedItem],
        errors: &[FailedItem],
    ) -> BatchProgress {
        let processed = results.len() + errors.len();
        BatchProgress {
            job_id: job.id,
            processed,
            total: job.total,
            progress_percent: percent(processed, job.total),
            chunk,
            total_chunks,
            successful: results.len(),
            failed: errors.len(),
        }
    }

    fn report(&self, progress: &BatchProgress, state: &str) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
        self.write_status(progress, state);
    }

    fn write_status(&self, progress: &BatchProgress, state: &str) {
        if !self.config.cache_enabled {
            return;
        }
        if let Some(cache) = &self.status_cache {
            let status = BatchStatus {
                job_id: progress.job_id,
                state: state.to_string(),
                progress: progress.clone(),
                updated_at: Utc::now(),
            };
            let key = CacheKey::new(keys::BATCH_STATUS).part(progress.job_id).build();
            cache.set(&key, &status, BATCH_STATUS_TTL);
        }
    }
}

fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        processed as f64 / total as f64 * 100.0
    }
}

/// Last status snapshot of a batch, if still cached
pub fn batch_status(cache: &CacheLayer, job_id: Uuid) -> Option<BatchStatus> {
    cache.get(&CacheKey::new(keys::BATCH_STATUS).part(job_id).build())
}

/// Run a batch end to end from engine configuration
///
/// Shared mode builds one pipeline from the blueprint; isolated mode hands
/// the blueprint to the workers.
pub fn run_batch(
    items: &[QcItem],
    config: &EngineConfig,
    blueprint: PipelineBlueprint,
    progress: Option<ProgressCallback>,
) -> Result<BatchResult> {
    let (engine, workload) = engine_for(config, blueprint, progress)?;
    engine.run(items, &workload)
}

/// Engine and workload for one run
///
/// Status snapshots go to the shared pipeline's cache, or in isolated mode
/// to a coordinator-side cache built from the blueprint's cache settings.
fn engine_for(
    config: &EngineConfig,
    blueprint: PipelineBlueprint,
    progress: Option<ProgressCallback>,
) -> Result<(BatchEngine, Workload)> {
    config.validate()?;

    let mut engine = BatchEngine::new(config.batch.clone())?;
    if let Some(callback) = progress {
        engine = engine.with_progress(callback);
    }

    let blueprint = PipelineBlueprint {
        cache_enabled: blueprint.cache_enabled && config.batch.cache_enabled,
        ..blueprint
    };

    let workload = match config.batch.execution_mode {
        ExecutionMode::Shared => {
            let pipeline = Arc::new(blueprint.build()?);
            if let Some(cache) = pipeline.cache() {
                engine = engine.with_status_cache(Arc::clone(cache));
            }
            Workload::Shared(pipeline)
        }
        ExecutionMode::Isolated => {
            if blueprint.cache_enabled {
                engine = engine.with_status_cache(Arc::new(CacheLayer::in_memory(&blueprint.cache)));
            }
            Workload::Isolated(blueprint)
        }
    };

    Ok((engine, workload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NormativeTables;
    use crate::metrics::{Metric, RawMetrics};
    use crate::types::SubjectInfo;
    use std::sync::Mutex;

    fn items(n: usize) -> Vec<QcItem> {
        (0..n)
            .map(|i| {
                QcItem::new(
                    SubjectInfo::new(&format!("sub-{:04}", i), Some(20.0 + (i % 40) as f64)),
                    RawMetrics::new()
                        .with(Metric::Snr, 12.0 + (i % 10) as f64)
                        .with(Metric::Cnr, 3.5)
                        .with(Metric::Efc, 0.48),
                )
            })
            .collect()
    }

    fn shared_workload() -> Workload {
        let pipeline = PipelineBlueprint::new(NormativeTables::literature_defaults())
            .build()
            .unwrap();
        Workload::Shared(Arc::new(pipeline))
    }

    fn config(chunk_size: usize, workers: usize) -> BatchConfig {
        BatchConfig {
            chunk_size,
            worker_count: workers,
            ..BatchConfig::default()
        }
    }

    #[test]
    fn test_chunk_bounds() {
        assert_eq!(chunk_bounds(250, 100), vec![0..100, 100..200, 200..250]);
        assert_eq!(chunk_bounds(100, 100), vec![0..100]);
        assert!(chunk_bounds(0, 100).is_empty());
    }

    #[test]
    fn test_zero_sizes_rejected_before_dispatch() {
        assert!(matches!(BatchEngine::new(config(0, 2)), Err(QcError::InvalidConfig(_))));
        assert!(matches!(BatchEngine::new(config(10, 0)), Err(QcError::InvalidConfig(_))));
    }

    #[test]
    fn test_every_index_appears_once() {
        let engine = BatchEngine::new(config(7, 3)).unwrap();
        let result = engine.run(&items(30), &shared_workload()).unwrap();

        assert_eq!(result.total, 30);
        assert_eq!(result.successful + result.failed, 30);
        let indices: Vec<usize> = result.results.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..30).collect::<Vec<_>>());
        assert_eq!(result.results[12].item_id, "sub-0012");
    }

    #[test]
    fn test_progress_reported_per_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let engine = BatchEngine::new(config(100, 4))
            .unwrap()
            .with_progress(Arc::new(move |p: &BatchProgress| {
                sink.lock().unwrap().push((p.processed, p.chunk, p.total_chunks))
            }));

        engine.run(&items(250), &shared_workload()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(100, 1, 3), (200, 2, 3), (250, 3, 3)]
        );
    }

    #[test]
    fn test_cancelled_items_are_recorded() {
        let token = CancellationToken::new();
        token.cancel();
        let engine = BatchEngine::new(config(10, 2)).unwrap().with_cancellation(token);

        let result = engine.run(&items(5), &shared_workload()).unwrap();

        assert!(result.cancelled);
        assert_eq!(result.failed, 5);
        assert!(result.errors.iter().all(|f| f.error_type == "cancelled"));
    }

    #[test]
    fn test_isolated_mode_matches_shared_mode() {
        let blueprint = PipelineBlueprint::new(NormativeTables::literature_defaults());
        let batch = items(40);

        let shared = BatchEngine::new(config(16, 3))
            .unwrap()
            .run(&batch, &shared_workload())
            .unwrap();
        let isolated = BatchEngine::new(BatchConfig {
            execution_mode: ExecutionMode::Isolated,
            ..config(16, 3)
        })
        .unwrap()
        .run(&batch, &Workload::Isolated(blueprint))
        .unwrap();

        assert_eq!(isolated.successful, 40);
        for (a, b) in shared.results.iter().zip(&isolated.results) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.processed.assessment, b.processed.assessment);
        }
    }

    #[test]
    fn test_isolated_run_writes_status_snapshot() {
        let mut engine_config = EngineConfig::default();
        engine_config.batch = BatchConfig {
            execution_mode: ExecutionMode::Isolated,
            ..config(5, 2)
        };
        let blueprint = PipelineBlueprint::new(NormativeTables::literature_defaults());

        let (engine, workload) = engine_for(&engine_config, blueprint.clone(), None).unwrap();
        let result = engine.run(&items(12), &workload).unwrap();

        let status = batch_status(engine.status_cache().unwrap(), result.job.id).unwrap();
        assert_eq!(status.state, "completed");
        assert_eq!(status.progress.processed, 12);

        engine_config.batch.cache_enabled = false;
        let (engine, _) = engine_for(&engine_config, blueprint, None).unwrap();
        assert!(engine.status_cache().is_none());
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("Isolated".parse::<ExecutionMode>().unwrap(), ExecutionMode::Isolated);
        assert!("process".parse::<ExecutionMode>().is_err());
    }
}
