use crate::import::scanner::path_key;
use crate::import::transform::Transform;
use crate::import::util::build_pool;
use crate::photos::model::{Metadata, RunReport, ShardOutcome, ShardStatus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Cooperative stop signal shared between the caller and every worker.
///
/// Workers poll it before each file; cancelling never interrupts a file that
/// is already being transformed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives `(fraction complete, worker rank)` every `progress_step` files.
/// Returning `false` asks that worker to stop.
pub trait ProgressReporter: Sync {
    fn report(&self, fraction: f64, rank: usize) -> bool;
}

impl<F> ProgressReporter for F
where
    F: Fn(f64, usize) -> bool + Sync,
{
    fn report(&self, fraction: f64, rank: usize) -> bool {
        self(fraction, rank)
    }
}

/// Logs progress at info level and never stops a worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, fraction: f64, rank: usize) -> bool {
        tracing::info!("Progress [{}]: {:.2} %", rank, 100.0 * fraction);
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub num_workers: usize,
    pub progress_step: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            progress_step: 10,
        }
    }
}

/// Stride partition: shard `rank` gets every element whose index is
/// congruent to `rank` modulo `num_workers`, in list order.
pub fn shard<T: Clone>(files: &[T], num_workers: usize, rank: usize) -> Vec<T> {
    let num_workers = num_workers.max(1);
    files
        .iter()
        .skip(rank)
        .step_by(num_workers)
        .cloned()
        .collect()
}

/// Union of partial results. Shards are disjoint, so no key is overwritten.
pub fn merge_partials<I>(partials: I) -> Metadata
where
    I: IntoIterator<Item = Metadata>,
{
    let mut merged = Metadata::new();
    for partial in partials {
        merged.extend(partial);
    }
    merged
}

/// Run `transform` over one shard, in order.
///
/// Per-file failures (errors and panics) are logged and the file is skipped.
/// The loop stops early, keeping what it has, when `cancel` is set or when
/// `progress` returns false.
#[allow(clippy::too_many_arguments)]
pub fn run_shard<T, P>(
    transform: &T,
    input_root: &Path,
    output_root: &Path,
    files: &[PathBuf],
    rank: usize,
    progress_step: usize,
    progress: &P,
    cancel: &CancellationToken,
) -> ShardOutcome
where
    T: Transform + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let total = files.len();
    let step = progress_step.max(1);
    let mut outcome = ShardOutcome::empty(rank, total, ShardStatus::Completed);

    for (i, rel_path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::warn!("worker {}: cancelled, stopping after {} of {} files", rank, i, total);
            outcome.status = ShardStatus::Interrupted;
            break;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            transform.process(input_root, rel_path, output_root)
        }));
        match result {
            Ok(Ok(record)) => {
                outcome.metadata.insert(path_key(rel_path), record);
                outcome.processed += 1;
            }
            Ok(Err(e)) => {
                tracing::warn!("worker {}: skipping {:?}: {}", rank, rel_path, e);
                outcome.failed += 1;
            }
            Err(_) => {
                tracing::warn!("worker {}: panic while processing {:?}, skipping", rank, rel_path);
                outcome.failed += 1;
            }
        }

        let done = i + 1;
        let poll = done % step == 0 || done == total;
        if poll && !progress.report(done as f64 / total as f64, rank) {
            tracing::warn!("worker {}: progress callback requested stop", rank);
            if done < total {
                outcome.status = ShardStatus::Interrupted;
            }
            break;
        }
    }

    outcome
}

/// Shard `files` across `options.num_workers` workers, run them in parallel
/// and merge their results.
///
/// Blocks until every worker has sent its outcome. Each worker owns its shard
/// and its partial map; the only shared state is the read-only transform, the
/// progress reporter and the cancellation token.
pub fn run_parallel<T, P>(
    transform: &T,
    options: RunOptions,
    input_root: &Path,
    output_root: &Path,
    files: &[PathBuf],
    progress: &P,
    cancel: &CancellationToken,
) -> RunReport
where
    T: Transform + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let num_workers = options.num_workers.max(1);
    tracing::info!(
        "pipeline: {} files across {} worker(s)",
        files.len(),
        num_workers
    );

    let pool = build_pool(num_workers, "shard-worker");
    let (tx, rx) = mpsc::channel::<ShardOutcome>();

    pool.scope(|scope| {
        for rank in 0..num_workers {
            let tx = tx.clone();
            let shard_files = shard(files, num_workers, rank);
            scope.spawn(move |_| {
                tracing::info!(
                    "worker {}/{}: start, {} of {} files",
                    rank,
                    num_workers,
                    shard_files.len(),
                    files.len()
                );
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    run_shard(
                        transform,
                        input_root,
                        output_root,
                        &shard_files,
                        rank,
                        options.progress_step,
                        progress,
                        cancel,
                    )
                }))
                .unwrap_or_else(|_| {
                    tracing::warn!("worker {}: died, its shard is lost", rank);
                    ShardOutcome::empty(rank, shard_files.len(), ShardStatus::Interrupted)
                });
                tracing::info!(
                    "worker {}: {:?}, processed={} failed={}",
                    rank,
                    outcome.status,
                    outcome.processed,
                    outcome.failed
                );
                // The receiver outlives the scope, so send cannot fail here.
                let _ = tx.send(outcome);
            });
        }
    });
    drop(tx);

    let mut shards: Vec<ShardOutcome> = rx.iter().collect();
    shards.sort_by_key(|s| s.rank);

    let metadata = merge_partials(shards.iter_mut().map(|s| std::mem::take(&mut s.metadata)));
    let report = RunReport { metadata, shards };
    tracing::info!(
        "pipeline: merged {} records, {} failed, interrupted={}",
        report.metadata.len(),
        report.failed(),
        report.interrupted()
    );
    report
}
