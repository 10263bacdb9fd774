use crate::config::PreviewConfig;
use crate::db::metadata::{update_metadata, MetadataError};
use crate::import::pipeline::{run_parallel, CancellationToken, ProgressReporter, RunOptions};
use crate::import::preview::{psnr_summary, PreviewTransform};
use crate::import::scanner::{list_files, ScanError};
use crate::photos::model::RunStats;

#[derive(Debug, thiserror::Error)]
pub enum PreviewRunError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("cannot create output root {path}: {source}")]
    OutputRoot {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Generate previews for every photo under `config.input_root` and commit the
/// resulting records into `<output_root>/metadata.json`.
///
/// Files that fail are skipped and counted. If the run is cancelled, whatever
/// was produced before the stop is still committed.
pub fn run_preview<P>(
    config: &PreviewConfig,
    progress: &P,
    cancel: &CancellationToken,
) -> Result<RunStats, PreviewRunError>
where
    P: ProgressReporter + ?Sized,
{
    config.validate()?;
    let output_root = config.output_root();
    tracing::info!("input_root: {:?}", config.input_root);
    tracing::info!("output_root: {:?}", output_root);
    std::fs::create_dir_all(&output_root).map_err(|source| PreviewRunError::OutputRoot {
        path: output_root.clone(),
        source,
    })?;

    let files = list_files(
        &config.input_root,
        &config.input_root,
        &config.extensions,
        &config.skip_dirs,
        config.recursive,
    )?;
    tracing::info!("input files num: {}", files.len());

    let transform = PreviewTransform::new(config);
    let report = run_parallel(
        &transform,
        RunOptions {
            num_workers: config.num_workers,
            progress_step: config.progress_step,
        },
        &config.input_root,
        &output_root,
        &files,
        progress,
        cancel,
    );

    let mut stats = RunStats {
        total_files_scanned: files.len(),
        processed: report.processed(),
        failed: report.failed(),
        workers: report.shards.len(),
        cancelled: report.interrupted(),
        ..RunStats::default()
    };

    if config.calc_psnr {
        stats.psnr = psnr_summary(&report.metadata, transform.sizes());
        for (size, psnr) in &stats.psnr {
            tracing::info!("PSNR size={}: {:.3}", size, psnr);
        }
    }

    update_metadata(&output_root, &report.metadata)?;

    tracing::info!(
        "preview run done: scanned={} processed={} failed={} cancelled={}",
        stats.total_files_scanned,
        stats.processed,
        stats.failed,
        stats.cancelled
    );
    Ok(stats)
}
