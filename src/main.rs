//! photoprep - batch preview generation for photo trees
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use photoprep_lib::commands::{catalog, preview};
use photoprep_lib::config::{read_config, write_config, PreviewConfig, PreviewFormat};
use photoprep_lib::import::pipeline::{CancellationToken, LogProgress};
use photoprep_lib::import::scanner::{CACHE_DIR, IMAGE_EXTENSIONS};
use photoprep_lib::photos::catalog::{Catalog, PREVIEW_LARGE, PREVIEW_SMALL};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "photoprep")]
#[command(about = "Generate downscaled previews for a photo tree and keep a metadata index")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render previews for every supported file and update metadata.json
    Preview {
        /// Root of the photo tree (may come from --config instead)
        input_root: Option<PathBuf>,

        /// JSON config file; flags given on the command line override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where previews and metadata.json are written
        #[arg(short, long)]
        output_root: Option<PathBuf>,

        /// Target long-edge sizes, comma separated
        #[arg(short, long, value_delimiter = ',')]
        sizes: Option<Vec<u32>>,

        #[arg(short, long, value_enum)]
        format: Option<PreviewFormat>,

        /// Encoder quality 1-100 (JPEG and WebP; PNG is lossless)
        #[arg(short, long)]
        quality: Option<u8>,

        /// Measure preview fidelity and report PSNR per size
        #[arg(long)]
        calc_psnr: bool,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Threads per worker for rendering the sizes of one file
        #[arg(short, long)]
        threads: Option<usize>,

        /// Only process the top level of the input root
        #[arg(long)]
        no_recursive: bool,

        /// Report progress every this many files per worker
        #[arg(long)]
        progress_step: Option<usize>,

        /// Write the effective configuration to this file before running
        #[arg(long)]
        save_config: Option<PathBuf>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every photo key in metadata.json
    List {
        input_root: PathBuf,

        #[arg(short, long)]
        output_root: Option<PathBuf>,
    },

    /// Print the record of one photo, or the path of one of its previews
    Show {
        input_root: PathBuf,

        /// File key, e.g. trip/day1/a.jpg
        key: String,

        /// Print the path of the preview with this size instead of the record
        #[arg(short, long, conflicts_with_all = ["small", "large"])]
        size: Option<u32>,

        /// Same as --size 512
        #[arg(long, conflicts_with = "large")]
        small: bool,

        /// Same as --size 1024
        #[arg(long)]
        large: bool,

        #[arg(short, long)]
        output_root: Option<PathBuf>,
    },

    /// Print the directory tree of the input root as JSON
    Structure { input_root: PathBuf },

    /// List supported files directly inside one directory of the input root
    ListDir {
        input_root: PathBuf,

        /// Directory relative to the input root
        #[arg(default_value = "")]
        dir: String,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Preview {
            input_root,
            config,
            output_root,
            sizes,
            format,
            quality,
            calc_psnr,
            workers,
            threads,
            no_recursive,
            progress_step,
            save_config,
            json,
        } => {
            let mut cfg = match (config, input_root.clone()) {
                (Some(path), _) => read_config(&path)
                    .with_context(|| format!("Failed to read config {:?}", path))?,
                (None, Some(root)) => PreviewConfig::new(root),
                (None, None) => bail!("either INPUT_ROOT or --config is required"),
            };
            if let Some(root) = input_root {
                cfg.input_root = root;
            }
            if output_root.is_some() {
                cfg.output_root = output_root;
            }
            if let Some(sizes) = sizes {
                cfg.sizes = sizes;
            }
            if let Some(format) = format {
                cfg.format = format;
            }
            if let Some(quality) = quality {
                cfg.quality = quality;
            }
            if let Some(workers) = workers {
                cfg.num_workers = workers;
            }
            if let Some(threads) = threads {
                cfg.num_threads = threads;
            }
            if let Some(step) = progress_step {
                cfg.progress_step = step;
            }
            cfg.calc_psnr |= calc_psnr;
            cfg.recursive &= !no_recursive;

            photoprep_lib::init_logging(cli.log_level.as_deref().unwrap_or(&cfg.log_level));
            if let Some(path) = save_config {
                write_config(&path, &cfg)
                    .with_context(|| format!("Failed to save config {:?}", path))?;
                tracing::info!("saved config to {:?}", path);
            }
            run_preview(&cfg, json)
        }
        Commands::List {
            input_root,
            output_root,
        } => {
            photoprep_lib::init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let catalog = open_catalog(&input_root, output_root)?;
            for key in catalog::list_photos(&catalog) {
                println!("{}", key);
            }
            Ok(())
        }
        Commands::Show {
            input_root,
            key,
            size,
            small,
            large,
            output_root,
        } => {
            photoprep_lib::init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let catalog = open_catalog(&input_root, output_root)?;
            match preview_size(size, small, large) {
                Some(size) => {
                    let path = catalog::preview_file(&catalog, &key, size)
                        .with_context(|| format!("Lookup failed for {}", key))?;
                    println!("{}", path.display());
                }
                None => {
                    let record = catalog::photo_metadata(&catalog, &key)
                        .with_context(|| format!("Lookup failed for {}", key))?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
            Ok(())
        }
        Commands::Structure { input_root } => {
            photoprep_lib::init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let tree = catalog::structure(&input_root, &[CACHE_DIR])
                .context("Failed to read directory structure")?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
            Ok(())
        }
        Commands::ListDir { input_root, dir } => {
            photoprep_lib::init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let keys = catalog::list_dir(&input_root, &dir, IMAGE_EXTENSIONS, &[CACHE_DIR])
                .with_context(|| format!("Failed to list {:?}", dir))?;
            println!("{}", serde_json::to_string_pretty(&keys)?);
            Ok(())
        }
    }
}

fn run_preview(cfg: &PreviewConfig, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing current files...");
        flag.cancel();
    })
    .context("Failed to set signal handler")?;

    let stats = preview::run_preview(cfg, &LogProgress, &cancel).context("Preview run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "scanned {} files: {} processed, {} failed{}",
        stats.total_files_scanned,
        stats.processed,
        stats.failed,
        if stats.cancelled { " (interrupted)" } else { "" }
    );
    for (size, psnr) in &stats.psnr {
        println!("PSNR {}: {:.3} dB", size, psnr);
    }
    Ok(())
}

/// Explicit `--size` wins; `--small` / `--large` name the two served variants.
fn preview_size(size: Option<u32>, small: bool, large: bool) -> Option<u32> {
    size.or(small.then_some(PREVIEW_SMALL))
        .or(large.then_some(PREVIEW_LARGE))
}

fn open_catalog(input_root: &Path, output_root: Option<PathBuf>) -> Result<Catalog> {
    let cache_root = output_root.unwrap_or_else(|| input_root.join(CACHE_DIR));
    Catalog::open(&cache_root).with_context(|| format!("Failed to open catalog at {:?}", cache_root))
}
