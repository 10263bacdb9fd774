use crate::import::scanner::{CACHE_DIR, IMAGE_EXTENSIONS};
use crate::import::util::capped_num_threads;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Output codec for generated previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFormat {
    Webp,
    Jpeg,
    Png,
}

impl PreviewFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PreviewFormat::Webp => "webp",
            PreviewFormat::Jpeg => "jpeg",
            PreviewFormat::Png => "png",
        }
    }
}

fn default_sizes() -> Vec<u32> {
    vec![1024, 512]
}

fn default_format() -> PreviewFormat {
    PreviewFormat::Webp
}

fn default_quality() -> u8 {
    75
}

fn default_extensions() -> Vec<String> {
    IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_skip_dirs() -> Vec<String> {
    vec![CACHE_DIR.to_string()]
}

fn default_true() -> bool {
    true
}

fn default_num_workers() -> usize {
    capped_num_threads()
}

fn default_num_threads() -> usize {
    1
}

fn default_progress_step() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for one preview run.
///
/// Every field except `input_root` has a default, so a config file only needs
/// to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub input_root: PathBuf,
    /// where previews and `metadata.json` go; `<input_root>/.photoviewer` if unset
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    /// target long-edge sizes in pixels
    #[serde(default = "default_sizes")]
    pub sizes: Vec<u32>,
    #[serde(default = "default_format")]
    pub format: PreviewFormat,
    /// encoder quality 1-100 (JPEG and WebP)
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub calc_psnr: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// threads a single worker may use to render the sizes of one file
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// report progress every this many files per worker
    #[serde(default = "default_progress_step")]
    pub progress_step: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl PreviewConfig {
    pub fn new(input_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: None,
            sizes: default_sizes(),
            format: default_format(),
            quality: default_quality(),
            calc_psnr: false,
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            recursive: true,
            num_workers: default_num_workers(),
            num_threads: default_num_threads(),
            progress_step: default_progress_step(),
            log_level: default_log_level(),
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.output_root
            .clone()
            .unwrap_or_else(|| self.input_root.join(CACHE_DIR))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sizes.is_empty() {
            return Err(ConfigError::Invalid("sizes must not be empty".into()));
        }
        if self.sizes.contains(&0) {
            return Err(ConfigError::Invalid("sizes must be positive".into()));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "quality must be in 1..=100, got {}",
                self.quality
            )));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be at least 1".into()));
        }
        if self.num_threads == 0 {
            return Err(ConfigError::Invalid("num_threads must be at least 1".into()));
        }
        if self.progress_step == 0 {
            return Err(ConfigError::Invalid("progress_step must be at least 1".into()));
        }
        Ok(())
    }
}

pub fn read_config(path: &Path) -> Result<PreviewConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_config(path: &Path, config: &PreviewConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
