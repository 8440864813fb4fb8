use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";
pub const DEFAULT_DIRECTION_THRESHOLD: f64 = 40.0;
pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 100;
pub const DEFAULT_DIRECTION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_EXPRESSION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BURST_INTERVAL_MILLIS: u64 = 1000;
pub const DEFAULT_BACKOFF_BASE_MILLIS: u64 = 50;
pub const DEFAULT_BACKOFF_MAX_MILLIS: u64 = 2000;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_PIXEL_FORMAT: &str = "YUYV";
pub const DEFAULT_WARMUP_FRAMES: u32 = 0;
pub const DEFAULT_JITTERS: u32 = 1;
pub const DEFAULT_CAPTURE_DIR: &str = "captures/enroll";

/// On-disk form. Every key is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub direction_threshold: Option<f64>,
    pub poll_interval_millis: Option<u64>,
    pub direction_timeout_secs: Option<u64>,
    pub expression_timeout_secs: Option<u64>,
    pub capture_timeout_secs: Option<u64>,
    /// Absent means the user may take as long as they like to choose.
    pub selection_timeout_secs: Option<u64>,
    pub burst_interval_millis: Option<u64>,
    pub backoff_base_millis: Option<u64>,
    pub backoff_max_millis: Option<u64>,
    pub video_device: Option<String>,
    pub pixel_format: Option<String>,
    pub warmup_frames: Option<u32>,
    pub jitters: Option<u32>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub capture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub direction_threshold: f64,
    pub poll_interval: Duration,
    pub direction_timeout: Duration,
    pub expression_timeout: Duration,
    pub capture_timeout: Duration,
    pub selection_timeout: Option<Duration>,
    pub burst_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub video_device: String,
    pub pixel_format: String,
    pub warmup_frames: u32,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub capture_dir: PathBuf,
}

fn at_least_one_second(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let backoff_base = Duration::from_millis(
            raw.backoff_base_millis
                .unwrap_or(DEFAULT_BACKOFF_BASE_MILLIS)
                .max(1),
        );
        let backoff_max = Duration::from_millis(
            raw.backoff_max_millis.unwrap_or(DEFAULT_BACKOFF_MAX_MILLIS),
        )
        .max(backoff_base);

        Self {
            direction_threshold: raw
                .direction_threshold
                .unwrap_or(DEFAULT_DIRECTION_THRESHOLD),
            poll_interval: Duration::from_millis(
                raw.poll_interval_millis
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MILLIS)
                    .max(1),
            ),
            direction_timeout: at_least_one_second(
                raw.direction_timeout_secs
                    .unwrap_or(DEFAULT_DIRECTION_TIMEOUT_SECS),
            ),
            expression_timeout: at_least_one_second(
                raw.expression_timeout_secs
                    .unwrap_or(DEFAULT_EXPRESSION_TIMEOUT_SECS),
            ),
            capture_timeout: at_least_one_second(
                raw.capture_timeout_secs
                    .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS),
            ),
            selection_timeout: raw.selection_timeout_secs.map(at_least_one_second),
            burst_interval: Duration::from_millis(
                raw.burst_interval_millis
                    .unwrap_or(DEFAULT_BURST_INTERVAL_MILLIS),
            ),
            backoff_base,
            backoff_max,
            video_device: raw
                .video_device
                .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
            pixel_format: raw
                .pixel_format
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            warmup_frames: raw.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            capture_dir: raw
                .capture_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub fn default_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_paths())
}

/// Parses the first path that exists. Missing files are skipped; any other
/// read failure stops the search.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig {
                    contents: parsed,
                    source: path.clone(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    Ok(match load_from_paths(paths)? {
        Some(entry) => ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        },
        None => ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        },
    })
}
