use std::path::PathBuf;
use std::time::Duration;

use facegate_config::ResolvedConfig;
use facegate_core::guard::Backoff;
use facegate_core::pipeline::PipelineConfig;
use tracing::{debug, info};

use crate::cli::EnrollArgs;
use crate::errors::{config_error, AppResult};

/// Everything `facegate enroll` needs after flags, config file and defaults
/// have been merged.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollSettings {
    pub pipeline: PipelineConfig,
    pub device: String,
    pub pixel_format: String,
    pub warmup_frames: u32,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub capture_dir: PathBuf,
    pub output: Option<PathBuf>,
}

pub fn load_enroll_settings(args: &EnrollArgs) -> AppResult<EnrollSettings> {
    let loaded = facegate_config::load_resolved_config().map_err(config_error)?;
    match &loaded.source {
        Some(source) => debug!(path = %source.display(), "loaded configuration"),
        None => info!("no configuration file found; using built-in defaults"),
    }
    Ok(build_enroll_settings(args, &loaded.resolved))
}

/// Flags win over the config file, which wins over defaults.
pub fn build_enroll_settings(args: &EnrollArgs, resolved: &ResolvedConfig) -> EnrollSettings {
    let direction_timeout = args
        .direction_timeout_secs
        .map(clamp_secs)
        .unwrap_or(resolved.direction_timeout);
    let expression_timeout = args
        .expression_timeout_secs
        .map(clamp_secs)
        .unwrap_or(resolved.expression_timeout);

    let pipeline = PipelineConfig {
        direction_threshold: resolved.direction_threshold,
        poll_interval: resolved.poll_interval,
        direction_timeout: Some(direction_timeout),
        expression_timeout: Some(expression_timeout),
        capture_timeout: Some(resolved.capture_timeout),
        selection_timeout: resolved.selection_timeout,
        burst_interval: resolved.burst_interval,
        backoff: Backoff {
            base_delay: resolved.backoff_base,
            max_delay: resolved.backoff_max,
        },
        ..PipelineConfig::default()
    };

    EnrollSettings {
        pipeline,
        device: args
            .device
            .clone()
            .unwrap_or_else(|| resolved.video_device.clone()),
        pixel_format: args
            .pixel_format
            .clone()
            .unwrap_or_else(|| resolved.pixel_format.clone()),
        warmup_frames: args.warmup_frames.unwrap_or(resolved.warmup_frames),
        jitters: args.jitters.unwrap_or(resolved.jitters),
        landmark_model: args
            .landmark_model
            .clone()
            .or_else(|| resolved.landmark_model.clone()),
        encoder_model: args
            .encoder_model
            .clone()
            .or_else(|| resolved.encoder_model.clone()),
        capture_dir: args
            .capture_dir
            .clone()
            .unwrap_or_else(|| resolved.capture_dir.clone()),
        output: args.output.clone(),
    }
}

fn clamp_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
