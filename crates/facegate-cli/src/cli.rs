use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    version,
    about = "Liveness-checked face enrollment from a V4L2 camera"
)]
pub struct Cli {
    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the head-turn and expression checks, then extract two embeddings.
    Enroll(EnrollArgs),
    /// Check configuration, camera and model paths.
    Doctor,
}

#[derive(Debug, Clone, Default, Args)]
pub struct EnrollArgs {
    /// Device index or path (defaults to the configured video_device).
    #[arg(long)]
    pub device: Option<String>,

    /// FourCC pixel format, e.g. YUYV or GREY.
    #[arg(long)]
    pub pixel_format: Option<String>,

    #[arg(long)]
    pub warmup_frames: Option<u32>,

    /// dlib 68-point shape predictor weights.
    #[arg(long)]
    pub landmark_model: Option<PathBuf>,

    /// dlib face recognition network weights.
    #[arg(long)]
    pub encoder_model: Option<PathBuf>,

    #[arg(long)]
    pub jitters: Option<u32>,

    /// Directory the burst images are written to for review.
    #[arg(long)]
    pub capture_dir: Option<PathBuf>,

    /// Write the enrollment artifact to this path.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub direction_timeout_secs: Option<u64>,

    /// Applies to each expression prompt separately.
    #[arg(long)]
    pub expression_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enroll_flags_parse() {
        let cli = Cli::try_parse_from([
            "facegate",
            "--json",
            "-vv",
            "enroll",
            "--device",
            "2",
            "--output",
            "/tmp/enroll.json",
            "--expression-timeout-secs",
            "15",
        ])
        .unwrap();

        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Enroll(args) => {
                assert_eq!(args.device.as_deref(), Some("2"));
                assert_eq!(args.output, Some(PathBuf::from("/tmp/enroll.json")));
                assert_eq!(args.expression_timeout_secs, Some(15));
                assert!(args.direction_timeout_secs.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["facegate", "doctor", "--json"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert!(matches!(cli.command, Commands::Doctor));
    }
}
