use std::error::Error;
use std::io::{self, Write};

use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::doctor::{CheckStatus, DoctorOutcome};
use crate::enroll::EnrollOutcome;
use crate::errors::{AppError, AppResult};

pub fn render_enroll(outcome: &EnrollOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    let artifact = &outcome.artifact;
    match mode {
        OutputMode::Human => {
            println!(
                "Enrollment successful: {} and {} ({} dimensions)",
                artifact.sources[0],
                artifact.sources[1],
                artifact.dimensions()
            );
            if verbose {
                tracing::info!(
                    session_id = %artifact.session_id,
                    capture_dir = %outcome.capture_dir.display(),
                    "burst images kept for review"
                );
            }
            match &outcome.output_path {
                Some(path) => println!("Artifact written to {}", path.display()),
                None => println!("{}", artifact.to_json_pretty()?),
            }
        }
        OutputMode::Json => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let payload = serde_json::to_string(&enroll_json_payload(outcome))?;
            handle.write_all(payload.as_bytes())?;
            handle.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn enroll_json_payload(outcome: &EnrollOutcome) -> Value {
    json!({
        "success": true,
        "artifact": outcome.artifact,
        "output_path": outcome.output_path.as_ref().map(|p| p.display().to_string()),
        "capture_dir": outcome.capture_dir.display().to_string(),
    })
}

pub fn render_doctor(outcome: &DoctorOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for check in &outcome.checks {
                let tag = match check.status {
                    CheckStatus::Pass => "PASS",
                    CheckStatus::Warn => "WARN",
                    CheckStatus::Fail => "FAIL",
                };
                println!("[{tag}] {}: {}", check.name, check.message);
            }
            if outcome.ok {
                println!("All checks passed");
            } else {
                println!("Some checks failed");
            }
        }
        OutputMode::Json => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let payload = serde_json::to_string(outcome)?;
            handle.write_all(payload.as_bytes())?;
            handle.write_all(b"\n")?;
        }
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = error_json_payload(err);
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
        }
    }
}

fn error_json_payload(err: &AppError) -> Value {
    let mut payload = json!({
        "success": false,
        "error": err.human_message(),
    });
    match err {
        AppError::StageTimeout { stage, .. } | AppError::Cancelled { stage } => {
            payload["stage"] = json!(stage);
        }
        AppError::EmbeddingExtraction { image_id, .. } => {
            payload["image_id"] = json!(image_id);
        }
        AppError::ModelLoad { capability, .. } => {
            payload["capability"] = json!(capability);
        }
        _ => {}
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::artifact::EnrollmentArtifact;
    use facegate_core::detector::Embedding;
    use facegate_core::session::Stage;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn sample_outcome() -> EnrollOutcome {
        let artifact = EnrollmentArtifact::new(
            Uuid::new_v4(),
            ["neutral_1".into(), "happy_2".into()],
            [
                Embedding::new(vec![0.1, 0.2, 0.3]),
                Embedding::new(vec![0.4, 0.5, 0.6]),
            ],
        )
        .unwrap();
        EnrollOutcome {
            artifact,
            output_path: Some(PathBuf::from("out/enroll.json")),
            capture_dir: PathBuf::from("captures/enroll"),
        }
    }

    #[test]
    fn enroll_json_includes_artifact_and_paths() {
        let payload = enroll_json_payload(&sample_outcome());

        assert_eq!(payload["success"], true);
        assert_eq!(payload["output_path"], "out/enroll.json");
        assert_eq!(payload["capture_dir"], "captures/enroll");
        assert_eq!(payload["artifact"]["version"], 1);
        assert_eq!(payload["artifact"]["sources"][1], "happy_2");
        assert_eq!(
            payload["artifact"]["embeddings"][0].as_array().unwrap().len(),
            3
        );
    }

    #[test]
    fn error_json_names_failing_stage() {
        let payload = error_json_payload(&AppError::StageTimeout {
            stage: Stage::Expression,
            elapsed: Duration::from_secs(60),
        });
        assert_eq!(payload["success"], false);
        assert_eq!(payload["stage"], "expression");

        let payload = error_json_payload(&AppError::EmbeddingExtraction {
            image_id: "happy_0".into(),
            message: "no face".into(),
        });
        assert_eq!(payload["image_id"], "happy_0");
    }
}
