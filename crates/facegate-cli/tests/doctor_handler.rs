use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facegate_cli::cli::OutputMode;
use facegate_cli::commands::{CommandHandler, DoctorHandler};
use facegate_cli::doctor::{CheckStatus, DoctorCheck, DoctorOutcome};
use facegate_cli::errors::AppError;

fn sample_outcome(status: CheckStatus) -> DoctorOutcome {
    DoctorOutcome {
        ok: status != CheckStatus::Fail,
        checks: vec![DoctorCheck {
            name: "video_device".into(),
            status,
            message: "msg".into(),
            path: None,
            device: Some("/dev/video0".into()),
        }],
    }
}

#[test]
fn doctor_handler_uses_render_and_exit_code() {
    let renders = Arc::new(Mutex::new(Vec::new()));
    let handler = DoctorHandler::with_dependencies(|| Ok(sample_outcome(CheckStatus::Fail)), {
        let renders = Arc::clone(&renders);
        move |_outcome, mode| {
            renders.lock().unwrap().push(mode);
            Ok(())
        }
    });

    let code = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(code, ExitCode::from(1));
    assert_eq!(*renders.lock().unwrap(), vec![OutputMode::Json]);
}

#[test]
fn warnings_do_not_fail_doctor() {
    let handler = DoctorHandler::with_dependencies(
        || Ok(sample_outcome(CheckStatus::Warn)),
        |_outcome, _mode| Ok(()),
    );

    let code = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
}

#[test]
fn doctor_handler_propagates_errors() {
    let handler = DoctorHandler::with_dependencies(
        || Err(AppError::Capability("boom".into())),
        |_outcome, _mode| Ok(()),
    );

    let err = handler.execute(OutputMode::Json, false).unwrap_err();
    match err {
        AppError::Capability(message) => assert_eq!(message, "boom"),
        other => panic!("unexpected error: {other}"),
    }
}
