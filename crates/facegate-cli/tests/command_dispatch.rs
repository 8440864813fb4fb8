use facegate_cli::cli::{Commands, EnrollArgs};
use facegate_cli::commands::{CommandHandler, DoctorHandler, EnrollHandler};

fn assert_dispatch<T: 'static>(command: Commands)
where
    T: CommandHandler,
{
    let handler: Box<dyn CommandHandler> = command.into();
    assert!(handler.as_any().is::<T>());
}

#[test]
fn enroll_command_dispatches_enroll_handler() {
    assert_dispatch::<EnrollHandler>(Commands::Enroll(EnrollArgs::default()));
}

#[test]
fn doctor_command_dispatches_doctor_handler() {
    assert_dispatch::<DoctorHandler>(Commands::Doctor);
}

#[test]
fn enroll_handler_keeps_its_arguments() {
    let args = EnrollArgs {
        device: Some("/dev/video2".into()),
        jitters: Some(3),
        ..EnrollArgs::default()
    };
    let handler: Box<dyn CommandHandler> = Commands::Enroll(args).into();
    let enroll = handler
        .as_any()
        .downcast_ref::<EnrollHandler>()
        .expect("enroll handler");
    assert_eq!(enroll.args().device.as_deref(), Some("/dev/video2"));
    assert_eq!(enroll.args().jitters, Some(3));
}
