use std::any::Any;
use std::process::ExitCode;

use crate::cli::{EnrollArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::enroll::{self, EnrollOutcome};
use crate::errors::AppResult;
use crate::output::render_enroll;

type RunFn = dyn Fn(&EnrollArgs, OutputMode) -> AppResult<EnrollOutcome> + Send + Sync;
type RenderFn = dyn Fn(&EnrollOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync;

pub struct EnrollHandler {
    args: EnrollArgs,
    run: Box<RunFn>,
    render: Box<RenderFn>,
}

impl EnrollHandler {
    pub fn new(args: EnrollArgs) -> Self {
        Self::with_dependencies(args, enroll::run_enroll, render_enroll)
    }

    pub fn with_dependencies(
        args: EnrollArgs,
        run: impl Fn(&EnrollArgs, OutputMode) -> AppResult<EnrollOutcome> + Send + Sync + 'static,
        render: impl Fn(&EnrollOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }

    pub fn args(&self) -> &EnrollArgs {
        &self.args
    }
}

impl CommandHandler for EnrollHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, mode)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
