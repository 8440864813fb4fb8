use facegate_config::ConfigError;

pub use facegate_core::errors::{AppError, AppResult};

pub fn config_error(err: ConfigError) -> AppError {
    match err {
        ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
        ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
    }
}
