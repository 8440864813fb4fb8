use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use facegate_config::{ConfigError, ResolvedConfig, ResolvedConfigWithSource};
use facegate_core::capture::DeviceLocator;
use serde::Serialize;

use crate::errors::{AppError, AppResult};

pub const CHECK_CONFIG: &str = "config";
pub const CHECK_VIDEO_DEVICE: &str = "video_device";
pub const CHECK_LANDMARK_MODEL: &str = "landmark_model";
pub const CHECK_ENCODER_MODEL: &str = "encoder_model";
pub const CHECK_CAPTURE_DIR: &str = "capture_dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            path: None,
            device: None,
        }
    }

    fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }
}

/// `ok` holds unless some check failed; warnings are advisory.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorOutcome {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

pub trait DeviceOpener {
    fn open(&self, locator: &DeviceLocator) -> AppResult<()>;
}

#[derive(Clone, Copy)]
pub struct RealDeviceOpener;

impl DeviceOpener for RealDeviceOpener {
    #[cfg(feature = "camera")]
    fn open(&self, locator: &DeviceLocator) -> AppResult<()> {
        facegate_core::capture::check_device(locator)
    }

    #[cfg(not(feature = "camera"))]
    fn open(&self, _locator: &DeviceLocator) -> AppResult<()> {
        Err(AppError::BackendUnavailable {
            backend: "camera",
            feature: "camera",
        })
    }
}

pub struct DoctorContext<D> {
    pub config_paths: Vec<PathBuf>,
    pub device_opener: D,
}

impl Default for DoctorContext<RealDeviceOpener> {
    fn default() -> Self {
        Self {
            config_paths: facegate_config::default_paths().to_vec(),
            device_opener: RealDeviceOpener,
        }
    }
}

pub fn run_doctor() -> AppResult<DoctorOutcome> {
    run_doctor_with(&DoctorContext::default())
}

pub fn run_doctor_with<D: DeviceOpener>(ctx: &DoctorContext<D>) -> AppResult<DoctorOutcome> {
    let (config_check, resolved) = check_config(&ctx.config_paths);

    let checks = vec![
        config_check,
        check_video_device(&resolved, &ctx.device_opener),
        check_model(
            CHECK_LANDMARK_MODEL,
            "landmark_model",
            resolved.resolved.landmark_model.as_deref(),
        ),
        check_model(
            CHECK_ENCODER_MODEL,
            "encoder_model",
            resolved.resolved.encoder_model.as_deref(),
        ),
        check_capture_dir(&resolved.resolved.capture_dir),
    ];

    let ok = checks.iter().all(|c| c.status != CheckStatus::Fail);
    Ok(DoctorOutcome { ok, checks })
}

fn check_config(paths: &[PathBuf]) -> (DoctorCheck, ResolvedConfigWithSource) {
    let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
    let fallback = || ResolvedConfigWithSource {
        resolved: ResolvedConfig::default(),
        source: None,
    };

    match facegate_config::load_from_paths(paths) {
        Ok(Some(entry)) => {
            let check = if existing.len() > 1 {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Warn,
                    format!(
                        "Several config files exist; using {} and ignoring the rest",
                        entry.source().display()
                    ),
                )
            } else {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Pass,
                    format!("Loaded config from {}", entry.source().display()),
                )
            };
            let check = check.with_path(entry.source());
            let resolved = ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.contents.clone()),
                source: Some(entry.source.clone()),
            };
            (check, resolved)
        }
        Ok(None) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Warn,
                format!(
                    "No config file found; using built-in defaults (tried {})",
                    display_paths(paths)
                ),
            ),
            fallback(),
        ),
        Err(err) => {
            let message = match &err {
                ConfigError::Parse { path, message } => {
                    format!("Failed to parse {}: {}", path.display(), message)
                }
                ConfigError::Read { path, source } => {
                    format!("Failed to read {}: {}", path.display(), source)
                }
            };
            (
                DoctorCheck::new(CHECK_CONFIG, CheckStatus::Fail, message).with_path(err.path()),
                fallback(),
            )
        }
    }
}

fn check_video_device<D: DeviceOpener>(cfg: &ResolvedConfigWithSource, opener: &D) -> DoctorCheck {
    let locator = DeviceLocator::from_option(Some(cfg.resolved.video_device.clone()));
    let display = locator.display();

    let mut check = match opener.open(&locator) {
        Ok(()) => DoctorCheck::new(
            CHECK_VIDEO_DEVICE,
            CheckStatus::Pass,
            format!("Opened video device {display}"),
        ),
        Err(err @ AppError::BackendUnavailable { .. }) => {
            DoctorCheck::new(CHECK_VIDEO_DEVICE, CheckStatus::Warn, err.human_message())
        }
        Err(err) => DoctorCheck::new(CHECK_VIDEO_DEVICE, CheckStatus::Fail, err.human_message()),
    };
    check.device = Some(display);
    check
}

fn check_model(name: &str, key: &str, path: Option<&Path>) -> DoctorCheck {
    match path {
        None => DoctorCheck::new(
            name,
            CheckStatus::Warn,
            format!("Model path not configured; set {key} or pass --{}", key.replace('_', "-")),
        ),
        Some(p) => match fs::File::open(p) {
            Ok(_) => DoctorCheck::new(
                name,
                CheckStatus::Pass,
                format!("Found model at {}", p.display()),
            )
            .with_path(p),
            Err(err) => DoctorCheck::new(
                name,
                CheckStatus::Fail,
                format!("Cannot read model {}: {}", p.display(), err),
            )
            .with_path(p),
        },
    }
}

fn check_capture_dir(path: &Path) -> DoctorCheck {
    let check = match fs::metadata(path) {
        Err(_) => DoctorCheck::new(
            CHECK_CAPTURE_DIR,
            CheckStatus::Warn,
            format!("Capture directory {} will be created on first enrollment", path.display()),
        ),
        Ok(meta) if !meta.is_dir() => DoctorCheck::new(
            CHECK_CAPTURE_DIR,
            CheckStatus::Fail,
            format!("Capture directory {} is not a directory", path.display()),
        ),
        Ok(_) if !is_writeable_dir(path) => DoctorCheck::new(
            CHECK_CAPTURE_DIR,
            CheckStatus::Fail,
            format!("Capture directory {} is not writable", path.display()),
        ),
        Ok(_) => DoctorCheck::new(
            CHECK_CAPTURE_DIR,
            CheckStatus::Pass,
            format!("Capture directory {} is writable", path.display()),
        ),
    };
    check.with_path(path)
}

/// Asks the kernel whether the current user may create files in `path`.
fn is_writeable_dir(path: &Path) -> bool {
    if let Ok(metadata) = fs::metadata(path) {
        if metadata.permissions().readonly() {
            return false;
        }
    }

    let c_path = match CString::new(path.as_os_str().as_bytes()) {
        Ok(c) => c,
        Err(_) => return false,
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the whole call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io;
    use tempfile::tempdir;

    struct StubDeviceOpener {
        ok: bool,
    }

    impl DeviceOpener for StubDeviceOpener {
        fn open(&self, locator: &DeviceLocator) -> AppResult<()> {
            if self.ok {
                Ok(())
            } else {
                Err(AppError::DeviceOpen {
                    device: locator.display(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                })
            }
        }
    }

    fn write_fixtures(tmp: &Path) {
        fs::create_dir_all(tmp.join("captures")).unwrap();
        File::create(tmp.join("landmark.dat")).unwrap();
        File::create(tmp.join("encoder.dat")).unwrap();
        fs::write(
            tmp.join("config.toml"),
            format!(
                "video_device = \"{}\"\nlandmark_model = \"{}\"\nencoder_model = \"{}\"\ncapture_dir = \"{}\"\n",
                tmp.join("video0").display(),
                tmp.join("landmark.dat").display(),
                tmp.join("encoder.dat").display(),
                tmp.join("captures").display()
            ),
        )
        .unwrap();
    }

    fn doctor_with(tmp: &Path, device_ok: bool) -> DoctorOutcome {
        let ctx = DoctorContext {
            config_paths: vec![tmp.join("config.toml")],
            device_opener: StubDeviceOpener { ok: device_ok },
        };
        run_doctor_with(&ctx).unwrap()
    }

    fn status<'a>(checks: &'a [DoctorCheck], name: &str) -> &'a DoctorCheck {
        checks
            .iter()
            .find(|c| c.name == name)
            .expect("check present")
    }

    #[test]
    fn doctor_success_when_all_checks_pass() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());

        let outcome = doctor_with(tmp.path(), true);

        assert!(outcome.ok, "statuses: {:?}", outcome.checks);
        assert!(outcome.checks.iter().all(|c| c.status == CheckStatus::Pass));
        assert_eq!(
            status(&outcome.checks, CHECK_VIDEO_DEVICE).device.as_deref(),
            Some(tmp.path().join("video0").display().to_string().as_str())
        );
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let tmp = tempdir().unwrap();

        let outcome = doctor_with(tmp.path(), true);

        assert_eq!(status(&outcome.checks, CHECK_CONFIG).status, CheckStatus::Warn);
        assert_eq!(
            status(&outcome.checks, CHECK_LANDMARK_MODEL).status,
            CheckStatus::Warn
        );
        assert_eq!(
            status(&outcome.checks, CHECK_CAPTURE_DIR).path.as_deref(),
            Some(facegate_config::DEFAULT_CAPTURE_DIR)
        );
    }

    #[test]
    fn doctor_reports_parse_error() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("config.toml"), "capture_dir = { invalid = true }").unwrap();

        let outcome = doctor_with(tmp.path(), true);

        let check = status(&outcome.checks, CHECK_CONFIG);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.message.starts_with("Failed to parse"));
        assert!(!outcome.ok);
    }

    #[test]
    fn doctor_reports_missing_device() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());

        let outcome = doctor_with(tmp.path(), false);

        assert_eq!(
            status(&outcome.checks, CHECK_VIDEO_DEVICE).status,
            CheckStatus::Fail
        );
        assert!(!outcome.ok);
    }

    #[test]
    fn doctor_reports_unreadable_model() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        fs::remove_file(tmp.path().join("encoder.dat")).unwrap();

        let outcome = doctor_with(tmp.path(), true);

        assert_eq!(
            status(&outcome.checks, CHECK_ENCODER_MODEL).status,
            CheckStatus::Fail
        );
        assert_eq!(
            status(&outcome.checks, CHECK_LANDMARK_MODEL).status,
            CheckStatus::Pass
        );
        assert!(!outcome.ok);
    }

    fn running_as_root() -> bool {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() == 0 }
    }

    #[test]
    fn capture_dir_without_write_permission_fails() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            // root bypasses directory permission bits.
            return;
        }
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        let captures = tmp.path().join("captures");
        // Owner cannot create entries, but the group write bit keeps
        // readonly() false.
        fs::set_permissions(&captures, fs::Permissions::from_mode(0o575)).unwrap();

        let outcome = doctor_with(tmp.path(), true);
        fs::set_permissions(&captures, fs::Permissions::from_mode(0o755)).unwrap();

        let check = status(&outcome.checks, CHECK_CAPTURE_DIR);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.message.ends_with("is not writable"));
        assert!(!outcome.ok);
    }

    #[test]
    fn writeable_dir_check_follows_access() {
        let tmp = tempdir().unwrap();
        assert!(is_writeable_dir(tmp.path()));
        assert!(!is_writeable_dir(&tmp.path().join("missing")));
    }

    #[test]
    fn capture_dir_that_is_a_file_fails() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        fs::remove_dir(tmp.path().join("captures")).unwrap();
        File::create(tmp.path().join("captures")).unwrap();

        let outcome = doctor_with(tmp.path(), true);

        assert_eq!(
            status(&outcome.checks, CHECK_CAPTURE_DIR).status,
            CheckStatus::Fail
        );
    }
}
