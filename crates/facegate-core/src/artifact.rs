//! Versioned record of a finished enrollment, handed to whatever performs
//! identity matching downstream.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::detector::Embedding;
use crate::errors::{AppError, AppResult};
use crate::extractor::validate_pair;

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentArtifact {
    pub version: u32,
    pub session_id: Uuid,
    /// RFC 3339, UTC.
    pub created_at: String,
    /// Capture ids the embeddings came from, in capture order. The order a user
    /// toggled them in is not kept.
    pub sources: [String; 2],
    pub embeddings: [Embedding; 2],
}

impl EnrollmentArtifact {
    pub fn new(session_id: Uuid, sources: [String; 2], embeddings: [Embedding; 2]) -> AppResult<Self> {
        let artifact = Self {
            version: ARTIFACT_VERSION,
            session_id,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            sources,
            embeddings,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(AppError::InvalidArtifact(format!(
                "unsupported artifact version {} (expected {ARTIFACT_VERSION})",
                self.version
            )));
        }
        if self.sources[0] == self.sources[1] {
            return Err(AppError::InvalidArtifact(format!(
                "both embeddings come from {}",
                self.sources[0]
            )));
        }
        validate_pair(&self.embeddings).map_err(AppError::InvalidArtifact)
    }

    pub fn dimensions(&self) -> usize {
        self.embeddings[0].len()
    }

    pub fn to_json_pretty(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Writes the artifact atomically with owner-only permissions.
pub fn write_artifact(artifact: &EnrollmentArtifact, path: &Path) -> AppResult<()> {
    artifact.validate()?;
    let write_err = |source| AppError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, artifact)?;
        writer.write_all(b"\n").map_err(write_err)?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    let file = tmp.persist(path).map_err(|err| write_err(err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}

pub fn load_artifact(path: &Path) -> AppResult<EnrollmentArtifact> {
    let data = fs::read(path).map_err(|source| AppError::ArtifactRead {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: EnrollmentArtifact = serde_json::from_slice(&data)
        .map_err(|err| AppError::InvalidArtifact(format!("{}: {err}", path.display())))?;
    artifact.validate()?;
    Ok(artifact)
}
