use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::{Builder, NamedTempFile};
use xz2::write::XzEncoder;

use crate::domain::{Candidate, SourceName};
use crate::error::GrabError;

/// xz preset used for persisted profiles.
pub const PROFILE_XZ_LEVEL: u32 = 6;

/// Mode of persisted profiles; temp files start out owner-only.
#[cfg(unix)]
pub const PROFILE_MODE: u32 = 0o644;

/// Completion state of a candidate, read off its destination file. The file's
/// existence is the only idempotency gate: nothing compares content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Pending,
    Complete,
    /// Zero-byte sentinel left by a permanent failure.
    Skipped,
}

impl ProfileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileState::Pending => "pending",
            ProfileState::Complete => "complete",
            ProfileState::Skipped => "skipped",
        }
    }
}

/// Output tree: one directory per source, holding
/// `{release}_{arch}.json.xz` plus the transient `_elf` / `_system_map` files.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn in_current_dir() -> Result<Self, GrabError> {
        let cwd = std::env::current_dir().map_err(|err| GrabError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| GrabError::Filesystem("invalid output path".to_string()))?;
        Ok(Self { root })
    }

    pub fn source_dir(&self, source: &SourceName) -> Utf8PathBuf {
        self.root.join(source.as_str())
    }

    pub fn ensure_source_dir(&self, source: &SourceName) -> Result<Utf8PathBuf, GrabError> {
        let dir = self.source_dir(source);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| GrabError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    pub fn profile_path(&self, source: &SourceName, candidate: &Candidate) -> Utf8PathBuf {
        self.source_dir(source)
            .join(format!("{}.json.xz", candidate.local_stem()))
    }

    pub fn elf_path(&self, source: &SourceName, candidate: &Candidate) -> Utf8PathBuf {
        self.source_dir(source)
            .join(format!("{}_elf", candidate.local_stem()))
    }

    pub fn system_map_path(&self, source: &SourceName, candidate: &Candidate) -> Utf8PathBuf {
        self.source_dir(source)
            .join(format!("{}_system_map", candidate.local_stem()))
    }

    pub fn profile_state(&self, source: &SourceName, candidate: &Candidate) -> ProfileState {
        match fs::metadata(self.profile_path(source, candidate).as_std_path()) {
            Ok(meta) if meta.len() == 0 => ProfileState::Skipped,
            Ok(_) => ProfileState::Complete,
            Err(_) => ProfileState::Pending,
        }
    }

    /// Scratch file for a downloaded package, removed when dropped.
    pub fn package_tempfile(&self, source: &SourceName) -> Result<NamedTempFile, GrabError> {
        let dir = self.ensure_source_dir(source)?;
        Builder::new()
            .prefix(".dbgsym-grab-")
            .suffix(".deb")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| GrabError::Filesystem(err.to_string()))
    }

    /// Mark a candidate as permanently skipped.
    pub fn write_sentinel(path: &Utf8Path) -> Result<(), GrabError> {
        Self::write_bytes_atomic(path, &[])
    }

    /// xz-compress `profile` into `path`. The bytes land in a temporary file
    /// first so the destination never exists half-written.
    pub fn write_profile(path: &Utf8Path, profile: &[u8]) -> Result<(), GrabError> {
        let parent = path
            .parent()
            .ok_or_else(|| GrabError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = Builder::new()
            .prefix(".dbgsym-grab-profile")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        let mut encoder = XzEncoder::new(temp.as_file_mut(), PROFILE_XZ_LEVEL);
        encoder
            .write_all(profile)
            .map_err(|err| GrabError::Filesystem(format!("compress {path}: {err}")))?;
        encoder
            .finish()
            .map_err(|err| GrabError::Filesystem(format!("compress {path}: {err}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(PROFILE_MODE))
                .map_err(|err| GrabError::Filesystem(format!("chmod {path}: {err}")))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GrabError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Removes a candidate's intermediate files when dropped, whichever way
/// processing of that candidate ends.
#[derive(Debug)]
pub struct IntermediateGuard {
    paths: Vec<PathBuf>,
}

impl IntermediateGuard {
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn remove_now(&mut self) -> Result<(), GrabError> {
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(GrabError::Filesystem(format!(
                        "remove {}: {err}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Drop for IntermediateGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}
