use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::FailureKind;

#[derive(Debug, Error, Diagnostic)]
pub enum GrabError {
    #[error("invalid source name: {0}")]
    InvalidSourceName(String),

    #[error("invalid mirror url: {0}")]
    InvalidMirrorUrl(String),

    #[error("invalid source entry (expected name=url): {0}")]
    InvalidSourceEntry(String),

    #[error("invalid failure kind: {0}")]
    InvalidFailureKind(String),

    #[error("invalid disposition: {0}")]
    InvalidDisposition(String),

    #[error("invalid tie-break policy: {0}")]
    InvalidTieBreak(String),

    #[error("no sources configured")]
    NoSources,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("mirror request failed: {0}")]
    MirrorHttp(String),

    #[error("mirror returned status {status} for {url}")]
    MirrorStatus { status: u16, url: String },

    #[error("not a package archive: {0}")]
    UnreadablePackage(String),

    #[error("data.tar member not found in {0}")]
    MissingDataArchive(String),

    #[error("failed to read data archive: {0}")]
    UnreadableDataArchive(String),

    #[error("vmlinux member not found in {0}")]
    MissingDebugBinary(String),

    #[error("System.map member not found for {0}")]
    MissingSystemMap(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("profile tool failed: {0}")]
    ToolFailed(String),

    #[error("profile tool produced an invalid profile: {0}")]
    InvalidProfile(String),
}

impl GrabError {
    /// Candidate-level failures, i.e. the ones the decision table can
    /// resolve to retry or skip. Everything else aborts the run.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            GrabError::MirrorStatus { .. } => Some(FailureKind::PackageUnavailable),
            GrabError::UnreadablePackage(_) => Some(FailureKind::UnreadablePackage),
            GrabError::MissingDataArchive(_) => Some(FailureKind::MissingDataArchive),
            GrabError::UnreadableDataArchive(_) => Some(FailureKind::UnreadableDataArchive),
            GrabError::MissingDebugBinary(_) => Some(FailureKind::MissingDebugBinary),
            GrabError::MissingSystemMap(_) => Some(FailureKind::MissingSystemMap),
            GrabError::ToolFailed(_) => Some(FailureKind::ToolFailed),
            GrabError::InvalidProfile(_) => Some(FailureKind::InvalidProfile),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, GrabError::MirrorHttp(_))
    }
}
