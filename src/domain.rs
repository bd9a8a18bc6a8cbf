use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GrabError;

/// Directory under the mirror root that holds the kernel packages.
pub const POOL_PATH: &str = "pool/main/l/linux/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceName(String);

impl SourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceName {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        // Used verbatim as a directory name under the output root.
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && normalized != ".."
            && !normalized.contains(['/', '\\']);
        if !is_valid {
            return Err(GrabError::InvalidSourceName(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MirrorUrl(String);

impl MirrorUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn listing_url(&self) -> String {
        format!("{}/{POOL_PATH}", self.0)
    }

    pub fn package_url(&self, remote_file_name: &str) -> String {
        format!("{}/{POOL_PATH}{remote_file_name}", self.0)
    }
}

impl fmt::Display for MirrorUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MirrorUrl {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let has_scheme = trimmed.starts_with("https://") || trimmed.starts_with("http://");
        let normalized = trimmed.trim_end_matches('/');
        if !has_scheme || normalized.ends_with(':') || normalized.ends_with("//") {
            return Err(GrabError::InvalidMirrorUrl(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// One configured mirror, processed as an independent unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: SourceName,
    pub mirror: MirrorUrl,
}

impl FromStr for Source {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, mirror) = value
            .split_once('=')
            .ok_or_else(|| GrabError::InvalidSourceEntry(value.to_string()))?;
        Ok(Source {
            name: name.parse()?,
            mirror: mirror.parse()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugMarker {
    Dbg,
    DbgSym,
}

impl DebugMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugMarker::Dbg => "-dbg",
            DebugMarker::DbgSym => "-dbgsym",
        }
    }
}

/// A debug package discovered in a mirror listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub remote_file_name: String,
    pub release: String,
    pub architecture: String,
    pub marker: DebugMarker,
}

impl Candidate {
    /// `{release}_{arch}`, the stem shared by the profile and its intermediates.
    pub fn local_stem(&self) -> String {
        format!("{}_{}", self.release, self.architecture)
    }

    /// Name of the matching non-debug package, which usually carries the
    /// System.map the debug package lacks.
    pub fn fallback_file_name(&self) -> String {
        let tagged = format!("{}{}", self.release, self.marker.as_str());
        let name = self
            .remote_file_name
            .replacen(&tagged, &self.release, 1);
        match name.strip_suffix(".ddeb") {
            Some(stem) => format!("{stem}.deb"),
            None => name,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote_file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    DebugBinary,
    SystemMap,
}

impl MemberKind {
    pub const ALL: [MemberKind; 2] = [MemberKind::DebugBinary, MemberKind::SystemMap];

    /// Classify an inner archive member by the last segment of its path.
    pub fn classify(path: &str) -> Option<MemberKind> {
        let basename = path.rsplit('/').next().unwrap_or(path);
        if basename.starts_with("vmlinux") {
            Some(MemberKind::DebugBinary)
        } else if basename.starts_with("System.map") {
            Some(MemberKind::SystemMap)
        } else {
            None
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::DebugBinary => write!(f, "vmlinux"),
            MemberKind::SystemMap => write!(f, "System.map"),
        }
    }
}

/// Which member wins when several names match the same kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    First,
    #[default]
    Last,
}

impl FromStr for TieBreak {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "first" => Ok(TieBreak::First),
            "last" => Ok(TieBreak::Last),
            _ => Err(GrabError::InvalidTieBreak(value.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PackageUnavailable,
    UnreadablePackage,
    MissingDataArchive,
    UnreadableDataArchive,
    MissingDebugBinary,
    MissingSystemMap,
    ToolFailed,
    InvalidProfile,
}

impl FailureKind {
    pub const ALL: [FailureKind; 8] = [
        FailureKind::PackageUnavailable,
        FailureKind::UnreadablePackage,
        FailureKind::MissingDataArchive,
        FailureKind::UnreadableDataArchive,
        FailureKind::MissingDebugBinary,
        FailureKind::MissingSystemMap,
        FailureKind::ToolFailed,
        FailureKind::InvalidProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PackageUnavailable => "package_unavailable",
            FailureKind::UnreadablePackage => "unreadable_package",
            FailureKind::MissingDataArchive => "missing_data_archive",
            FailureKind::UnreadableDataArchive => "unreadable_data_archive",
            FailureKind::MissingDebugBinary => "missing_debug_binary",
            FailureKind::MissingSystemMap => "missing_system_map",
            FailureKind::ToolFailed => "tool_failed",
            FailureKind::InvalidProfile => "invalid_profile",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| GrabError::InvalidFailureKind(value.to_string()))
    }
}

/// What a failed candidate leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// No destination file; the next run tries again.
    Retry,
    /// A zero-byte sentinel marks the candidate as permanently skipped.
    Skip,
}

impl FromStr for Disposition {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "retry" => Ok(Disposition::Retry),
            "skip" => Ok(Disposition::Skip),
            _ => Err(GrabError::InvalidDisposition(value.to_string())),
        }
    }
}
