use std::collections::BTreeMap;

use crate::domain::{Disposition, FailureKind};

/// Decision table mapping each candidate-level failure to what it leaves
/// on disk. Transport and filesystem errors are not listed: they abort the
/// run (or, with keep-going, behave like `Retry`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    table: BTreeMap<FailureKind, Disposition>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        let table = FailureKind::ALL
            .into_iter()
            .map(|kind| (kind, default_disposition(kind)))
            .collect();
        Self { table }
    }
}

impl FailurePolicy {
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (FailureKind, Disposition)>,
    {
        let mut policy = Self::default();
        policy.table.extend(overrides);
        policy
    }

    pub fn disposition(&self, kind: FailureKind) -> Disposition {
        self.table
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_disposition(kind))
    }
}

fn default_disposition(kind: FailureKind) -> Disposition {
    match kind {
        // Raised only after both packages were searched.
        FailureKind::MissingSystemMap => Disposition::Skip,
        FailureKind::PackageUnavailable
        | FailureKind::UnreadablePackage
        | FailureKind::MissingDataArchive
        | FailureKind::UnreadableDataArchive
        | FailureKind::MissingDebugBinary
        | FailureKind::ToolFailed
        | FailureKind::InvalidProfile => Disposition::Retry,
    }
}
