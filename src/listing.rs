use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Candidate, DebugMarker};

static PACKAGE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"href="(?P<remote_file_name>linux-image-(?P<release>\d+\.\d+\.\d+-[^"]+)-dbg(?P<sym>sym)?_[^"]+_(?P<architecture>[^"]+)\.d?deb)""#,
    )
    .expect("package href pattern compiles")
});

/// Lazily extract debug-package candidates from a directory listing page,
/// in document order. A file name listed twice is reported once.
pub fn candidates(listing: &str) -> impl Iterator<Item = Candidate> + '_ {
    let mut seen = HashSet::new();
    PACKAGE_HREF
        .captures_iter(listing)
        .filter_map(|caps| {
            Some(Candidate {
                remote_file_name: caps.name("remote_file_name")?.as_str().to_string(),
                release: caps.name("release")?.as_str().to_string(),
                architecture: caps.name("architecture")?.as_str().to_string(),
                marker: if caps.name("sym").is_some() {
                    DebugMarker::DbgSym
                } else {
                    DebugMarker::Dbg
                },
            })
        })
        .filter(move |candidate| seen.insert(candidate.remote_file_name.clone()))
}
