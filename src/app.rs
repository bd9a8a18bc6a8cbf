use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::archive::{self, MemberSelector, Selection};
use crate::domain::{Candidate, Disposition, FailureKind, MemberKind, Source, TieBreak};
use crate::dwarf2json::ProfileTool;
use crate::error::GrabError;
use crate::listing;
use crate::mirror::MirrorClient;
use crate::policy::FailurePolicy;
use crate::store::{IntermediateGuard, ProfileState, Store};

#[derive(Debug, Clone, Default)]
pub struct GrabOptions {
    pub tie_break: TieBreak,
    /// Treat transport failures as retry-next-run instead of aborting.
    pub keep_going: bool,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrabResult {
    pub started_at: String,
    pub finished_at: String,
    pub sources: Vec<SourceReport>,
}

impl GrabResult {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.sources
            .iter()
            .flat_map(|source| &source.items)
            .filter(|item| item.outcome.status() == status)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub mirror: String,
    pub items: Vec<CandidateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub remote_file_name: String,
    pub release: String,
    pub architecture: String,
    pub destination: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Generated,
    AlreadyComplete,
    AlreadySkipped,
    Retry {
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<FailureKind>,
        message: String,
    },
    Skipped {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Generated,
    AlreadyComplete,
    AlreadySkipped,
    Retry,
    Skipped,
}

impl Outcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Outcome::Generated => OutcomeStatus::Generated,
            Outcome::AlreadyComplete => OutcomeStatus::AlreadyComplete,
            Outcome::AlreadySkipped => OutcomeStatus::AlreadySkipped,
            Outcome::Retry { .. } => OutcomeStatus::Retry,
            Outcome::Skipped { .. } => OutcomeStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub sources: Vec<ListSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSource {
    pub name: String,
    pub mirror: String,
    pub candidates: Vec<ListEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub remote_file_name: String,
    pub release: String,
    pub architecture: String,
    pub destination: String,
    pub state: ProfileState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Info,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Warning,
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sequential pipeline: source by source, candidate by candidate, each run
/// to completion before the next one starts.
pub struct App<M: MirrorClient, T: ProfileTool> {
    store: Store,
    mirror: M,
    tool: T,
    options: GrabOptions,
}

impl<M: MirrorClient, T: ProfileTool> App<M, T> {
    pub fn new(store: Store, mirror: M, tool: T, options: GrabOptions) -> Self {
        Self {
            store,
            mirror,
            tool,
            options,
        }
    }

    pub fn grab(
        &self,
        sources: &[Source],
        sink: &dyn ProgressSink,
    ) -> Result<GrabResult, GrabError> {
        let started_at = iso_timestamp();
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            reports.push(self.grab_source(source, sink)?);
        }
        Ok(GrabResult {
            started_at,
            finished_at: iso_timestamp(),
            sources: reports,
        })
    }

    pub fn list(
        &self,
        sources: &[Source],
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, GrabError> {
        let mut listed = Vec::with_capacity(sources.len());
        for source in sources {
            sink.event(ProgressEvent::info(format!(
                "source={}; fetching listing {}",
                source.name,
                source.mirror.listing_url()
            )));
            let mut entry = ListSource {
                name: source.name.to_string(),
                mirror: source.mirror.to_string(),
                candidates: Vec::new(),
                error: None,
            };
            match self.mirror.fetch_listing(&source.mirror) {
                Ok(page) => {
                    entry.candidates = listing::candidates(&page)
                        .map(|candidate| ListEntry {
                            destination: self.store.profile_path(&source.name, &candidate).to_string(),
                            state: self.store.profile_state(&source.name, &candidate),
                            remote_file_name: candidate.remote_file_name,
                            release: candidate.release,
                            architecture: candidate.architecture,
                        })
                        .collect();
                }
                Err(err) if self.isolates_listing_error(&err) => {
                    sink.event(ProgressEvent::warning(format!(
                        "source={}; listing failed: {err}",
                        source.name
                    )));
                    entry.error = Some(err.to_string());
                }
                Err(err) => return Err(err),
            }
            listed.push(entry);
        }
        Ok(ListResult { sources: listed })
    }

    /// A listing the mirror answered with an error status only fails its
    /// own source. Connection-level failures abort the run unless
    /// `keep_going` is set.
    fn isolates_listing_error(&self, err: &GrabError) -> bool {
        match err {
            GrabError::MirrorStatus { .. } => true,
            _ => self.options.keep_going && err.is_transport(),
        }
    }

    fn grab_source(
        &self,
        source: &Source,
        sink: &dyn ProgressSink,
    ) -> Result<SourceReport, GrabError> {
        sink.event(ProgressEvent::info(format!(
            "source={}; getting packages from {}",
            source.name, source.mirror
        )));
        self.store.ensure_source_dir(&source.name)?;

        let mut report = SourceReport {
            name: source.name.to_string(),
            mirror: source.mirror.to_string(),
            items: Vec::new(),
            error: None,
        };

        let page = match self.mirror.fetch_listing(&source.mirror) {
            Ok(page) => page,
            Err(err) if self.isolates_listing_error(&err) => {
                sink.event(ProgressEvent::warning(format!(
                    "source={}; listing failed: {err}",
                    source.name
                )));
                report.error = Some(err.to_string());
                return Ok(report);
            }
            Err(err) => return Err(err),
        };

        for candidate in listing::candidates(&page) {
            let outcome = self.process_candidate(source, &candidate, sink)?;
            report.items.push(CandidateReport {
                destination: self.store.profile_path(&source.name, &candidate).to_string(),
                remote_file_name: candidate.remote_file_name,
                release: candidate.release,
                architecture: candidate.architecture,
                outcome,
            });
        }
        Ok(report)
    }

    fn process_candidate(
        &self,
        source: &Source,
        candidate: &Candidate,
        sink: &dyn ProgressSink,
    ) -> Result<Outcome, GrabError> {
        let stem = candidate.local_stem();
        match self.store.profile_state(&source.name, candidate) {
            ProfileState::Complete => {
                sink.event(ProgressEvent::info(format!("{stem}.json.xz already exists")));
                return Ok(Outcome::AlreadyComplete);
            }
            ProfileState::Skipped => {
                sink.event(ProgressEvent::info(format!(
                    "{stem}.json.xz marked as skipped"
                )));
                return Ok(Outcome::AlreadySkipped);
            }
            ProfileState::Pending => {}
        }

        let start = Instant::now();
        match self.produce_profile(source, candidate, sink) {
            Ok(()) => {
                sink.event(ProgressEvent {
                    level: ProgressLevel::Info,
                    message: format!("created {stem}.json.xz"),
                    elapsed: Some(start.elapsed()),
                });
                Ok(Outcome::Generated)
            }
            Err(err) => self.resolve_failure(source, candidate, err, sink),
        }
    }

    fn resolve_failure(
        &self,
        source: &Source,
        candidate: &Candidate,
        err: GrabError,
        sink: &dyn ProgressSink,
    ) -> Result<Outcome, GrabError> {
        let message = err.to_string();
        let Some(kind) = err.failure_kind() else {
            if err.is_transport() && self.options.keep_going {
                sink.event(ProgressEvent::warning(format!(
                    "{candidate}: {message}; will retry next run"
                )));
                return Ok(Outcome::Retry {
                    kind: None,
                    message,
                });
            }
            return Err(err);
        };

        match self.options.failure_policy.disposition(kind) {
            Disposition::Retry => {
                sink.event(ProgressEvent::warning(format!(
                    "{candidate}: {message}; will retry next run"
                )));
                Ok(Outcome::Retry {
                    kind: Some(kind),
                    message,
                })
            }
            Disposition::Skip => {
                let destination = self.store.profile_path(&source.name, candidate);
                Store::write_sentinel(&destination)?;
                sink.event(ProgressEvent::warning(format!(
                    "{candidate}: {message}; marked as skipped"
                )));
                Ok(Outcome::Skipped { kind, message })
            }
        }
    }

    fn produce_profile(
        &self,
        source: &Source,
        candidate: &Candidate,
        sink: &dyn ProgressSink,
    ) -> Result<(), GrabError> {
        let elf = self.store.elf_path(&source.name, candidate).into_std_path_buf();
        let system_map = self
            .store
            .system_map_path(&source.name, candidate)
            .into_std_path_buf();
        let mut guard = IntermediateGuard::new([elf.clone(), system_map.clone()]);

        let targets = HashMap::from([
            (MemberKind::DebugBinary, elf.clone()),
            (MemberKind::SystemMap, system_map.clone()),
        ]);
        let selection = self.fetch_and_extract(
            source,
            &candidate.remote_file_name,
            &MemberKind::ALL,
            &targets,
            sink,
        )?;

        if selection.debug_binary.is_none() {
            return Err(GrabError::MissingDebugBinary(
                candidate.remote_file_name.clone(),
            ));
        }
        if selection.system_map.is_none() {
            self.resolve_system_map(source, candidate, &system_map, sink)?;
        }

        sink.event(ProgressEvent::info(format!(
            "creating {}.json.xz",
            candidate.local_stem()
        )));
        let profile = self.tool.generate(&elf, &system_map)?;
        let destination = self.store.profile_path(&source.name, candidate);
        Store::write_profile(&destination, &profile)?;
        guard.remove_now()
    }

    /// Look for the symbol map in the non-debug variant of the package.
    fn resolve_system_map(
        &self,
        source: &Source,
        candidate: &Candidate,
        system_map: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<(), GrabError> {
        let fallback = candidate.fallback_file_name();
        sink.event(ProgressEvent::warning(format!(
            "System.map not found in {candidate}; trying {fallback}"
        )));
        let targets = HashMap::from([(MemberKind::SystemMap, system_map.to_path_buf())]);
        match self.fetch_and_extract(source, &fallback, &[MemberKind::SystemMap], &targets, sink) {
            Ok(selection) if selection.system_map.is_some() => Ok(()),
            Ok(_) => Err(GrabError::MissingSystemMap(format!(
                "{candidate} (not in {fallback} either)"
            ))),
            Err(err) if err.failure_kind().is_some() => Err(GrabError::MissingSystemMap(
                format!("{candidate} ({fallback}: {err})"),
            )),
            Err(err) => Err(err),
        }
    }

    fn fetch_and_extract(
        &self,
        source: &Source,
        remote_file_name: &str,
        wanted: &[MemberKind],
        targets: &HashMap<MemberKind, PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<Selection, GrabError> {
        let package = self.store.package_tempfile(&source.name)?;

        sink.event(ProgressEvent::info(format!("downloading {remote_file_name}")));
        let start = Instant::now();
        self.mirror
            .download_package(&source.mirror, remote_file_name, package.path())?;
        sink.event(ProgressEvent {
            level: ProgressLevel::Info,
            message: format!("downloaded {remote_file_name}"),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent::info(format!("extracting {remote_file_name}")));
        let file = File::open(package.path())
            .map_err(|err| GrabError::Filesystem(format!("open {remote_file_name}: {err}")))?;
        let mut selector = MemberSelector::new(self.options.tie_break, wanted);
        archive::extract_members(BufReader::new(file), remote_file_name, &mut selector, targets)?;
        Ok(selector.into_selection())
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
