use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Disposition, FailureKind, Source, TieBreak};
use crate::dwarf2json::DEFAULT_TOOL;
use crate::error::GrabError;
use crate::policy::FailurePolicy;

pub const CONFIG_FILE: &str = "dbgsym-grab.json";

/// Sources processed when nothing else is configured. UK mirrors.
pub const DEFAULT_SOURCES: [(&str, &str); 2] = [
    ("kali", "https://kali.download/kali/"),
    ("debian", "https://mirror.bytemark.co.uk/debian/"),
];

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub tie_break: Option<TieBreak>,
    #[serde(default)]
    pub keep_going: Option<bool>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sources: Option<Vec<SourceEntry>>,
    #[serde(default)]
    pub failure_policy: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Shorthand(String),
    Detailed(SourceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceEntryObject {
    pub name: String,
    pub mirror: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub output_dir: Option<Utf8PathBuf>,
    pub tool: String,
    pub tie_break: TieBreak,
    pub keep_going: bool,
    pub request_timeout: Option<Duration>,
    pub sources: Vec<Source>,
    pub failure_policy: FailurePolicy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `dbgsym-grab.json` from the current directory when it
    /// exists, or fall back to the built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GrabError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GrabError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GrabError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GrabError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let sources = match config.sources {
            None => default_sources()?,
            Some(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    SourceEntry::Shorthand(value) => value.parse(),
                    SourceEntry::Detailed(obj) => Ok(Source {
                        name: obj.name.parse()?,
                        mirror: obj.mirror.parse()?,
                    }),
                })
                .collect::<Result<Vec<_>, GrabError>>()?,
        };

        let overrides = config
            .failure_policy
            .iter()
            .map(|(kind, disposition)| {
                Ok((kind.parse::<FailureKind>()?, disposition.parse::<Disposition>()?))
            })
            .collect::<Result<Vec<_>, GrabError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            output_dir: config.output_dir.map(Utf8PathBuf::from),
            tool: config.tool.unwrap_or_else(|| DEFAULT_TOOL.to_string()),
            tie_break: config.tie_break.unwrap_or_default(),
            keep_going: config.keep_going.unwrap_or(false),
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            sources,
            failure_policy: FailurePolicy::with_overrides(overrides),
        })
    }
}

impl ResolvedConfig {
    /// Sources for this run: `overrides` (`name=url` each) when any are
    /// given, the configured list otherwise. An empty result is an error.
    pub fn effective_sources(&self, overrides: &[String]) -> Result<Vec<Source>, GrabError> {
        let sources = if overrides.is_empty() {
            self.sources.clone()
        } else {
            overrides
                .iter()
                .map(|value| value.parse::<Source>())
                .collect::<Result<Vec<_>, GrabError>>()?
        };
        if sources.is_empty() {
            return Err(GrabError::NoSources);
        }
        Ok(sources)
    }
}

pub fn default_sources() -> Result<Vec<Source>, GrabError> {
    DEFAULT_SOURCES
        .iter()
        .map(|(name, mirror)| {
            Ok(Source {
                name: name.parse()?,
                mirror: mirror.parse()?,
            })
        })
        .collect()
}
