use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    GrabResult, ListResult, Outcome, OutcomeStatus, ProgressEvent, ProgressLevel, ProgressSink,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_grab(result: &GrabResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_grab(result: &GrabResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "generated: {}, already done: {}, retry next run: {}, skipped: {}",
            result.count(OutcomeStatus::Generated),
            result.count(OutcomeStatus::AlreadyComplete) + result.count(OutcomeStatus::AlreadySkipped),
            result.count(OutcomeStatus::Retry),
            result.count(OutcomeStatus::Skipped),
        )?;
        for source in &result.sources {
            writeln!(stdout, "{} ({})", source.name, source.mirror)?;
            if let Some(error) = &source.error {
                writeln!(stdout, "  error: {error}")?;
            }
            for item in &source.items {
                let status = match &item.outcome {
                    Outcome::Generated => "generated".to_string(),
                    Outcome::AlreadyComplete | Outcome::AlreadySkipped => continue,
                    Outcome::Retry { message, .. } => format!("retry: {message}"),
                    Outcome::Skipped { message, .. } => format!("skipped: {message}"),
                };
                writeln!(stdout, "  {} {status}", item.destination)?;
            }
        }
        Ok(())
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for source in &result.sources {
            writeln!(stdout, "{} ({})", source.name, source.mirror)?;
            if let Some(error) = &source.error {
                writeln!(stdout, "  error: {error}")?;
            }
            for entry in &source.candidates {
                writeln!(
                    stdout,
                    "  {:<8} {}",
                    entry.state.as_str(),
                    entry.remote_file_name
                )?;
            }
        }
        Ok(())
    }
}

/// Forwards pipeline progress to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64);
        match (event.level, elapsed_ms) {
            (ProgressLevel::Info, Some(elapsed_ms)) => {
                tracing::info!(elapsed_ms, "{}", event.message)
            }
            (ProgressLevel::Info, None) => tracing::info!("{}", event.message),
            (ProgressLevel::Warning, Some(elapsed_ms)) => {
                tracing::warn!(elapsed_ms, "{}", event.message)
            }
            (ProgressLevel::Warning, None) => tracing::warn!("{}", event.message),
        }
    }
}
