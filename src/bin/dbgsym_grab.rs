use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dbgsym_grabber::app::{App, GrabOptions};
use dbgsym_grabber::config::{ConfigLoader, ResolvedConfig};
use dbgsym_grabber::domain::{Source, TieBreak};
use dbgsym_grabber::dwarf2json::SystemDwarf2Json;
use dbgsym_grabber::error::GrabError;
use dbgsym_grabber::mirror::MirrorHttpClient;
use dbgsym_grabber::output::{JsonOutput, LogProgress, OutputMode, TextOutput};
use dbgsym_grabber::store::Store;

#[derive(Parser)]
#[command(name = "dbgsym-grab")]
#[command(about = "Build dwarf2json Linux profiles from kernel debug packages on Debian-style mirrors")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download debug packages and generate missing profiles (default)")]
    Grab(GrabArgs),
    #[command(about = "Show the debug packages each source offers and their profile state")]
    List(CommonArgs),
}

#[derive(Args, Clone, Default)]
struct CommonArgs {
    /// Config file (defaults to ./dbgsym-grab.json when present)
    #[arg(long)]
    config: Option<String>,

    /// Source to process instead of the configured ones; repeatable
    #[arg(long = "source", value_name = "NAME=URL")]
    sources: Vec<String>,

    /// Directory that receives one subdirectory per source
    #[arg(long)]
    output: Option<String>,

    /// Keep going past mirror transport failures
    #[arg(long)]
    keep_going: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Default)]
struct GrabArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// dwarf2json executable (name on PATH or path)
    #[arg(long)]
    tool: Option<String>,

    /// Which vmlinux / System.map member wins when several match
    #[arg(long, value_enum)]
    tie_break: Option<TieBreak>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GrabError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GrabError) -> u8 {
    match error {
        GrabError::InvalidSourceName(_)
        | GrabError::InvalidMirrorUrl(_)
        | GrabError::InvalidSourceEntry(_)
        | GrabError::InvalidFailureKind(_)
        | GrabError::InvalidDisposition(_)
        | GrabError::InvalidTieBreak(_)
        | GrabError::NoSources
        | GrabError::ConfigRead(_)
        | GrabError::ConfigParse(_) => 2,
        GrabError::MirrorHttp(_) | GrabError::MirrorStatus { .. } | GrabError::MissingTool(_) => {
            3
        }
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Commands::Grab(GrabArgs::default())) {
        Commands::Grab(args) => run_grab(args),
        Commands::List(args) => run_list(args),
    }
}

struct Prepared {
    resolved: ResolvedConfig,
    sources: Vec<Source>,
    store: Store,
    output_mode: OutputMode,
}

fn prepare(args: &CommonArgs) -> Result<Prepared, GrabError> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;

    let sources = resolved.effective_sources(&args.sources)?;

    let store = match args
        .output
        .as_deref()
        .map(Utf8PathBuf::from)
        .or_else(|| resolved.output_dir.clone())
    {
        Some(root) => Store::new(root),
        None => Store::in_current_dir()?,
    };

    let output_mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    Ok(Prepared {
        resolved,
        sources,
        store,
        output_mode,
    })
}

fn grab_options(resolved: &ResolvedConfig, keep_going: bool) -> GrabOptions {
    GrabOptions {
        tie_break: resolved.tie_break,
        keep_going: keep_going || resolved.keep_going,
        failure_policy: resolved.failure_policy.clone(),
    }
}

fn run_grab(args: GrabArgs) -> miette::Result<()> {
    let Prepared {
        resolved,
        sources,
        store,
        output_mode,
    } = prepare(&args.common)?;

    let tool = SystemDwarf2Json::new(args.tool.as_deref().unwrap_or(&resolved.tool));
    tool.ensure_available()?;
    let mirror = MirrorHttpClient::new(resolved.request_timeout)?;

    let mut options = grab_options(&resolved, args.common.keep_going);
    if let Some(tie_break) = args.tie_break {
        options.tie_break = tie_break;
    }

    let app = App::new(store, mirror, tool, options);
    let result = app.grab(&sources, &LogProgress)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_grab(&result).into_diagnostic(),
        OutputMode::Text => TextOutput::print_grab(&result).into_diagnostic(),
    }
}

fn run_list(args: CommonArgs) -> miette::Result<()> {
    let Prepared {
        resolved,
        sources,
        store,
        output_mode,
    } = prepare(&args)?;

    // Listing never runs the profile tool, so its presence is not required.
    let tool = SystemDwarf2Json::new(&resolved.tool);
    let mirror = MirrorHttpClient::new(resolved.request_timeout)?;
    let app = App::new(store, mirror, tool, grab_options(&resolved, args.keep_going));
    let result = app.list(&sources, &LogProgress)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic(),
        OutputMode::Text => TextOutput::print_list(&result).into_diagnostic(),
    }
}
