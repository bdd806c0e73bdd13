//! Binary entry point for the graphload bulk loader.
#![forbid(unsafe_code)]

#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use graphload::config::JobManifest;
use graphload::ingest::{
    run_ingest, run_job, Delimiter, IngestConfig, KeySchema, QuerySpec, RunReport, RunStatus,
    ValueDecoding, DEFAULT_CHUNK_SIZE, DEFAULT_MULTI_VALUE_SEPARATOR,
};
use graphload::source::LocalArtifacts;
use graphload::store::{GraphStore, MemoryGraphStore, SqliteGraphStore, SqliteOptions, Synchronous};
use tracing_subscriber::EnvFilter;

use ui::{print_report, ProgressReporter, Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "graphload",
    version,
    about = "Batched, resumable bulk loader for delimited files into a graph store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for run reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto)]
    theme: Theme,

    #[arg(long, short, global = true, help = "Plain output without spinners or icons")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(
        long = "store",
        env = "GRAPHLOAD_STORE",
        value_name = "DB",
        help = "SQLite graph database to write into"
    )]
    path: Option<PathBuf>,

    #[arg(long, help = "Run against an in-memory store; nothing is persisted")]
    dry_run: bool,

    #[arg(long, value_enum, help = "SQLite synchronous mode")]
    synchronous: Option<SynchronousArg>,
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(value_name = "FILE")]
    file: PathBuf,

    #[arg(long, value_name = "QUERY", conflicts_with = "query_file", required_unless_present = "query_file")]
    query: Option<String>,

    #[arg(long, value_name = "PATH", help = "Read the write query from a file")]
    query_file: Option<PathBuf>,

    #[arg(long, value_name = "k1,k2", help = "Explicit key list overriding the header")]
    keys: Option<String>,

    #[arg(long, default_value = "tab", help = "Field delimiter (tab, comma, pipe or a single character)")]
    delimiter: Delimiter,

    #[arg(long, default_value_t = 0, help = "Data rows to skip before the first batch")]
    start_at: u64,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Rows per write transaction")]
    chunk_size: usize,

    #[arg(long, value_enum, default_value_t = DecodingArg::Plain)]
    decoding: DecodingArg,

    #[arg(
        long,
        default_value_t = DEFAULT_MULTI_VALUE_SEPARATOR,
        help = "Secondary delimiter for multi-value decoding"
    )]
    separator: char,

    #[arg(long, default_value_t = 0, help = "Row groups read ahead of execution (0 reads inline)")]
    read_ahead: usize,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(value_name = "MANIFEST", help = "Job manifest; defaults to the user config directory")]
    manifest: Option<PathBuf>,

    #[arg(long, help = "Run against an in-memory store; nothing is persisted")]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Load one delimited file")]
    Load(LoadCmd),

    #[command(about = "Run every step of a job manifest")]
    Run(RunCmd),

    #[command(about = "Print shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SynchronousArg {
    Full,
    Normal,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Normal => Synchronous::Normal,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DecodingArg {
    Plain,
    MultiValue,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let ui = Ui::new(cli.theme, cli.quiet);
    match run(&cli, &ui) {
        Ok(status) => status,
        Err(err) => {
            ui.error(&format!("error: {err}"));
            ExitCode::from(2)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

fn run(cli: &Cli, ui: &Ui) -> Result<ExitCode, Box<dyn Error>> {
    match &cli.command {
        Command::Load(cmd) => {
            let config = build_ingest_config(cmd)?;
            let label = config.path.display().to_string();
            let reporter = ProgressReporter::new(ui, label);
            // Either outcome lands in the reporter.
            if cmd.store.dry_run {
                let _ = run_ingest(&MemoryGraphStore::counting(), &config, &reporter);
            } else {
                let store = open_sqlite(&cmd.store)?;
                let _ = run_ingest(&store, &config, &reporter);
            }
            finish(cli, ui, reporter.into_reports())
        }
        Command::Run(cmd) => {
            let manifest = JobManifest::load(cmd.manifest.clone())?;
            if manifest.store.path.is_none() && !cmd.dry_run {
                return Err(format!(
                    "manifest {} has no [store] path; set one or use --dry-run",
                    manifest.path.display()
                )
                .into());
            }
            let source = LocalArtifacts::new(&manifest.store.artifacts, &manifest.store.scratch);
            let reporter = ProgressReporter::new(ui, manifest.path.display().to_string());
            let _ = match (&manifest.store.path, cmd.dry_run) {
                (Some(path), false) => {
                    let store = SqliteGraphStore::open(path, manifest.store.options.clone())?;
                    run_job(&store, &source, &manifest.steps, &reporter)
                }
                _ => run_job(&MemoryGraphStore::counting(), &source, &manifest.steps, &reporter),
            };
            finish(cli, ui, reporter.into_reports())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "graphload", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_ingest_config(cmd: &LoadCmd) -> Result<IngestConfig, Box<dyn Error>> {
    let template = match (&cmd.query, &cmd.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => fs::read_to_string(path)?,
        (None, None) => return Err("either --query or --query-file is required".into()),
    };
    let keys = cmd
        .keys
        .as_deref()
        .map(KeySchema::parse_key_list)
        .transpose()?;
    let decoding = match cmd.decoding {
        DecodingArg::Plain => ValueDecoding::Plain,
        DecodingArg::MultiValue => ValueDecoding::MultiValue {
            separator: cmd.separator,
        },
    };
    Ok(IngestConfig {
        name: None,
        path: cmd.file.clone(),
        delimiter: cmd.delimiter,
        keys,
        query: QuerySpec::new(template)?,
        start_at: cmd.start_at,
        chunk_size: cmd.chunk_size,
        decoding,
        read_ahead: cmd.read_ahead,
    })
}

fn open_sqlite(args: &StoreArgs) -> Result<SqliteGraphStore, Box<dyn Error>> {
    let path = args
        .path
        .as_ref()
        .ok_or("no store given; pass --store, set GRAPHLOAD_STORE or use --dry-run")?;
    let mut options = SqliteOptions::default();
    if let Some(mode) = args.synchronous {
        options.synchronous = mode.into();
    }
    let store = SqliteGraphStore::open(path, options)?;
    tracing::debug!(database = store.database(), "cli.store.opened");
    Ok(store)
}

/// Prints the reports and maps them to the process exit code: 1 when any step aborted.
fn finish(cli: &Cli, ui: &Ui, reports: Vec<RunReport>) -> Result<ExitCode, Box<dyn Error>> {
    let aborted = reports.iter().any(|report| report.status == RunStatus::Aborted);
    match cli.format {
        OutputFormat::Json => {
            let json = match reports.as_slice() {
                [single] => serde_json::to_string_pretty(single)?,
                all => serde_json::to_string_pretty(all)?,
            };
            println!("{json}");
        }
        OutputFormat::Text => {
            for report in &reports {
                print_report(ui, report);
            }
        }
    }
    Ok(if aborted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
