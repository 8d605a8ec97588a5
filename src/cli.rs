//! Command-line entry points.
//!
//! Exit codes: 0 complete, 2 degraded, 3 failed. 1 is reserved for problems
//! before a run starts (bad environment, invalid blueprint, unwritable
//! output).

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::info;

use crate::engine::{Engine, EngineConfig};
use crate::pipeline::{Collaborators, keys, report_graph};
use crate::settings::Settings;
use crate::summary::RunReport;
use crate::telemetry;

#[derive(Parser)]
#[command(name = "reportweave", version, about = "Stage-graph report pipeline runner")]
pub struct Cli {
    /// Widen log filtering to debug for this crate
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the validated pipeline topology and exit
    Plan,
    /// Run the report pipeline for one ticker
    Generate {
        /// Ticker symbol, e.g. 600000.SH
        ticker: String,
        /// Company display name (defaults to the ticker)
        #[arg(long)]
        name: Option<String>,
        /// Write the final context snapshot as JSON to this path
        #[arg(long, value_name = "PATH")]
        dump: Option<PathBuf>,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => return config_failure(miette::Report::new(err)),
    };
    telemetry::init(cli.debug || settings.debug);

    let collaborators = Collaborators::from_settings(&settings);
    let graph = match report_graph(&collaborators).compile() {
        Ok(graph) => graph,
        Err(err) => return config_failure(miette::Report::new(err)),
    };

    match cli.command {
        Commands::Plan => {
            print!("{}", graph.describe());
            ExitCode::SUCCESS
        }
        Commands::Generate { ticker, name, dump } => {
            let engine = Engine::new(
                graph,
                EngineConfig {
                    max_revisions: settings.max_revisions,
                },
            );
            let seed = seed_values(&ticker, name.as_deref());
            let report = match engine.run(seed).await {
                Ok(report) => report,
                Err(err) => return config_failure(miette::Report::new(err)),
            };
            if let Err(err) = persist_outputs(&report, &ticker, &settings, dump.as_deref()) {
                return config_failure(err);
            }
            print_summary(&report);
            ExitCode::from(report.summary.outcome.exit_code())
        }
    }
}

fn seed_values(ticker: &str, name: Option<&str>) -> FxHashMap<String, Value> {
    let mut seed = FxHashMap::default();
    seed.insert(keys::TICKER.to_string(), json!(ticker));
    seed.insert(
        keys::COMPANY_NAME.to_string(),
        json!(name.unwrap_or(ticker)),
    );
    seed.insert(
        keys::REPORT_DATE.to_string(),
        json!(Utc::now().date_naive().to_string()),
    );
    seed
}

fn persist_outputs(
    report: &RunReport,
    ticker: &str,
    settings: &Settings,
    dump: Option<&std::path::Path>,
) -> miette::Result<()> {
    if let Some(Value::String(document)) = report.snapshot.get(keys::REPORT_MARKDOWN) {
        let dir = &settings.output_dir;
        let path = dir.join(format!("{ticker}.md"));
        std::fs::create_dir_all(dir).into_diagnostic()?;
        std::fs::write(&path, document).into_diagnostic()?;
        info!(path = %path.display(), "report written");
    }

    if let Some(path) = dump {
        let serialized = report.snapshot.to_json_pretty().into_diagnostic()?;
        std::fs::write(path, serialized).into_diagnostic()?;
        info!(path = %path.display(), "context snapshot dumped");
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    println!("outcome: {}", summary.outcome);
    println!("revisions used: {}", summary.revisions);
    if let Some(fatal) = &summary.fatal {
        println!("fatal: {fatal}");
    }
    if !report.snapshot.errors.is_empty() {
        println!("errors:");
        for entry in &report.snapshot.errors {
            println!("  {entry}");
        }
    }
    if !summary.missing_keys.is_empty() {
        println!("missing sections: {}", summary.missing_keys.join(", "));
    }
}

fn config_failure(report: miette::Report) -> ExitCode {
    eprintln!("{report:?}");
    ExitCode::from(1)
}
