use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use scan_gateway::config::load_config;
use scan_gateway::observability::logging;
use scan_gateway::orchestrator::{
    FailureDetail, HttpFetcher, Orchestrator, OrchestratorSettings, Phase, ResourceRequest,
};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Load dashboard resources through the scan gateway", long_about = None)]
struct Cli {
    /// Base URL resources are resolved against (the gateway prefix).
    #[arg(short, long, default_value = "http://localhost:3000/api")]
    url: String,

    /// Gateway TOML; its `[orchestrator]` section seeds the run settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch several resources concurrently and report each outcome
    Fetch {
        /// Resources as key=locator, e.g. events=/events?limit=50
        #[arg(required = true)]
        resources: Vec<ResourceRequest>,

        /// JSON field holding the record list (overrides the config file)
        #[arg(long)]
        records_field: Option<String>,

        /// Per-resource deadline in seconds (overrides the config file)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Include the records themselves in the output
        #[arg(long)]
        records: bool,
    },
}

#[derive(Serialize)]
struct ResourceReport<'a> {
    key: &'a str,
    phase: Phase,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a FailureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<&'a [Value]>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging("warn");

    match cli.command {
        Commands::Fetch {
            resources,
            records_field,
            timeout_secs,
            records,
        } => {
            let mut settings = match &cli.config {
                Some(path) => OrchestratorSettings::from(&load_config(path)?.orchestrator),
                None => OrchestratorSettings::default(),
            };
            if let Some(field) = records_field {
                settings.records_field = field;
            }
            if let Some(secs) = timeout_secs {
                settings.resource_timeout = Some(Duration::from_secs(secs));
            }

            let fetcher = HttpFetcher::new(&cli.url)?;
            let orchestrator = Orchestrator::with_settings(fetcher, settings);

            let run = orchestrator.start_run(resources)?;
            run.wait_done().await?;

            let snapshot = run.snapshot();
            let reports: Vec<_> = snapshot
                .iter()
                .map(|(key, state)| ResourceReport {
                    key,
                    phase: state.phase(),
                    count: state.items().len(),
                    error: state.error_detail(),
                    items: records.then_some(state.items()),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let failed = reports.iter().any(|r| r.phase == Phase::Failed);
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
    }
}
