//! Command-line interface for FinFlash

mod setup;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use finflash_core::{ExecutionMode, Payload, RunRequest, RunStatus, TaskKind};
use finflash_orchestrator::{JsonFileReportStore, Orchestrator, RunEvent};
use setup::{CliConfig, build_registry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "finflash")]
#[command(about = "Orchestrate financial news analysis tasks", long_about = None)]
struct Cli {
    /// JSON configuration file with `app`, `orchestrator` and `capabilities` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one unit of news and print the aggregated report
    Analyze {
        #[command(flatten)]
        request: RequestArgs,

        /// Print one JSON event per finished task instead of a single report
        #[arg(long)]
        stream: bool,

        /// Collect content locally and skip every external service
        #[arg(long)]
        dry_run: bool,

        /// Directory where reports are saved as `<run_id>.json`
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },
    /// Print the wave plan a request would run
    Plan {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// List the registered task kinds
    Tasks,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("input").required(true).args(["text", "audio", "query"])))]
struct RequestArgs {
    /// Raw article text
    #[arg(long)]
    text: Option<String>,

    /// Path to an audio recording
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Search query for recent news
    #[arg(long)]
    query: Option<String>,

    /// Article title (text input only)
    #[arg(long, requires = "text")]
    title: Option<String>,

    /// Where the news came from
    #[arg(long, default_value = "direct-input")]
    source: String,

    /// sequential, parallel or adaptive
    #[arg(long, default_value_t = ExecutionMode::Parallel)]
    mode: ExecutionMode,

    /// Comma-separated task kinds to run (default: everything the input can feed)
    #[arg(long, value_delimiter = ',')]
    tasks: Vec<String>,
}

impl RequestArgs {
    fn into_request(self) -> anyhow::Result<RunRequest> {
        let payload = match (self.text, self.audio, self.query) {
            (Some(content), _, _) => Payload::Text {
                content,
                title: self.title,
            },
            (_, Some(path), _) => Payload::Audio { path, format: None },
            (_, _, Some(query)) => RunRequest::search(query).payload,
            _ => anyhow::bail!("one of --text, --audio or --query is required"),
        };

        let mut request = RunRequest::new(payload)
            .with_source(self.source)
            .with_mode(self.mode);
        if !self.tasks.is_empty() {
            request = request.with_tasks(self.tasks.into_iter().map(TaskKind::new));
        }
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref())?;
    finflash_utils::init_tracing_with(config.app.log_format, &config.app.log_level);

    info!(environment = %config.app.environment, "Starting {}", config.app.app_name);

    match cli.command {
        Command::Analyze {
            request,
            stream,
            dry_run,
            store_dir,
        } => {
            let registry = build_registry(&config.capabilities, dry_run)?;
            let mut builder = Orchestrator::builder(registry).config(config.orchestrator);
            if let Some(dir) = store_dir {
                builder = builder.store(Arc::new(JsonFileReportStore::new(dir)));
            }
            let orchestrator = builder.build()?;
            let request = request.into_request()?;

            let status = if stream {
                run_streaming(&orchestrator, request).await?
            } else {
                let report = orchestrator.submit(request).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                report.status
            };

            Ok(exit_code(status))
        }
        Command::Plan { request } => {
            let registry = build_registry(&config.capabilities, true)?;
            let orchestrator = Orchestrator::new(registry, config.orchestrator)?;
            let plan = orchestrator.plan_for(&request.into_request()?)?;

            println!("mode: {}", plan.mode);
            for wave in &plan.waves {
                let tasks: Vec<&str> = wave.tasks.iter().map(TaskKind::as_str).collect();
                println!("wave {}: {}", wave.index, tasks.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Tasks => {
            let registry = build_registry(&config.capabilities, true)?;
            for descriptor in registry.descriptors() {
                let deps: Vec<&str> = descriptor.depends_on.iter().map(TaskKind::as_str).collect();
                println!(
                    "{:<20} {:<8} -> {:<10} limit={:<8} after=[{}]",
                    descriptor.kind.as_str(),
                    descriptor.input_shape.to_string(),
                    descriptor.output_shape.to_string(),
                    descriptor.limit_key(),
                    deps.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_streaming(
    orchestrator: &Orchestrator,
    request: RunRequest,
) -> anyhow::Result<RunStatus> {
    let mut events = orchestrator.submit_streaming(request).await?;
    let mut status = None;

    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        match &event {
            RunEvent::RunFinished { report } => status = Some(report.status),
            RunEvent::RunAborted { error, .. } => anyhow::bail!("run aborted: {error}"),
            RunEvent::TaskCompleted { .. } => {}
        }
    }

    status.context("run ended without a report")
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::PartialFailure => ExitCode::from(2),
        RunStatus::Failed => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_args_build_request() {
        let cli = Cli::try_parse_from([
            "finflash",
            "analyze",
            "--text",
            "X reports record earnings",
            "--title",
            "Q3",
            "--mode",
            "sequential",
            "--tasks",
            "collect-text,analyze-risk",
        ])
        .unwrap();

        let Command::Analyze { request, .. } = cli.command else {
            panic!("expected analyze");
        };
        let request = request.into_request().unwrap();

        assert_eq!(request.mode, ExecutionMode::Sequential);
        assert_eq!(
            request.payload,
            Payload::Text {
                content: "X reports record earnings".to_string(),
                title: Some("Q3".to_string()),
            }
        );
        let tasks = request.tasks.unwrap();
        assert!(tasks.contains(&TaskKind::ANALYZE_RISK));
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_input_is_required_and_exclusive() {
        assert!(Cli::try_parse_from(["finflash", "plan"]).is_err());
        assert!(
            Cli::try_parse_from(["finflash", "plan", "--text", "a", "--query", "b"]).is_err()
        );
    }
}
