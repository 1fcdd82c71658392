use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use confsnap::{
    FleetFile, FleetOrchestrator, LogObserver, OutputKind, Outcome, PlatformDefinition, RunReport,
    SshConnector,
};

#[derive(Parser, Debug)]
#[command(
    name = "confsnap",
    version,
    about = "Collect configuration snapshots from a fleet of network devices"
)]
struct Cli {
    #[arg(short, long, help = "Fleet file (TOML) with settings, credentials and devices")]
    config: PathBuf,
    #[arg(long, help = "Directory the snapshots are written to")]
    output_dir: Option<PathBuf>,
    #[arg(
        long = "kind",
        value_name = "KIND",
        help = "Output format to collect: xml, set or cnf (repeatable)"
    )]
    kinds: Vec<OutputKind>,
    #[arg(long, help = "Maximum number of devices collected at once")]
    concurrency: Option<usize>,
    #[arg(long, value_name = "SECS", help = "Overall run deadline in seconds")]
    deadline: Option<u64>,
    #[arg(long, help = "Output the run report as JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> confsnap::Result<u8> {
    let fleet = FleetFile::load(&cli.config)?;

    let mut settings = fleet.collector.clone();
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }
    if !cli.kinds.is_empty() {
        settings.kinds = cli.kinds;
    }
    if let Some(limit) = cli.concurrency {
        settings.concurrency = limit;
    }
    if let Some(secs) = cli.deadline {
        settings.deadline_secs = Some(secs);
    }
    settings.validate()?;

    let inventory = fleet.inventory()?;
    let policy = settings.task_policy();

    let mut connector = SshConnector::new(PlatformDefinition::by_name(&settings.platform)?)
        .connect_timeout(policy.connect_timeout)
        .command_timeout(policy.request_timeout)
        .host_key_verification(settings.host_key_verification);
    if let Some(path) = &settings.known_hosts {
        connector = connector.known_hosts(path);
    }

    let mut orchestrator = FleetOrchestrator::new(connector, &settings.output_dir)
        .concurrency(settings.concurrency)
        .policy(policy)
        .observer(Arc::new(LogObserver));
    if let Some(deadline) = settings.deadline() {
        orchestrator = orchestrator.deadline(deadline);
    }

    let report = orchestrator.run(&inventory, &settings.kinds).await?;

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("could not serialize the run report: {e}"),
        }
    } else {
        print_report(&report);
    }

    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    println!("{:<20} {:<5} {:<9} DETAIL", "DEVICE", "KIND", "STATUS");
    for result in report.iter() {
        let (status, detail) = match &result.outcome {
            Outcome::Stored { path, .. } => ("stored", path.display().to_string()),
            Outcome::Failed { error, message } => ("failed", format!("{error}: {message}")),
        };
        println!(
            "{:<20} {:<5} {:<9} {}",
            result.device, result.kind, status, detail
        );
    }

    let summary = report.summary();
    println!();
    println!(
        "{}/{} stored; devices: {} complete, {} partial, {} failed{}",
        summary.stored,
        summary.fetches,
        summary.complete.len(),
        summary.partial.len(),
        summary.failed_devices.len(),
        if report.deadline_exceeded {
            " (deadline exceeded)"
        } else {
            ""
        }
    );
}
