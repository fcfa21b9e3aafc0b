use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use tokio::time::Instant;
use tracing_subscriber::{EnvFilter, fmt};

use snapback::{
    api::HttpSnapshotApi,
    config::{Cli, Command, Config},
    pipeline::{BackupReport, BackupStatus, Orchestrator, TriggerContext},
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Run);

    match cmd {
        Command::Run => run_backup(cli.config).await,
    }
}

async fn run_backup(config: Config) -> ExitCode {
    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(err) => {
            let report =
                BackupReport::config_error(&config.node_id, &config.bucket, err.to_string());
            print_report(&report);
            return ExitCode::from(2);
        }
    };

    let api = HttpSnapshotApi::new(settings.api_base_url.clone(), settings.api_token.clone());
    let orchestrator = Orchestrator::new(settings, Arc::new(api));

    let ctx = match config.deadline_secs {
        Some(secs) => TriggerContext::with_deadline(Instant::now() + Duration::from_secs(secs)),
        None => TriggerContext::new(),
    };
    let report = orchestrator.run(ctx).await;
    print_report(&report);

    match report.status {
        BackupStatus::Success => ExitCode::SUCCESS,
        BackupStatus::Error => ExitCode::FAILURE,
    }
}

fn print_report(report: &BackupReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialize report: {err}"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}
