//! Binary entry point for the `ami-publish` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ami_publish::{
    BatchDispatcher, BatchError, BatchReport, BatchSettings, ConfigError, Ec2Config,
    Ec2DriverFactory, ImportTools, JobOutcome, ProcessCommandRunner, PublishConfig,
    TracingNotifier, UploadOrchestrator, UploadSettings,
};

mod cli;

use cli::{Cli, UploadCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid --compose value: {0}")]
    InvalidCompose(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Upload(command) => upload(command).await,
    }
}

async fn upload(args: UploadCommand) -> Result<i32, CliError> {
    setup_logging(args.verbose, args.quiet);
    let compose = parse_compose(args.compose.as_deref())?;

    let ec2 = Ec2Config::load_without_cli_args()?;
    ec2.validate()?;
    let mut publish = PublishConfig::load_without_cli_args()?;
    if let Some(workers) = args.workers {
        publish.workers = workers;
    }
    publish.validate()?;

    let runner = ProcessCommandRunner;
    let credentials = ec2.credentials();
    let factory = Ec2DriverFactory::new(runner, ec2.aws_bin.trim(), credentials.clone());
    let tools = ImportTools::new(
        ec2.import_volume_bin.trim(),
        ec2.describe_conversion_tasks_bin.trim(),
        credentials,
    );
    let cancel = CancellationToken::new();
    let orchestrator = UploadOrchestrator::new(
        factory,
        runner,
        tools,
        TracingNotifier,
        UploadSettings::from_config(&ec2, &publish),
    )
    .with_cancellation(cancel.clone())
    .with_compose(compose);
    let dispatcher = BatchDispatcher::new(
        orchestrator,
        runner,
        BatchSettings::from_config(&ec2, &publish)?,
    );

    let interrupt = tokio::spawn(cancel_on_interrupt(cancel));
    let outcome = dispatcher.dispatch(&args.urls).await;
    interrupt.abort();
    let report = outcome?;

    write_report(io::stdout(), &report);
    Ok(if report.all_succeeded() { 0 } else { 1 })
}

fn setup_logging(verbose: u8, quiet: u8) {
    let level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (_, 0) => "trace",
        (0, 1) => "warn",
        (0, 2) => "error",
        (0, _) => "off",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn parse_compose(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    let Some(text) = raw else {
        return Ok(None);
    };
    let value = serde_json::from_str::<Value>(text)
        .map_err(|err| CliError::InvalidCompose(err.to_string()))?;
    if !value.is_object() {
        return Err(CliError::InvalidCompose(String::from(
            "expected a JSON object",
        )));
    }
    Ok(Some(value))
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received; cancelling outstanding jobs");
        cancel.cancel();
    }
}

fn write_report(mut target: impl Write, report: &BatchReport) {
    for job_report in report.jobs() {
        let job = &job_report.job;
        let detail = match &job_report.outcome {
            JobOutcome::Published(handle) => {
                format!("published {} ({})", handle.image_id, handle.image_name)
            }
            JobOutcome::Failed { message, .. } => format!("failed: {message}"),
        };
        writeln!(
            target,
            "{} {} {} {}: {detail}",
            job.url(),
            job.region(),
            job.virtualization_type(),
            job.volume_type()
        )
        .ok();
    }
    writeln!(
        target,
        "{} of {} jobs published",
        report.succeeded(),
        report.jobs().len()
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
