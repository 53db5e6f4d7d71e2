use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use nyxload_core::{RampProfile, RunConfig, Summary, Thresholds};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::cli::{Args, OutputFormat};
use crate::driver::{DriverConfig, LoadDriver};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod driver;
mod error;
mod report;

/// Exit status when the run completes but a threshold was crossed.
const THRESHOLDS_FAILED: u8 = 99;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            match tracing_subscriber::EnvFilter::try_from_default_env() {
                Ok(filter) => filter,
                Err(_) => tracing_subscriber::EnvFilter::new("info"),
            },
        )
        .init();

    let args = Args::parse();
    match run(args, |key| std::env::var(key).ok()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(THRESHOLDS_FAILED),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_run_config(args: &Args, driver: &LoadDriver) -> anyhow::Result<RunConfig> {
    let mut config = driver.run_config()?;

    if !args.stages.is_empty() {
        config.stages = RampProfile::new(args.stages.clone())?;
    }

    if args.no_thresholds {
        config.thresholds = Thresholds::new();
    }
    for arg in &args.thresholds {
        config.thresholds.set_from_arg(arg)?;
    }
    config.thresholds = config.thresholds.with_abort_on_fail(args.abort_on_fail);

    config.timeout = args.timeout;
    config.graceful_stop = args.graceful_stop;
    Ok(config)
}

/// Returns whether every threshold held. `env` backs every key not given
/// with `--env`.
async fn run<E>(args: Args, env: E) -> anyhow::Result<bool>
where
    E: Fn(&str) -> Option<String>,
{
    // Fail fast: nothing is scheduled until the endpoint is known
    let driver_config = DriverConfig::from_lookup(|key| args.lookup(key, &env))?;
    let driver = LoadDriver::new(driver_config);
    let config = build_run_config(&args, &driver)?;

    info!(
        "{} v{}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION")
    );
    if args.output == OutputFormat::Text {
        let stages: Vec<String> = config
            .stages
            .stages()
            .iter()
            .map(|s| s.to_string())
            .collect();
        println!(
            "Running {} @ {}",
            nyxload_core::format_duration(config.stages.total_duration()),
            driver.endpoint()
        );
        println!("  stages: {}", stages.join(", "));
        println!("  max VUs: {}", config.stages.max_target());
    }

    let outcome = if args.once {
        nyxload_core::run_once(config, Arc::new(driver)).await?
    } else {
        let mut progress = report::ProgressReporter::new(
            args.output.clone(),
            config.stages.total_duration(),
            args.quiet,
        );
        let outcome = nyxload_core::run(
            config,
            Arc::new(driver),
            Some(|p: &nyxload_core::StatsSnapshot| progress.update(p)),
        )
        .await?;
        progress.finish();
        outcome
    };
    std::io::stdout().flush().ok();

    let summary = Summary::from(&outcome);

    if let Some(path) = &args.summary_export {
        let json = serde_json::to_vec_pretty(&summary)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!("summary written to {}", path.display());
    }

    match args.output {
        OutputFormat::Text => print!("{}", report::render_text(&summary)),
        OutputFormat::Json => println!("{}", serde_json::to_string(&summary)?),
    }
    std::io::stdout().flush().ok();

    Ok(summary.thresholds_passed)
}
