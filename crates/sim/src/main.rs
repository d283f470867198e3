use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    path::Path,
    process::ExitCode,
};

use etcs_core::{
    config::{self, AppConfig},
    supervisor, ControlError,
};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("etcs-sim: {err:#}");
            tracing::error!("Run failed: {err:#}");
            let code = err
                .downcast_ref::<ControlError>()
                .map_or(1, ControlError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run() -> Result<()> {
    config::ensure_default_config()?;
    let supervisor = supervisor::prepare(AppConfig::load()?, std::env::args().skip(1))?;
    init_logging(&supervisor.config().log_dir)?;

    let report = supervisor.run().await?;
    for train in &report.trains {
        match train.terminus {
            Some(terminus) => tracing::info!(
                train = train.train,
                %terminus,
                hops = train.hops,
                attempts = train.attempts,
                "Train summary"
            ),
            None => tracing::info!(train = train.train, "Train summary: no itinerary"),
        }
    }
    if let Some(authority) = report.authority {
        tracing::info!(
            decisions = authority.decisions,
            granted = authority.granted,
            "Authority summary"
        );
    }
    Ok(())
}

fn init_logging(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("etcs-sim.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stdout);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}
