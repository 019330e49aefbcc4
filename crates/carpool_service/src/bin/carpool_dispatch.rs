use std::path::{Path, PathBuf};
use std::process::exit;

use carpool_contracts::contract::DriverRegistration;
use carpool_core::config::DispatchConfig;
use carpool_core::reference::ReferenceData;
use carpool_service::error::ServiceError;
use carpool_service::logging::init_logging;
use carpool_service::service::DispatchService;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "carpool-dispatch",
    about = "Carpool dispatch: route progression and rider matching",
    long_about = "Runs the route tick, the waiting-queue retry and the bus consumers\n\
                  against an in-memory store until interrupted."
)]
struct Cli {
    /// JSON config file; missing sections use defaults
    #[arg(long, env = "CARPOOL_CONFIG")]
    config: Option<PathBuf>,
    /// Place-to-place distances CSV (node1,node2,distance)
    #[arg(long, env = "CARPOOL_DISTANCES")]
    distances: PathBuf,
    /// Place-to-station CSV (city_point,near_metro_dropoff)
    #[arg(long, env = "CARPOOL_NEARBY")]
    nearby: PathBuf,
    /// JSON array of driver registrations to load at startup
    #[arg(long)]
    drivers: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_filter: String,
}

fn load_registrations(path: &Path) -> Result<Vec<DriverRegistration>, ServiceError> {
    let registrations_error = |message: String| ServiceError::Registrations {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path).map_err(|err| registrations_error(err.to_string()))?;
    serde_json::from_str(&raw).map_err(|err| registrations_error(err.to_string()))
}

async fn run(cli: Cli) -> Result<(), ServiceError> {
    let config = match &cli.config {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };
    let reference = ReferenceData::from_csv_paths(&cli.distances, &cli.nearby)?;
    let (service, _bus) = DispatchService::in_memory(config, &reference)?;

    if let Some(path) = &cli.drivers {
        let registrations = load_registrations(path)?;
        let total = registrations.len();
        let accepted = registrations
            .into_iter()
            .filter(|registration| service.routes().register_driver_route_ok(registration.clone()))
            .count();
        if accepted < total {
            warn!(accepted, total, "some driver registrations were rejected");
        }
        info!(accepted, "driver routes registered");
    }

    let cancel = CancellationToken::new();
    let handles = service.start(&cancel);

    tokio::signal::ctrl_c().await.map_err(ServiceError::Signal)?;
    info!("shutdown requested");
    cancel.cancel();
    for handle in handles {
        if let Err(join_error) = handle.await {
            error!(%join_error, "background task ended abnormally");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_filter) {
        eprintln!("{err}");
        exit(1);
    }
    if let Err(err) = run(cli).await {
        error!(error = %err, "carpool-dispatch failed");
        exit(1);
    }
}
