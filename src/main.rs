mod auth;
mod coordinator;
mod location;
mod settings;
mod uploader;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::StaticTokenProvider;
use crate::coordinator::{Coordinator, UnlimitedBackground};
use crate::location::{
    stable_device_id, LocationEvent, LocationSource, MonitoringMode, SimulatedSource,
};
use crate::settings::{JsonFileStore, SettingsStore};
use crate::uploader::LocationUploader;

/// How often the simulated source produces a fix; uploads are throttled
/// separately by the configured send interval.
const SIM_SAMPLE_PERIOD: Duration = Duration::from_secs(2);
/// How long `send` waits for a first fix before giving up.
const FIRST_FIX_TIMEOUT: Duration = Duration::from_secs(30);

type AppCoordinator =
    Coordinator<SimulatedSource, StaticTokenProvider, LocationUploader, UnlimitedBackground>;

#[derive(Parser)]
#[command(name = "geobeacon")]
#[command(about = "Background location tracking client")]
struct Cli {
    /// Settings file (persisted key/value store)
    #[arg(long, default_value = "geobeacon.settings.json")]
    settings: PathBuf,

    /// Bearer token for authenticating uploads
    #[arg(long, conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the bearer token; re-read before every send so
    /// rotated tokens are picked up
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Destination URL override (persisted)
    #[arg(long)]
    server_url: Option<String>,

    /// Send interval override, e.g. "10s" (persisted, clamped to 2s..1h)
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Center of the simulated walk, "lat,lon"
    #[arg(long, default_value = "48.8584,2.2945", value_parser = parse_center)]
    center: (f64, f64),

    /// Coarse wake-up monitoring instead of continuous updates
    #[arg(long)]
    low_power: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track continuously and upload on location changes until Ctrl-C
    Run,
    /// Wait for one fix, upload it, and exit
    Send,
}

fn parse_center(value: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| "expected \"lat,lon\"".to_string())?;
    let lat: f64 = lat.trim().parse().map_err(|_| "invalid latitude")?;
    let lon: f64 = lon.trim().parse().map_err(|_| "invalid longitude")?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err("latitude out of range".to_string());
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err("longitude out of range".to_string());
    }
    Ok((lat, lon))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::open(cli.settings.clone()));
    let device_id = stable_device_id(store.as_ref());

    let auth = if let Some(token) = cli.token.clone() {
        StaticTokenProvider::with_token(token)
    } else if let Some(path) = cli.token_file.clone() {
        StaticTokenProvider::from_file(path)
    } else {
        StaticTokenProvider::signed_out()
    };

    let uploader = match LocationUploader::new() {
        Ok(uploader) => uploader,
        Err(e) => {
            eprintln!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mode = if cli.low_power {
        MonitoringMode::LowPower
    } else {
        MonitoringMode::Standard
    };
    let source = SimulatedSource::new(device_id, cli.center, SIM_SAMPLE_PERIOD);

    match cli.command {
        Commands::Run => {
            let coordinator =
                Coordinator::new(source, auth, uploader, UnlimitedBackground, store, mode);
            apply_overrides(&coordinator, &cli);
            run(coordinator).await
        }
        Commands::Send => {
            // Start the source before handing it to the coordinator so a
            // first fix can be awaited below.
            let mut events = source.subscribe();
            source.request_elevated_permission();
            source.start_monitoring(mode);

            let coordinator =
                Coordinator::new(source, auth, uploader, UnlimitedBackground, store, mode);
            apply_overrides(&coordinator, &cli);

            let got_fix = tokio::time::timeout(FIRST_FIX_TIMEOUT, async {
                loop {
                    match events.recv().await {
                        Ok(LocationEvent::Sample(_)) => return true,
                        Ok(_) => continue,
                        Err(_) => return false,
                    }
                }
            })
            .await
            .unwrap_or(false);
            if !got_fix {
                eprintln!("No location fix within {:?}", FIRST_FIX_TIMEOUT);
                return ExitCode::FAILURE;
            }

            coordinator.send_now().await;
            match coordinator.status().last_outcome {
                Some(outcome) => {
                    println!("{}", outcome.status_text());
                    if outcome.is_success() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                }
                None => {
                    eprintln!("Send was dropped");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn apply_overrides(coordinator: &AppCoordinator, cli: &Cli) {
    if let Some(url) = &cli.server_url {
        coordinator.set_server_url(url);
    }
    if let Some(interval) = cli.interval {
        let requested = interval.as_secs();
        let stored = coordinator.set_send_interval_seconds(requested);
        if stored != requested {
            log::warn!("send interval clamped to {}s", stored);
        }
    }
}

async fn run(mut coordinator: AppCoordinator) -> ExitCode {
    coordinator.start();
    let config = coordinator.config();
    println!(
        "Tracking to {} every {}s. Ctrl-C to stop.",
        config.server_url, config.send_interval_seconds
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to wait for Ctrl-C: {}", e);
        return ExitCode::FAILURE;
    }
    coordinator.stop().await;

    if let Some(outcome) = coordinator.status().last_outcome {
        println!("{}", outcome.status_text());
    }
    ExitCode::SUCCESS
}
