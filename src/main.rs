use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod acquirer;
mod controller;
mod db;
mod db_models;
mod distance;
mod encoder;
mod fixed_position;
mod gpsd;
mod handlers;
mod models;
mod scheduler;
mod state;
mod uploader;
mod utils;
mod wake_lock;

use acquirer::{FixAcquirer, LocationProvider};
use controller::{ControllerOptions, TrackingController};
use fixed_position::{FixedPosition, FixedProvider};
use uploader::{HttpUploader, UploadMethod};

// The control API talks to the tracking controller through its handle; the
// controller task owns all tracking state.
pub type AppState = controller::ControllerHandle;

pub const GIT_TAG: &str = env!("GIT_TAG");

/// Command line configuration
#[derive(Parser, Debug)]
#[command(author, version = GIT_TAG, about, long_about = None)]
struct Config {
    /// IP address to bind the control API to
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to bind the control API to
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database file holding settings and trip state
    #[arg(long, default_value = "gpstracker.db")]
    database_file: PathBuf,

    /// Address of the gpsd daemon providing fixes
    #[arg(long, default_value = "127.0.0.1:2947")]
    gpsd_address: String,

    /// Report this position instead of asking gpsd, as 'lat,lon' or 'lat,lon,accuracy'
    #[arg(long)]
    fixed_position: Option<FixedPosition>,

    /// Fixes with a worse horizontal accuracy (meters) are not used
    #[arg(long, default_value_t = 100.0)]
    accuracy_threshold: f64,

    /// How long a cycle waits for an accurate enough fix
    #[arg(long, default_value = "45s")]
    fix_timeout: humantime::Duration,

    /// How long a cycle waits for the collector to answer
    #[arg(long, default_value = "30s")]
    upload_timeout: humantime::Duration,

    /// HTTP method used for uploads
    #[arg(long, value_enum, default_value_t = UploadMethod::Post)]
    upload_method: UploadMethod,

    /// Event type reported with every location
    #[arg(long, default_value = "gpsd-agent")]
    event_type: String,

    /// Interval in seconds used when enabling without one
    #[arg(long, default_value_t = state::DEFAULT_INTERVAL_SECONDS)]
    default_interval: u64,

    /// Collector endpoint used when enabling without one
    #[arg(
        long,
        default_value = "https://www.websmithing.com/gpstracker/api/locations/update"
    )]
    default_endpoint: String,
}

async fn real_main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_line_number(true)
        .with_target(true)
        .init();

    info!("Initializing gpstracker-agent {GIT_TAG}");

    let config = Config::parse();

    info!("Configuration: {config:?}"); // Log the parsed configuration

    if !(config.accuracy_threshold > 0.0) {
        anyhow::bail!(
            "Accuracy threshold must be positive, got {}",
            config.accuracy_threshold
        );
    }
    if !state::is_valid_interval(config.default_interval) {
        anyhow::bail!(
            "Default interval must be between 1 and {} seconds, got {}",
            state::MAX_INTERVAL_SECONDS,
            config.default_interval
        );
    }

    let store = Arc::new(db::DbClient::new(&config.database_file).await?);

    let provider: Arc<dyn LocationProvider> = match config.fixed_position {
        Some(position) => {
            info!("Using fixed position {position:?}");
            Arc::new(FixedProvider::new(position))
        }
        None => {
            info!("Using gpsd at {}", config.gpsd_address);
            Arc::new(gpsd::GpsdProvider::new(config.gpsd_address.clone()))
        }
    };
    let acquirer = FixAcquirer::new(provider, config.fix_timeout.into());
    let uploader = Arc::new(HttpUploader::new(
        config.upload_method,
        config.upload_timeout.into(),
    )?);

    let mut controller = TrackingController::new(
        store,
        acquirer,
        uploader,
        ControllerOptions {
            accuracy_threshold_m: config.accuracy_threshold,
            event_type: config.event_type.clone(),
            default_interval_seconds: config.default_interval,
            default_endpoint: config.default_endpoint.clone(),
        },
    );
    if let Err(err) = controller.resume().await {
        warn!("Could not resume previous session, starting idle: {err:#}");
    }
    let (app_state, _controller_task) = controller.spawn();

    info!("Starting control API on {}:{}", config.address, config.port);

    // Start the HTTP server.
    Ok(HttpServer::new(move || {
        // Configure CORS to allow cross-origin requests from any origin.
        let cors = Cors::permissive();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(app_state.clone()))
            .service(handlers::enable_tracking)
            .service(handlers::disable_tracking)
            .service(handlers::update_interval)
            .service(handlers::tracking_status)
    })
    .bind((config.address.as_str(), config.port))? // Use parsed address and port
    .run()
    .await?)
}

#[actix_web::main]
async fn main() -> std::process::ExitCode {
    match real_main().await {
        Ok(()) => std::process::ExitCode::from(0),
        Err(err) => {
            error!("{err:#}");
            std::process::ExitCode::from(10)
        }
    }
}
