//! Ingestion service: HTTP API over the SQLite reading/trip store.

use log::{error, info};

use obd_telemetry::config::{self, ServerConfig};
use obd_telemetry::services::api::{self, AppState};
use obd_telemetry::services::store::Store;

async fn run() -> Result<(), String> {
    let cfg = ServerConfig::from_env()?;
    info!("Config loaded (database_url={}, bind_addr={})", cfg.database_url, cfg.bind_addr);

    let store = Store::open(&cfg.database_url)?;
    info!("Database ready at {}", cfg.database_url);

    let app = api::router(AppState::new(store));
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .map_err(|e| format!("binding {} failed: {}", cfg.bind_addr, e))?;
    info!("Listening on {}", cfg.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("installing interrupt handler failed: {}", e);
            }
            info!("Interrupt received; shutting down");
        })
        .await
        .map_err(|e| format!("server failed: {}", e))
}

#[tokio::main]
async fn main() {
    let loaded_env = match config::configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "api-server {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    if let Err(e) = run().await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
