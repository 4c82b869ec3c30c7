//! Acquisition process: polls the vehicle bus (or the simulator) once per
//! tick, prints each reading as a JSON line on stdout, and forwards it to
//! the ingestion API when one is configured. Logs go to stderr so the
//! stdout data stream stays machine-readable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use obd_telemetry::client::IngestClient;
use obd_telemetry::config::{self, AcquireConfig};
use obd_telemetry::services::acquisition::{self, Acquisition};
use obd_telemetry::source;

fn run(shutdown: &AtomicBool) -> Result<(), String> {
    let cfg = AcquireConfig::from_env()?;
    info!(
        "Config loaded (device={}, baud={}, tick={}s, failure_threshold={}, ingest_url={})",
        cfg.device_path,
        cfg.baud_rate,
        cfg.tick_interval.as_secs(),
        cfg.failure_threshold,
        cfg.ingest_url.as_deref().unwrap_or("-"),
    );

    let client = cfg.ingest_url.as_deref().map(IngestClient::new);
    if client.is_none() {
        info!("Ingest URL disabled; readings go to stdout only");
    }

    let source = source::probe(&cfg);
    info!("Signal source ready: {}", source.name());

    let interval = cfg.tick_interval;
    let mut acq = Acquisition::new(cfg, source);
    let mut stdout = std::io::stdout();
    acquisition::run_loop(&mut acq, client.as_ref(), &mut stdout, interval, shutdown)?;

    info!("Acquisition loop stopped");
    Ok(())
}

fn main() {
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
        "obd-loop {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        eprintln!("fatal: installing interrupt handler failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&shutdown) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }

    if shutdown.load(Ordering::SeqCst) {
        info!("Interrupted; shut down cleanly");
    }
}
