//! sentineld - door camera daemon
//!
//! This daemon:
//! 1. Loads config (JSON file named by SENTINEL_CONFIG, env overrides)
//! 2. Builds the detection pipeline (detector, face gallery, Telegram)
//! 3. Watches the camera until SIGINT/SIGTERM raises the stop flag
//!
//! It takes no flags; behavior is fully config-driven.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use door_sentinel::{Pipeline, SentinelConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SentinelConfig::load()?;
    log::info!(
        "sentineld {} starting (camera {}, data dir {})",
        env!("CARGO_PKG_VERSION"),
        config.camera.device,
        config.storage.detections_dir.display(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("termination signal received, stopping...");
        stop_flag.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let mut pipeline = Pipeline::new(config)?;
    pipeline.run(&stop)?;

    log::info!("shutdown complete");
    Ok(())
}
