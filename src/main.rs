mod capture;
mod config;
mod db;
mod ocr;
mod plate;
mod server;
mod types;

use crate::config::Config;
use crate::ocr::OcrClient;
use crate::server::AppState;
use env_logger::Env;
use failure::ResultExt;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::Mutex;

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-scanner");

    if let Err(e) = run().await {
        error!("{}", e);
        for cause in e.iter_causes() {
            error!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), failure::Error> {
    let config = Config::from_env()?;

    let mut conn = db::open(&config.history_db)
        .with_context(|_| format!("Unable to open history db {:?}", config.history_db))?;
    if let Some(seed) = &config.history_seed {
        let count = db::import_seed(&mut conn, seed)
            .with_context(|_| format!("Unable to import history seed {:?}", seed))?;
        info!("Imported {} new visits from {:?}", count, seed);
    }
    if let Some(dir) = &config.capture_dir {
        std::fs::create_dir_all(dir)
            .with_context(|_| format!("Unable to create capture dir {:?}", dir))?;
    }

    let state = AppState {
        ocr: OcrClient::new(&config),
        config: Arc::new(config),
        db: Arc::new(Mutex::new(conn)),
    };
    server::run(state).await;
    Ok(())
}
