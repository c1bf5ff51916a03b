// src/main.rs
mod api;
mod config;
mod distance;
mod geometry;
mod model;
mod normalizer;
mod ranker;

use config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    let api_config = app_config.api.clone();
    let routing_config = app_config.routing.clone();
    let engine_config = app_config.engine.clone();

    println!("🚀 SWMP Optimiser starting...");
    api::start_api_server(api_config, engine_config, routing_config).await;
}
