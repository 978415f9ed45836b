use tracing_subscriber::EnvFilter;

use codeduel_codeforces::CodeforcesClient;
use codeduel_server::config::ServerConfig;
use codeduel_server::engine::MatchEngine;
use codeduel_server::spawn_maintenance;
use codeduel_server::store::MatchStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Codeduel engine starting");

    let config = ServerConfig::load();
    config.validate();

    let store = match MatchStore::connect(&config.database.url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            std::process::exit(1);
        },
    };

    let judge = CodeforcesClient::new(config.codeforces.clone());
    let engine = MatchEngine::new(config, store, judge);
    spawn_maintenance(engine.clone());

    // The transport host embeds this crate and drives
    // `MatchEngine::dispatch`; the standalone binary supervises until
    // shutdown.
    tracing::info!("Match engine ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
