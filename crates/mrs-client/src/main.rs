//! MRS probe
//!
//! Fetches server info from the configured server and, when `MRS_LAT` and
//! `MRS_LON` are set, runs a federated search there. Prints JSON to stdout.

use mrs_client::config::config_dir;
use mrs_client::{ClientConfig, FileStore, KeyRegistry, MrsClient};
use mrs_core::Location;
use serde_json::json;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn env_f64(name: &str) -> Option<f64> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable number");
            None
        }
    }
}

async fn run(client: &MrsClient) -> mrs_client::Result<serde_json::Value> {
    let info = client.server_info(None).await?;
    info!(
        server = %info.url,
        version = %info.mrs_version,
        peers = info.known_peers.len(),
        "Server reachable"
    );

    let search = match (env_f64("MRS_LAT"), env_f64("MRS_LON")) {
        (Some(lat), Some(lon)) => {
            let location = Location::new(lat, lon, env_f64("MRS_ELE").unwrap_or(0.0))?;
            let range = env_f64("MRS_RANGE").unwrap_or(0.0);
            Some(client.search(location, range).await?)
        }
        _ => None,
    };

    Ok(json!({"server": info, "search": search}))
}

#[tokio::main]
async fn main() -> ExitCode {
    let log_level = env::var("MRS_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = ClientConfig::from_env();
    let dir = config_dir();
    let registry = match KeyRegistry::load(Arc::new(FileStore::new(&dir))).await {
        Ok(registry) => registry,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Falling back to an in-memory key registry");
            KeyRegistry::in_memory()
        }
    };

    let client = match MrsClient::with_defaults(config, Arc::new(registry)) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create client");
            return ExitCode::FAILURE;
        }
    };

    info!(server = %client.config().effective_server(None), "Probing MRS server");

    match run(&client).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Failed to encode output");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "Probe failed");
            ExitCode::FAILURE
        }
    }
}
