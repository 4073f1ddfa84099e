use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

use clinicdb::api::rest::{self, RestApi};
use clinicdb::config::load_config;
use clinicdb::storage::persistence::PersistenceManager;
use clinicdb::storage::ClinicStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config = load_config(&config_path)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(path = %config.storage.path, "starting clinicdb");

    // Restore the last snapshot, if any
    let persistence = PersistenceManager::new(&config.storage.path)?;
    let store = match persistence.load()? {
        Some(snapshot) => {
            tracing::info!(
                clients = snapshot.clients.len(),
                procedures = snapshot.procedures.len(),
                materials = snapshot.materials.len(),
                visits = snapshot.visits.len(),
                "snapshot restored"
            );
            ClinicStore::from_snapshot(snapshot)
        }
        None => ClinicStore::new(),
    };
    let store = Arc::new(store);

    let sync = config.storage.sync_on_write.then(|| persistence.clone());
    let api = RestApi::new(Arc::clone(&store), sync);
    let routes = api.routes().with(rest::cors(&config.api)).with(warp::trace::request());

    let addr = config.socket_addr()?;
    tracing::info!(%addr, "starting server");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (_, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
        shutdown_rx.await.ok();
        tracing::info!("shutting down server");
    })?;
    let server_handle = tokio::spawn(server);

    signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, starting graceful shutdown");
    shutdown_tx.send(()).ok();
    server_handle.await?;

    // Flush everything to disk before exiting
    match persistence.save(&store.snapshot()) {
        Ok(()) => tracing::info!("store flushed to disk"),
        Err(e) => tracing::error!(error = %e, "error flushing store"),
    }

    tracing::info!("server shutdown complete");
    Ok(())
}
