use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod backends;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::BackendConfig;
use services::{catalog::Catalog, gateway::Gateway, registry::BackendRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-gateway with config: {:?}", cfg);

    // --- Ensure local backend roots exist ---
    for backend in &cfg.backends {
        if let BackendConfig::Local { root, .. } = backend {
            if !root.exists() {
                tokio::fs::create_dir_all(root).await?;
                tracing::info!("Created storage directory at {}", root.display());
            }
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_url = if db_url.contains('?') || db_url.contains(":memory:") {
        db_url.clone()
    } else {
        format!("{}?mode=rwc", db_url)
    };
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connect_url)
            .await?,
    );
    let catalog = Catalog::new(db);

    // --- Handle migration mode ---
    catalog.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize gateway ---
    let registry = BackendRegistry::from_config(&cfg.backends);
    tracing::info!("Registered backends: {:?}", registry.names());
    let gateway = Gateway::new(catalog, registry, cfg.default_backend.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(gateway);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
