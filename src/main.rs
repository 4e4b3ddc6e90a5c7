use anyhow::Result;
use chrono::Duration as ChronoDuration;
use sealdrop::{
    clock,
    config::AppConfig,
    routes::{BodyLimits, routes},
    services::{
        cache_store::MemoryCacheStore,
        rate_limiter::{RatePolicies, RateLimiter},
        retrieval::{RetrievalService, spawn_purger},
        session_store::SessionStore,
        upload::{UploadPipeline, spawn_sweeper},
    },
    state::AppState,
    storage::{DiskStorage, StorageBackend, disk::run_migrations},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{
    fs, io::ErrorKind, net::SocketAddr, path::Path, str::FromStr, sync::Arc, time::Duration,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting sealdrop with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
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
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    // --- Migrations are idempotent; --migrate stops after them ---
    run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let clock = clock::system();
    let storage: Arc<dyn StorageBackend> =
        Arc::new(DiskStorage::new(db.clone(), cfg.storage_dir.clone()));
    let cache = MemoryCacheStore::new(clock.clone());

    let sessions = SessionStore::new(
        Arc::new(cache.clone()),
        clock.clone(),
        ChronoDuration::minutes(cfg.session_ttl_minutes),
    );
    let uploads = UploadPipeline::new(storage.clone(), sessions, clock.clone());
    let retrieval = RetrievalService::new(
        storage.clone(),
        clock.clone(),
        Duration::from_secs(cfg.info_cache_ttl_secs),
    );

    let mut policies = RatePolicies::default();
    policies.upload.max_attempts = cfg.upload_limit;
    policies.download.max_attempts = cfg.download_limit;
    let limiter = RateLimiter::new(Arc::new(cache.clone()), policies);

    // --- Background maintenance ---
    let sweep_every = Duration::from_secs(cfg.sweep_interval_secs);
    spawn_sweeper(uploads.clone(), sweep_every);
    spawn_purger(retrieval.clone(), sweep_every);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            cache.cleanup_expired();
        }
    });

    // --- Build router ---
    let state = AppState {
        uploads,
        retrieval,
        limiter,
        storage,
    };
    let limits = BodyLimits {
        max_chunk_bytes: cfg.max_chunk_bytes,
        max_bundle_bytes: cfg.max_bundle_bytes,
    };
    let app = routes(state, limits);

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
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
