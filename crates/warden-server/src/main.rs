use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_core::schema::SchemaRegistry;
use warden_server::cli::{Cli, Command};
use warden_server::config::{AppConfig, LogFormat, StorageBackend};
use warden_server::rest;
use warden_server::service::PermissionService;
use warden_storage::{InMemoryStore, PostgresStore, RelationshipStore, SchemaStore};

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        Some(Command::CheckSchema { file }) => run_check_schema(&config, &file),
        Some(Command::Serve) | None => run_serve(config).await,
    }
}

async fn connect_postgres(config: &AppConfig) -> Result<PostgresStore, Box<dyn std::error::Error>> {
    let url = config
        .storage
        .database_url
        .as_deref()
        .ok_or("storage.database_url is required for the postgres backend")?;
    Ok(PostgresStore::connect(url, config.storage.max_connections).await?)
}

async fn run_migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("running database migrations");
    let store = connect_postgres(config).await?;
    store.migrate().await?;
    tracing::info!("migrations completed successfully");
    Ok(())
}

fn run_check_schema(config: &AppConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let registry = SchemaRegistry::new(config.to_schema_limits());

    match registry.compile(&source) {
        Ok(schema) => {
            println!("{}: ok ({} types)", file.display(), schema.types.len());
            Ok(())
        }
        Err(err) => {
            eprintln!("{}: {err}", file.display());
            Err("schema is invalid".into())
        }
    }
}

async fn run_serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Memory => serve(Arc::new(InMemoryStore::new()), &config).await,
        StorageBackend::Postgres => {
            let store = connect_postgres(&config).await?;
            serve(Arc::new(store), &config).await
        }
    }
}

async fn serve<S>(store: Arc<S>, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let addr: SocketAddr = config.http_addr().parse()?;
    tracing::info!(
        %addr,
        backend = ?config.storage.backend,
        "starting warden server"
    );

    let service = Arc::new(PermissionService::new(
        store,
        config.to_engine_config(),
        config.to_schema_limits(),
        config.to_cache_config(),
    ));
    service.bootstrap().await?;

    let router = rest::create_router(rest::AppState::new(service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }
}
