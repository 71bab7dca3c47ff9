//! fishlore server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fishlore_core::config::{AppConfig, PrivateKeyConfig, SigningConfig};
use fishlore_server::bootstrap::ensure_admin_token;
use fishlore_server::purge::{recover_orphaned_purge_jobs, spawn_scheduler};
use fishlore_server::{AppState, PurgeTaskRegistry, create_router};
use fishlore_signer::{GrantSigner, SecretKey};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// fishlore - indigenous fish knowledge catalog server
#[derive(Parser, Debug)]
#[command(name = "fishlored")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "FISHLORE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("fishlore v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; FISHLORE_ env vars can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("FISHLORE_") && key != "FISHLORE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: fishlored --config /path/to/config.toml\n  \
             2. Environment variables: FISHLORE_SERVER__BIND=0.0.0.0:8080 \
             FISHLORE_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE fishlored\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FISHLORE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let warnings = config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    for warning in warnings {
        tracing::warn!("{warning}");
    }

    fishlore_server::metrics::register_metrics();

    let storage = fishlore_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Fail fast instead of reporting healthy with unreachable storage.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = fishlore_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_admin_token(metadata.as_ref(), &config.admin).await?;

    let recovered = recover_orphaned_purge_jobs(&metadata)
        .await
        .context("failed to recover orphaned purge jobs")?;
    if recovered > 0 {
        tracing::info!(recovered, "Orphaned purge jobs marked failed");
    }

    let grant_signer = load_grant_signer(config.signing.as_ref())?;

    let purge_tasks = Arc::new(PurgeTaskRegistry::new(metadata.clone()));
    let _watchdog_handle = purge_tasks.clone().spawn_watchdog();

    let state = AppState::new(config.clone(), storage, metadata, grant_signer, purge_tasks);

    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        fishlore_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    if config.purge.auto_schedule_enabled {
        spawn_scheduler(state.clone());
    } else {
        tracing::info!("Automatic purge scheduling disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo feeds client IPs to the rate limiter.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Load the upload grant signer from configuration.
///
/// Without a configured key an ephemeral one is generated; outstanding
/// server-hosted upload URLs then stop working on restart.
fn load_grant_signer(config: Option<&SigningConfig>) -> Result<GrantSigner> {
    let Some(config) = config else {
        tracing::warn!("No signing key configured, generating an ephemeral grant key");
        return Ok(GrantSigner::generate());
    };

    let key = match &config.private_key {
        PrivateKeyConfig::File { path } => SecretKey::from_file(path)
            .with_context(|| format!("failed to load signing key: {}", path.display()))?,
        PrivateKeyConfig::Env { var } => {
            let value = std::env::var(var)
                .with_context(|| format!("signing key env var not set: {var}"))?;
            SecretKey::from_base64(value.trim()).context("failed to parse signing key")?
        }
        PrivateKeyConfig::Value { key } => {
            tracing::warn!("Using inline signing key (not recommended for production)");
            SecretKey::from_base64(key.trim()).context("failed to parse signing key")?
        }
        PrivateKeyConfig::Generate => {
            tracing::warn!("Generating ephemeral grant key (not suitable for production)");
            SecretKey::generate()
        }
    };

    let signer = GrantSigner::new(key);
    tracing::info!(public_key = %signer.public_key_base64(), "Upload grant signer ready");
    Ok(signer)
}
