//! Dalmux server
//!
//! Serves the demo domain over the remote socket protocol and HTTP.
//!
//! Usage: `dalmux-server [config.json]`. The config path may also be given in
//! `DALMUX_CONFIG`; `DALMUX_*` variables override individual settings.

mod demo;

use std::path::PathBuf;

use anyhow::Context;
use dalmux_core::domain::registry;
use dalmux_gateway::{Gateway, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const LOG_PREFIX: &str = "dalmux";

fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("dalmux").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Console plus daily rolling file output. The guard must be held for the
/// lifetime of the process or buffered file lines are lost.
fn init_tracing() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    dotenvy::dotenv().ok();

    let logs_dir = logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // dalmux.2026-01-22.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive("dalmux_core=debug".parse()?)
            .add_directive("dalmux_storage=debug".parse()?)
            .add_directive("dalmux_gateway=debug".parse()?)
            .add_directive("dalmux_server=debug".parse()?)
            .add_directive("tower_http=info".parse()?),
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    info!("[Server] Logging to {}", logs_dir.display());
    Ok(guard)
}

fn load_config() -> anyhow::Result<ServerConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DALMUX_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = match path {
        Some(path) => {
            info!("[Config] Loading {}", path.display());
            ServerConfig::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => {
            info!("[Config] No config file given, using defaults");
            ServerConfig::default()
        }
    };
    config
        .apply_env()
        .context("invalid DALMUX_* environment override")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_tracing()?;
    info!(
        "[Server] dalmux-server {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_config()?;

    let domain = demo::domain().context("failed to define demo domain")?;
    registry::register(domain).context("failed to register demo domain")?;

    let server = Gateway::open_server(&config, demo::operations())?;
    server
        .pools()
        .database()
        .execute_batch(demo::SCHEMA)
        .context("failed to create demo schema")?;
    info!("[Server] Domain '{}' ready", demo::DOMAIN);

    let gateway = Gateway::new(config, server);
    let token = CancellationToken::new();

    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("[Server] Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => error!("[Server] Failed to listen for ctrl-c: {}", e),
        }
    });

    gateway.run(token).await?;
    info!("[Server] Stopped");
    Ok(())
}
