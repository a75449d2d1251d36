//! Vigil Daemon
//!
//! Supervises leveraged positions: closes them on take-profit, stop-loss
//! or manual signal, records commissions and notifies downstream services.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p vigild
//!
//! # Start with custom environment
//! VIGIL_ENV=test VIGIL_API_PORT=8081 cargo run -p vigild
//!
//! # Database commands (postgres feature)
//! cargo run -p vigild --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `VIGIL_ENV`: Environment (test, development, production)
//! - `VIGIL_API_HOST` / `VIGIL_API_PORT`: API bind address (default: 0.0.0.0:8080)
//! - `VIGIL_SYMBOLS`: Supervised symbols as `SYMBOL:TP:SL,...`
//! - `VIGIL_MICROSERVICES`: Downstream services as `name=url,...`
//! - `VIGIL_LOG_FORMAT`: `text` (default) or `json`
//! - `DATABASE_URL`: PostgreSQL connection string (required in production)

#[cfg(feature = "postgres")]
mod db;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigild::config::LogFormat;
use vigild::{Config, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading the log format
    let _ = dotenvy::dotenv();
    init_tracing()?;

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        #[cfg(feature = "postgres")]
        return db::run_db_command(&args).await;

        #[cfg(not(feature = "postgres"))]
        anyhow::bail!("db commands require the postgres feature");
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        symbols = config.symbols.len(),
        "Vigil Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::from_config(config).await?;
    daemon.run().await?;

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("vigild=info,vigil_exec=info,vigil_connectors=info"))?;

    // Invalid values are reported by Config::from_env once logging is up
    let format = std::env::var("VIGIL_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or(LogFormat::Text);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
    }
    Ok(())
}
