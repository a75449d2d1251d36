//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Supervisor context (store, ports, dispatcher, position cache)
//! - Scheduler (periodic tasks)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Wire components from configuration
//! 2. Restore microservice health and active positions from storage
//! 3. Probe downstream health once
//! 4. Start API server and scheduler
//! 5. Wait for SIGINT
//! 6. Cancel, let in-flight cycles finish, join

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_connectors::{HttpDownstreamClient, HttpFearGreedProvider, HttpPriceOracle};
use vigil_exec::{DownstreamClient, FearGreedProvider, PriceOracle, StubDownstream, StubFearGreed, StubPriceOracle};
use vigil_store::{MemoryStore, Store};

use crate::api::create_router;
use crate::config::{Config, Environment};
use crate::context::SupervisorContext;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::DaemonEvent;
use crate::scheduler::Scheduler;

// =============================================================================
// Daemon
// =============================================================================

/// The main Vigil daemon.
pub struct Daemon {
    ctx: SupervisorContext,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a daemon around an already wired context.
    pub fn new(ctx: SupervisorContext) -> Self {
        Self {
            ctx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire a daemon from configuration.
    ///
    /// The test environment runs on stubs. Otherwise the HTTP connectors
    /// are used, with PostgreSQL storage when a database URL is configured.
    pub async fn from_config(config: Config) -> DaemonResult<Self> {
        let store = build_store(&config).await?;

        let ctx = if config.environment == Environment::Test {
            SupervisorContext::new(
                config,
                store,
                Arc::new(StubPriceOracle::new()),
                Arc::new(StubFearGreed::new(50)),
                Arc::new(StubDownstream::new()),
            )?
        } else {
            let oracle: Arc<dyn PriceOracle> = Arc::new(
                HttpPriceOracle::new(config.oracle.price_url.clone(), config.call_timeout)
                    .map_err(|e| DaemonError::Config(format!("Price oracle client: {}", e)))?,
            );
            let fear_greed: Arc<dyn FearGreedProvider> = Arc::new(
                HttpFearGreedProvider::new(
                    config.oracle.fear_greed_url.clone(),
                    config.call_timeout,
                    config.oracle.bands,
                )
                .map_err(|e| DaemonError::Config(format!("Fear & Greed client: {}", e)))?,
            );
            let downstream: Arc<dyn DownstreamClient> = Arc::new(
                HttpDownstreamClient::new(config.call_timeout)
                    .map_err(|e| DaemonError::Config(format!("Downstream client: {}", e)))?,
            );
            SupervisorContext::new(config, store, oracle, fear_greed, downstream)?
        };

        Ok(Self::new(ctx))
    }

    pub fn context(&self) -> &SupervisorContext {
        &self.ctx
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Run the daemon until `signal` resolves or the shutdown token is cancelled.
    pub async fn run_until<F>(self, signal: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.ctx.config.environment,
            supervisor = %self.ctx.config.supervisor_name,
            "Starting Vigil daemon"
        );

        // 1. Restore state; storage must be reachable to start
        let restored = self.ctx.restore_health().await?;
        let positions = self.ctx.positions.load_active().await?;
        info!(microservices = restored, positions = positions.len(), "State restored from store");

        // 2. Initial health probe so queued orders can drain right away
        for change in self.ctx.dispatcher.probe_health().await {
            self.ctx.event_bus.send(DaemonEvent::HealthChanged(change));
        }

        // 3. API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 4. Scheduler
        let mut scheduler = Scheduler::new(self.ctx.clone(), self.shutdown.clone());
        scheduler.start();

        // 5. Wait
        tokio::select! {
            _ = signal => info!("Received shutdown signal"),
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }

        // 6. Graceful shutdown
        self.shutdown.cancel();
        self.ctx.event_bus.send(DaemonEvent::Shutdown);
        scheduler.join().await;

        info!(supervised_positions = self.ctx.positions.len().await, "Shutdown complete");
        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let router = create_router(self.ctx.clone());
        let addr = format!("{}:{}", self.ctx.config.api.host, self.ctx.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

#[cfg(feature = "postgres")]
async fn build_store(config: &Config) -> DaemonResult<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url)
                .await
                .map_err(|e| DaemonError::Config(format!("Failed to connect to database: {}", e)))?;
            info!("Using PostgreSQL store");
            Ok(Arc::new(vigil_store::PgStore::new(Arc::new(pool))))
        },
        None => memory_store(config, "DATABASE_URL not set"),
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_store(config: &Config) -> DaemonResult<Arc<dyn Store>> {
    if config.database_url.is_some() && config.environment != Environment::Test {
        return Err(DaemonError::Config(
            "DATABASE_URL is set but vigild was built without the postgres feature".to_string(),
        ));
    }
    memory_store(config, "built without the postgres feature")
}

/// In-memory storage, which loses every position and queued order on restart.
///
/// Refused in production; development runs on it with a warning.
fn memory_store(config: &Config, reason: &str) -> DaemonResult<Arc<dyn Store>> {
    match config.environment {
        Environment::Production => Err(DaemonError::Config(format!(
            "No durable store ({}), production requires PostgreSQL",
            reason
        ))),
        Environment::Development => {
            warn!(reason, "No durable store, state is kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        },
        Environment::Test => Ok(Arc::new(MemoryStore::new())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_daemon_from_test_config() {
        let daemon = Daemon::from_config(Config::test()).await.unwrap();
        assert!(daemon.context().positions.is_empty().await);
    }

    #[tokio::test]
    async fn test_production_without_durable_store_is_fatal() {
        let mut config = Config::test();
        config.environment = Environment::Production;

        let result = Daemon::from_config(config).await;
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_database_url_without_postgres_feature_is_fatal() {
        for environment in [Environment::Production, Environment::Development] {
            let mut config = Config::test();
            config.environment = environment;
            config.database_url = Some("postgres://localhost/vigil".to_string());

            let result = Daemon::from_config(config).await;
            assert!(matches!(result, Err(DaemonError::Config(_))));
        }
    }

    #[test]
    fn test_development_falls_back_to_memory() {
        let mut config = Config::test();
        config.environment = Environment::Development;
        assert!(memory_store(&config, "no database").is_ok());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::from_config(Config::test()).await.unwrap();

        let addr = daemon.start_api_server().await.unwrap();
        assert!(addr.port() > 0);

        daemon.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_daemon_runs_until_cancelled() {
        let daemon = Daemon::from_config(Config::test()).await.unwrap();
        let token = daemon.shutdown_token();
        let mut events = daemon.context().event_bus.subscribe();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            token.cancel();
        });

        daemon.run_until(std::future::pending()).await.unwrap();

        assert!(events.drain().iter().any(|e| matches!(e, DaemonEvent::Shutdown)));
    }
}
