//! Supervisor context: everything a task needs, passed explicitly.

use std::sync::Arc;

use vigil_exec::{
    DispatcherConfig, DownstreamClient, FearGreedProvider, HealthRegistry, OrderDispatcher, PriceOracle,
};
use vigil_store::Store;

use crate::config::Config;
use crate::error::DaemonResult;
use crate::event_bus::EventBus;
use crate::metrics::Metrics;
use crate::position_store::PositionStore;

/// Shared handles injected into every scheduled task, the signal path and
/// the API. Cloning is cheap.
#[derive(Clone)]
pub struct SupervisorContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub oracle: Arc<dyn PriceOracle>,
    pub fear_greed: Arc<dyn FearGreedProvider>,
    pub dispatcher: Arc<OrderDispatcher>,
    pub positions: Arc<PositionStore>,
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
}

impl SupervisorContext {
    /// Wire the context from configuration and collaborator ports.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        oracle: Arc<dyn PriceOracle>,
        fear_greed: Arc<dyn FearGreedProvider>,
        downstream: Arc<dyn DownstreamClient>,
    ) -> DaemonResult<Self> {
        let registry = Arc::new(HealthRegistry::new(&config.downstream.microservices));
        let dispatcher = Arc::new(OrderDispatcher::new(
            downstream,
            registry,
            Arc::clone(&store),
            DispatcherConfig {
                supervisor: config.supervisor_name.clone(),
                call_timeout: config.call_timeout,
                retry: config.downstream.retry,
            },
        ));
        let positions = Arc::new(PositionStore::new(Arc::clone(&store), config.persistence_retry));

        Ok(Self {
            config: Arc::new(config),
            store,
            oracle,
            fear_greed,
            dispatcher,
            positions,
            event_bus: Arc::new(EventBus::default()),
            metrics: Arc::new(Metrics::new()?),
        })
    }

    /// Restore persisted microservice health into the dispatcher's registry.
    pub async fn restore_health(&self) -> DaemonResult<usize> {
        let persisted = self.store.health().find_all().await?;
        let count = persisted.len();
        self.dispatcher.registry().restore(persisted).await;
        Ok(count)
    }
}
