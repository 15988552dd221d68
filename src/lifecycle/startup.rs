//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and open the cache
//! - Initialize subsystems in dependency order
//! - Start background tasks (monitor, continuation poller)
//! - Bind listeners last, once routing has samples
//! - Shut everything down in reverse order

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::context::GatewayContext;
use crate::admin::{self, AdminState};
use crate::cache::{CacheError, CacheStore, MemoryStore, QueryCache};
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::watcher::ConfigWatcher;
use crate::continuation::{
    BackendResolver, ClientError, ContinuationPoller, HttpQueryEngineClient, RetryPolicy,
};
use crate::health::{ClusterMonitor, ClusterStats, StatsSnapshot};
use crate::http::{HttpServer, ProxyHooks};
use crate::load_balancer::WeightedRoutingTable;
use crate::registry::{BackendRegistry, StaticRegistry};
use crate::routing::{QueryAffinityRouter, RoutingPolicy};

/// Time listeners get to finish after the context is triggered.
const LISTENER_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create continuation client: {0}")]
    Client(#[from] ClientError),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Entry point that wires the gateway together.
pub struct Gateway;

impl Gateway {
    pub async fn start(config: GatewayConfig) -> Result<GatewayHandle, StartupError> {
        validate_config(&config).map_err(StartupError::Validation)?;
        let started_at = Instant::now();

        let ttl = Duration::from_secs(config.cache.ttl_secs);
        let store = Arc::new(match &config.cache.snapshot_path {
            Some(path) => MemoryStore::load_from_file(Path::new(path), ttl)?,
            None => MemoryStore::new(ttl),
        });
        store.validate_connection()?;
        let cache = QueryCache::new(store.clone());

        let context = Arc::new(GatewayContext::new());
        let registry = Arc::new(StaticRegistry::from_config(&config));
        let table = Arc::new(WeightedRoutingTable::new(config.gateway.adhoc_group.clone()));
        let router = Arc::new(QueryAffinityRouter::new(
            RoutingPolicy::default(),
            table.clone(),
            cache.clone(),
            config.gateway.local_application_port,
        ));

        let poller = if config.continuation.enabled {
            let client = HttpQueryEngineClient::new(Duration::from_secs(config.continuation.request_timeout_secs))?;
            let resolver: Arc<dyn BackendResolver> = router.clone();
            let poller = Arc::new(ContinuationPoller::new(
                Arc::new(client),
                cache.clone(),
                RetryPolicy::from_config(&config.retries),
                Some(resolver),
                context.clone(),
                &config.continuation,
            ));
            poller.start();
            Some(poller)
        } else {
            tracing::info!("Continuation poller disabled");
            None
        };

        let stats = Arc::new(StatsSnapshot::new());
        let monitor = Arc::new(
            ClusterMonitor::new(registry.clone(), table.clone(), config.monitor.clone())
                .with_observer(stats.clone()),
        );
        let mut tasks = Vec::new();
        if config.monitor.enabled {
            let sampled = monitor.run_once().await;
            tracing::info!(
                backends = sampled.len(),
                healthy = sampled.iter().filter(|s| s.healthy).count(),
                "Initial cluster stats collected"
            );
            tasks.push(tokio::spawn(monitor.clone().run(context.clone())));
        }

        if let Some(poller) = &poller {
            poller.resume_dropped();
        }

        let hooks = Arc::new(ProxyHooks::new(router.clone(), cache.clone(), poller.clone()));
        let listener = bind(&config.listener.bind_address).await?;
        let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;
        let server = HttpServer::new(hooks, &config);
        {
            let context = context.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(listener, context).await {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            }));
        }

        let mut admin_addr = None;
        if config.admin.enabled {
            let listener = bind(&config.admin.bind_address).await?;
            admin_addr = listener.local_addr().ok();
            let state = AdminState {
                registry: registry.clone(),
                table: table.clone(),
                router: router.clone(),
                stats: stats.clone(),
                context: context.clone(),
                started_at,
            };
            tasks.push(tokio::spawn(async move {
                if let Err(e) = admin::serve(listener, state).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }));
        }

        tracing::info!(
            address = %local_addr,
            backends = config.backends.len(),
            "Gateway started"
        );

        Ok(GatewayHandle {
            context,
            local_addr,
            admin_addr,
            registry,
            table,
            router,
            cache,
            store,
            poller,
            monitor,
            stats,
            tasks,
            watcher: None,
        })
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

/// A running gateway.
pub struct GatewayHandle {
    context: Arc<GatewayContext>,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    registry: Arc<StaticRegistry>,
    table: Arc<WeightedRoutingTable>,
    router: Arc<QueryAffinityRouter>,
    cache: QueryCache,
    store: Arc<MemoryStore>,
    poller: Option<Arc<ContinuationPoller>>,
    monitor: Arc<ClusterMonitor>,
    stats: Arc<StatsSnapshot>,
    tasks: Vec<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    pub fn registry(&self) -> &Arc<StaticRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<WeightedRoutingTable> {
        &self.table
    }

    pub fn router(&self) -> &Arc<QueryAffinityRouter> {
        &self.router
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<StatsSnapshot> {
        &self.stats
    }

    /// Force a monitor cycle now.
    pub async fn refresh(&self) -> Vec<ClusterStats> {
        self.monitor.run_once().await
    }

    /// Reload cluster membership whenever the config file changes.
    pub fn watch_config(&mut self, path: &Path) -> Result<(), notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        self.watcher = Some(watcher.run()?);

        let registry = self.registry.clone();
        let table = self.table.clone();
        let context = self.context.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => apply_membership(&registry, &table, &config),
                        None => break,
                    },
                    _ = context.cancelled() => break,
                }
            }
        });
        Ok(())
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        self.context.cancelled().await;
    }

    /// Ordered shutdown: stop traffic and the monitor, drain the poller, save the cache.
    pub async fn shutdown(self) {
        self.context.trigger();
        drop(self.watcher);

        if let Some(poller) = &self.poller {
            poller.shutdown().await;
        }

        for task in self.tasks {
            match tokio::time::timeout(LISTENER_DRAIN, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Gateway task panicked"),
                Err(_) => tracing::warn!("Gateway task did not stop in time"),
            }
        }

        if let Err(e) = self.store.save_to_file() {
            tracing::error!(error = %e, "Failed to save cache snapshot");
        }
        tracing::info!("Gateway stopped");
    }
}

/// Push reloaded membership into the registry and drop departed backends from routing.
fn apply_membership(registry: &StaticRegistry, table: &WeightedRoutingTable, config: &GatewayConfig) {
    registry.replace(config);

    let backends = registry.list_backends();
    let known: Vec<String> = table.snapshot().queue_lengths.keys().cloned().collect();

    for group in known {
        let active: HashSet<String> = backends
            .iter()
            .filter(|b| b.active && b.routing_group == group)
            .map(|b| b.name.clone())
            .collect();
        table.prune_group_members(&group, &active);
    }
}
