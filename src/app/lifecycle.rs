// ABOUTME: Application - the lifecycle coordinator for one proxy run.
// ABOUTME: Connect upstreams, build routes concurrently, serve, then drain and disconnect.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, OptionsConfig};
use crate::error::{ProxyError, RegistryError};
use crate::mcp::McpClientInfo;
use crate::proxy::ProxyUnit;
use crate::registry::ConnectionRegistry;
use crate::server::{Frontend, RouteTable, apply_middleware, route_prefix};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Loading,
    Connecting,
    BuildingRoutes,
    Serving,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Created => "created",
            LifecycleState::Loading => "loading",
            LifecycleState::Connecting => "connecting",
            LifecycleState::BuildingRoutes => "building-routes",
            LifecycleState::Serving => "serving",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// What to do when some upstreams fail to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupPolicy {
    /// Abort only if a failed upstream has `panicIfInvalid` set.
    #[default]
    FromConfig,
    /// Any failure aborts the run.
    AbortOnFailure,
    /// Serve whatever connected.
    AllowPartial,
}

type ServerHandle = JoinHandle<std::io::Result<()>>;

/// Coordinates one proxy run from config to shutdown.
pub struct Application {
    config: Config,
    policy: StartupPolicy,
    registry: Arc<ConnectionRegistry>,
    routes: Arc<RouteTable>,
    state: watch::Sender<LifecycleState>,
    local_addr: Mutex<Option<SocketAddr>>,
    // Stops keep-alives and in-flight connects.
    cancel: CancellationToken,
    // Stops the listener and ends SSE streams so draining can finish.
    http_shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()))
    }

    /// Use a registry that may already hold some connections. Configured
    /// upstreams missing from it are created during loading.
    pub fn with_registry(mut config: Config, registry: Arc<ConnectionRegistry>) -> Self {
        config.apply_defaults();
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            config,
            policy: StartupPolicy::default(),
            registry,
            routes: Arc::new(RouteTable::new()),
            state,
            local_addr: Mutex::new(None),
            cancel: CancellationToken::new(),
            http_shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: StartupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    /// The bound listener address, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn set_state(&self, state: LifecycleState) {
        info!(state = %state, "Lifecycle transition");
        self.state.send_replace(state);
    }

    fn options_for(&self, name: &str) -> OptionsConfig {
        self.config
            .servers
            .get(name)
            .map(|u| u.options.clone())
            .unwrap_or_else(|| self.config.proxy.options.clone())
    }

    fn identity(&self) -> McpClientInfo {
        McpClientInfo::new(&self.config.proxy.name, &self.config.proxy.version)
    }

    /// Run until `shutdown` resolves, then drain and disconnect.
    ///
    /// Returns an error if startup fails; in that case `Serving` is never
    /// reached and every upstream is disconnected before returning.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        if self.state() != LifecycleState::Created {
            return Err(ProxyError::Startup("application already started".into()));
        }

        self.set_state(LifecycleState::Loading);
        if let Err(e) = self.load().await {
            error!(error = %e, "Failed to load config");
            self.set_state(LifecycleState::Stopped);
            return Err(e);
        }

        self.set_state(LifecycleState::Connecting);
        if let Err(e) = self.connect().await {
            error!(error = %e, "Aborting startup");
            self.abort().await;
            return Err(e);
        }

        self.set_state(LifecycleState::BuildingRoutes);
        let units = match self.build_routes().await {
            Ok(units) => units,
            Err(e) => {
                error!(error = %e, "Aborting startup");
                self.abort().await;
                return Err(e);
            }
        };

        let mut server = match self.listen().await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "Failed to start HTTP server");
                self.abort().await;
                return Err(e);
            }
        };

        self.set_state(LifecycleState::Serving);
        self.log_stats().await;

        let finished = tokio::select! {
            _ = shutdown => None,
            result = &mut server => Some(result),
        };

        self.set_state(LifecycleState::ShuttingDown);
        let outcome = match finished {
            None => {
                self.drain(server).await;
                Ok(())
            }
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => {
                error!(error = %e, "HTTP server stopped unexpectedly");
                Err(ProxyError::Io(e))
            }
            Some(Err(e)) => {
                error!(error = %e, "HTTP server task failed");
                Err(ProxyError::Startup(format!("server task failed: {}", e)))
            }
        };

        for unit in &units {
            if let Err(e) = unit.unbind() {
                warn!(upstream = %unit.name(), error = %e, "Unbind failed");
            }
        }
        self.disconnect().await;
        self.set_state(LifecycleState::Stopped);
        outcome
    }

    async fn load(&self) -> Result<(), ProxyError> {
        self.config.validate()?;
        for (name, upstream) in &self.config.servers {
            if self.registry.get(name).await.is_none() {
                self.registry.create_and_add(name, upstream).await?;
            }
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ProxyError> {
        let failures = match self.registry.connect_all(&self.identity(), &self.cancel).await {
            Ok(()) => return Ok(()),
            Err(RegistryError::ConnectFailed(failures)) => failures,
            Err(e) => return Err(e.into()),
        };

        let fatal = failures.all().iter().any(|f| match self.policy {
            StartupPolicy::AbortOnFailure => true,
            StartupPolicy::AllowPartial => false,
            StartupPolicy::FromConfig => self.options_for(&f.name).panic_if_invalid(),
        });
        if fatal {
            return Err(RegistryError::ConnectFailed(failures).into());
        }

        for failure in failures.all() {
            warn!(
                upstream = %failure.name,
                error = %failure.error,
                "Skipping upstream that failed to connect"
            );
        }
        Ok(())
    }

    /// Bind one proxy unit per connected upstream and mount its route.
    async fn build_routes(&self) -> Result<Vec<Arc<ProxyUnit>>, ProxyError> {
        let proxy = &self.config.proxy;
        let frontend = Frontend::new(
            proxy.frontend_kind()?,
            proxy.base_url.clone(),
            self.http_shutdown.clone(),
        );
        let base_path = proxy.base_path();

        let mut tasks = JoinSet::new();
        for upstream in self.registry.connected().await {
            let name = upstream.name().to_string();
            let unit = Arc::new(ProxyUnit::new(
                name.clone(),
                self.identity(),
                self.options_for(&name),
            ));
            let prefix = route_prefix(&base_path, &name);
            let frontend = frontend.clone();
            let routes = self.routes.clone();

            tasks.spawn(async move {
                unit.bind(&upstream).await?;
                let router = frontend.router(unit.name(), unit.endpoint());
                let router = apply_middleware(router, unit.name(), unit.options());
                routes.insert(prefix.clone(), router).await?;
                info!(upstream = %unit.name(), prefix = %prefix, "Mounted route");
                Ok::<_, ProxyError>(unit)
            });
        }

        let mut units = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(unit)) => units.push(unit),
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(ProxyError::Startup(format!("route build task failed: {}", e)));
                }
            }
        }
        Ok(units)
    }

    async fn listen(&self) -> Result<ServerHandle, ProxyError> {
        let addr = self.config.proxy.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let app = self.routes.compose().await;
        let mounted = self.routes.len().await;
        let signal = self.http_shutdown.clone().cancelled_owned();
        info!(addr = %local, routes = mounted, "Listening");

        Ok(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
        }))
    }

    async fn log_stats(&self) {
        for stats in self.registry.stats().await {
            info!(
                upstream = %stats.name,
                transport = %stats.kind,
                state = ?stats.state,
                keepalive = stats.needs_keepalive,
                last_error = ?stats.last_error,
                "Upstream status"
            );
        }
    }

    /// Stop accepting and wait up to the grace period for in-flight requests.
    async fn drain(&self, mut server: ServerHandle) {
        self.http_shutdown.cancel();
        let grace = self.config.proxy.shutdown_grace();
        match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(Ok(()))) => info!("HTTP server drained"),
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!(grace = ?grace, "Shutdown grace period elapsed, dropping in-flight requests");
                server.abort();
            }
        }
    }

    /// Cancel background work and disconnect every upstream, bounded by the
    /// shutdown grace period.
    async fn disconnect(&self) {
        self.http_shutdown.cancel();
        self.cancel.cancel();
        let grace = self.config.proxy.shutdown_grace();
        if tokio::time::timeout(grace, self.registry.disconnect_all())
            .await
            .is_err()
        {
            warn!(grace = ?grace, "Timed out disconnecting upstreams");
        }
    }

    async fn abort(&self) {
        self.disconnect().await;
        self.set_state(LifecycleState::Stopped);
    }
}
