//! Application launcher.
//!
//! # Responsibilities
//! - Own the servers and periodic workers of one service
//! - Start each on its own task and wait for all of them
//! - Turn SIGINT/SIGTERM into the shutdown broadcast
//!
//! # Design Decisions
//! - Servers are numbered from 1 in setup order
//! - A server failing to start shuts the others down; its error is returned
//! - `launch` runs once; later calls return immediately

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::Protocol;
use crate::binary::BinaryServer;
use crate::config::{RuntimeConfig, ServerConfig};
use crate::error::RuntimeError;
use crate::http::HttpServer;
use crate::lifecycle::{signalled, spawn_signal_handler, Shutdown};
use crate::net::local_hostname;
use crate::server::{ApiServer, ServerLimits};

type WorkerTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A task run after `delay`, then every `period`. A zero period runs it once.
struct Worker {
    id: usize,
    delay: Duration,
    period: Duration,
    task: WorkerTask,
}

pub struct App {
    name: String,
    hostname: Arc<str>,
    servers: Vec<Box<dyn ApiServer>>,
    workers: Vec<Worker>,
    shutdown: Shutdown,
    handle_signals: bool,
    launched: bool,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: Arc::from(local_hostname()),
            servers: Vec::new(),
            workers: Vec::new(),
            shutdown: Shutdown::new(),
            handle_signals: true,
            launched: false,
        }
    }

    /// Build the app and its servers from configuration.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let mut app = Self::new(config.app.name.clone());
        if let Some(hostname) = &config.app.hostname {
            app = app.with_hostname(hostname.as_str());
        }
        for server in &config.servers {
            app.setup_configured_server(server)?;
        }
        Ok(app)
    }

    /// Hostname stamped on responses of servers set up afterwards.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Arc::from(hostname);
        self
    }

    /// Leave signal handling to the embedder.
    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Handle to stop a launched app from elsewhere.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn servers(&self) -> impl Iterator<Item = &dyn ApiServer> {
        self.servers.iter().map(|s| s.as_ref())
    }

    pub fn servers_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ApiServer>> {
        self.servers.iter_mut()
    }

    /// Create a server for `protocol` with default limits.
    pub fn setup_api_server(&mut self, protocol: Protocol) -> &mut dyn ApiServer {
        self.push_server(protocol, ServerLimits::default())
    }

    /// Create a server from its configuration: limits, port and TLS port.
    pub fn setup_configured_server(
        &mut self,
        config: &ServerConfig,
    ) -> Result<&mut dyn ApiServer, RuntimeError> {
        let server = self.push_server(config.protocol, ServerLimits::from(config));
        server.expose(config.port);
        if let (Some(port), Some(tls)) = (config.ssl_port, &config.tls) {
            server.expose_ssl(port, tls.clone())?;
        }
        Ok(server)
    }

    fn push_server(&mut self, protocol: Protocol, limits: ServerLimits) -> &mut dyn ApiServer {
        let id = self.servers.len() + 1;
        let hostname = Arc::clone(&self.hostname);
        let server: Box<dyn ApiServer> = match protocol {
            Protocol::Http => Box::new(HttpServer::new(id, hostname).with_limits(limits)),
            Protocol::Binary => Box::new(BinaryServer::new(id, hostname).with_limits(limits)),
        };
        debug!(server_id = id, protocol = %protocol, "API server set up");
        self.servers.push(server);
        self.servers[id - 1].as_mut()
    }

    /// Run `task` after `delay`, then every `period`.
    pub fn setup_worker<F, Fut>(&mut self, delay: Duration, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.workers.len() + 1;
        self.workers.push(Worker {
            id,
            delay,
            period,
            task: Arc::new(move || Box::pin(task())),
        });
    }

    /// Start every server and worker and wait until all have stopped.
    pub async fn launch(&mut self) -> Result<(), RuntimeError> {
        if self.launched {
            warn!(app = %self.name, "App already launched");
            return Ok(());
        }
        self.launched = true;

        let signals = self
            .handle_signals
            .then(|| spawn_signal_handler(self.shutdown.clone()));

        let mut tasks = JoinSet::new();
        for server in self.servers.drain(..) {
            tasks.spawn(server.start(self.shutdown.subscribe()));
        }
        for worker in self.workers.drain(..) {
            tasks.spawn(run_worker(worker, self.shutdown.subscribe()));
        }

        info!(
            app = %self.name,
            hostname = %self.hostname,
            tasks = tasks.len(),
            "App launched"
        );

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => RuntimeError::Internal(e.to_string()),
            };
            error!(app = %self.name, error = %failure, "App task failed");
            self.shutdown.trigger();
            first_error.get_or_insert(failure);
        }

        if let Some(signals) = signals {
            signals.abort();
        }
        info!(app = %self.name, "App stopped");
        first_error.map_or(Ok(()), Err)
    }
}

async fn run_worker(
    worker: Worker,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    tokio::select! {
        _ = signalled(&mut shutdown) => return Ok(()),
        _ = tokio::time::sleep(worker.delay) => {}
    }

    if worker.period.is_zero() {
        (worker.task)().await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(worker.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = signalled(&mut shutdown) => break,
            _ = ticker.tick() => {
                debug!(worker_id = worker.id, "Worker tick");
                (worker.task)().await;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn servers_are_numbered_from_one() {
        let mut app = App::new("orders").with_hostname("box-1");
        assert_eq!(app.setup_api_server(Protocol::Http).id(), 1);
        let binary = app.setup_api_server(Protocol::Binary);
        assert_eq!(binary.id(), 2);
        assert_eq!(binary.protocol(), Protocol::Binary);
        assert_eq!(binary.hostname(), "box-1");
    }

    #[test]
    fn config_hostname_overrides_os() {
        let config = RuntimeConfig {
            app: AppConfig {
                name: "orders".into(),
                hostname: Some("pinned".into()),
            },
            servers: vec![ServerConfig {
                protocol: Protocol::Binary,
                ..Default::default()
            }],
            ..Default::default()
        };
        let app = App::from_config(&config).unwrap();
        assert_eq!(app.hostname(), "pinned");
        assert_eq!(app.servers().count(), 1);
    }

    #[tokio::test]
    async fn workers_tick_until_shutdown_and_launch_is_idempotent() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut app = App::new("jobs").without_signal_handler();
        let counter = Arc::clone(&ticks);
        app.setup_worker(Duration::from_millis(5), Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let once = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&once);
        app.setup_worker(Duration::ZERO, Duration::ZERO, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let shutdown = app.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            shutdown.trigger();
        });

        tokio::time::timeout(Duration::from_secs(2), app.launch())
            .await
            .unwrap()
            .unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert_eq!(once.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_millis(100), app.launch())
            .await
            .unwrap()
            .unwrap();
    }
}
