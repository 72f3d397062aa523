use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, instrument, warn};

use crate::config::{ListenerConfig, ProxyConfig};
use crate::core::obfuscation::DirectoryKeystreamProvider;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::pipeline::Pipeline;
use crate::protocol::redirect::LoginRedirect;
use crate::protocol::registry::ProtocolRegistry;
use crate::protocol::schema::SchemaBundle;
use crate::protocol::session::SessionContext;
use crate::transport::relay::{RelayListener, RemoteTarget};
use crate::utils::metrics::global_metrics;

/// Every configured listener, one shared session, one schema registry
pub struct ProxyService {
    config: ProxyConfig,
    registry: Arc<ProtocolRegistry>,
    session: Arc<SessionContext>,
    default_dispatcher: Arc<Dispatcher>,
    dispatchers: HashMap<String, Arc<Dispatcher>>,
}

impl ProxyService {
    /// Load the schema and the initial keystream table. Either failing is fatal.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let bundle = SchemaBundle::from_file(&config.schema.path)?;
        let registry = ProtocolRegistry::new(bundle);
        registry.load()?;

        let provider = Arc::new(DirectoryKeystreamProvider::new(&config.keystream.directory));
        let session =
            SessionContext::new(provider).with_table_version(config.keystream.table_version);
        if let Some(table) = config.keystream.initial_table {
            session.init_keystream(table)?;
        }

        Ok(Self::with_parts(config, Arc::new(registry), Arc::new(session)))
    }

    /// Service over an already-built registry and session
    pub fn with_parts(
        config: ProxyConfig,
        registry: Arc<ProtocolRegistry>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            config,
            registry,
            session,
            default_dispatcher: Arc::new(Dispatcher::new()),
            dispatchers: HashMap::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// Handlers for connections on listener `name`, created on first use
    pub fn dispatcher(&mut self, name: &str) -> Arc<Dispatcher> {
        Arc::clone(self.dispatchers.entry(name.to_string()).or_default())
    }

    /// Handlers for listeners without their own dispatcher
    pub fn default_dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.default_dispatcher)
    }

    fn pipeline_for(&self, name: &str) -> Pipeline {
        let dispatcher = self
            .dispatchers
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_dispatcher));
        Pipeline::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.session),
            dispatcher,
        )
    }

    /// Bind every configured listener and start relaying.
    ///
    /// A listener that cannot bind fails the whole start.
    pub async fn start(mut self) -> Result<ProxyHandle> {
        let (spawn_tx, spawn_rx) = mpsc::unbounded_channel();

        if let Some(login) = self.config.redirect.login_listener.clone() {
            let mut redirect = LoginRedirect::new(&self.config.redirect);
            if self.config.redirect.spawn_world_listeners {
                redirect = redirect.with_spawner(spawn_tx.clone());
            }
            redirect.install(&self.dispatcher(&login))?;
            info!(listener = %login, "Login redirect installed");
        }

        let mut supervisor = Supervisor {
            listeners: JoinSet::new(),
            shutdown_senders: Vec::new(),
            running: HashMap::new(),
        };
        let mut addrs = HashMap::new();
        for config in self.config.listeners.clone() {
            let addr = supervisor.spawn(&config, self.pipeline_for(&config.name)).await?;
            addrs.insert(config.name.clone(), addr);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(supervisor.run(self, spawn_rx, shutdown_rx));

        Ok(ProxyHandle {
            addrs,
            shutdown_tx,
            task,
        })
    }

    /// Start, then run until Ctrl-C or a listener failure
    pub async fn run(self) -> Result<()> {
        self.start().await?.wait().await
    }
}

struct Supervisor {
    listeners: JoinSet<Result<()>>,
    shutdown_senders: Vec<mpsc::Sender<()>>,
    /// Upstream of every running listener, keyed by listen address
    running: HashMap<String, RemoteTarget>,
}

impl Supervisor {
    async fn spawn(&mut self, config: &ListenerConfig, pipeline: Pipeline) -> Result<SocketAddr> {
        let listener = RelayListener::bind(config, pipeline).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(1);
        self.shutdown_senders.push(tx);
        self.running.insert(config.listen_address.clone(), listener.remote());
        self.listeners.spawn(listener.run(rx));
        Ok(addr)
    }

    /// Start a world listener, or point the one already on that address at
    /// the newly announced remote
    async fn handle_request(&mut self, service: &ProxyService, request: ListenerConfig) {
        if let Some(target) = self.running.get(&request.listen_address) {
            let previous = target.set(request.remote_address.clone());
            if previous != request.remote_address {
                info!(
                    listener = %request.name,
                    from = %previous,
                    to = %request.remote_address,
                    "World listener retargeted"
                );
            }
            return;
        }

        let pipeline = service.pipeline_for(&request.name);
        match self.spawn(&request, pipeline).await {
            Ok(addr) => info!(
                listener = %request.name,
                %addr,
                remote = %request.remote_address,
                "World listener started"
            ),
            Err(e) => error!(
                listener = %request.name,
                error = %e,
                "Failed to start world listener"
            ),
        }
    }

    #[instrument(skip_all)]
    async fn run(
        mut self,
        service: ProxyService,
        mut spawn_rx: mpsc::UnboundedReceiver<ListenerConfig>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut result = Ok(());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(request) = spawn_rx.recv() => self.handle_request(&service, request).await,

                Some(joined) = self.listeners.join_next() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "Listener failed");
                            result = Err(e);
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Listener task panicked");
                            let message = format!("Listener task failed: {e}");
                            result = Err(ProtocolError::Custom(message));
                            break;
                        }
                    }
                }
            }
        }

        for tx in &self.shutdown_senders {
            let _ = tx.send(()).await;
        }
        while let Some(joined) = self.listeners.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!(error = %e, "Listener stopped with error");
            }
        }

        global_metrics().log_metrics();
        info!("Proxy stopped");
        result
    }
}

/// A started [`ProxyService`]
pub struct ProxyHandle {
    addrs: HashMap<String, SocketAddr>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    /// Bound address of configured listener `name`
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.addrs.get(name).copied()
    }

    /// Stop every listener and wait for them to drain
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        join(self.task).await
    }

    /// Run until Ctrl-C, then shut down
    pub async fn wait(mut self) -> Result<()> {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Received Ctrl-C, shutting down");
                let _ = self.shutdown_tx.send(()).await;
                join(self.task).await
            }
            joined = &mut self.task => flatten(joined),
        }
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    flatten(task.await)
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| ProtocolError::Custom(format!("Proxy task failed: {e}")))?
}
