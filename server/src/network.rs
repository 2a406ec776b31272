use crate::config::ServerConfig;
use crate::directory::SessionDirectory;
use crate::dispatcher::Dispatcher;
use crate::persistence::{record_outcome, JsonFileStore, MemoryStore, ScoreStore, StoreError};
use crate::registry::ConnectionRegistry;
use crate::simulation::{ledger_factory, SimulationFactory};
use crate::ticker::{run_idle_sweeper, run_tick_loop};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Everything shared across connection workers and the ticker, handed to
/// each of them at construction.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: ConnectionRegistry,
    pub directory: SessionDirectory,
    pub store: Arc<dyn ScoreStore>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        simulations: SimulationFactory,
        store: Arc<dyn ScoreStore>,
    ) -> Self {
        let registry = ConnectionRegistry::new(
            config.max_connections,
            config.outbound_queue,
            config.max_missed_sends,
        );
        Self {
            config,
            registry,
            directory: SessionDirectory::new(simulations),
            store,
        }
    }

    /// Context with the default simulation and a store chosen by `data_dir`.
    pub fn from_config(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn ScoreStore> = match &config.data_dir {
            Some(dir) => {
                info!("Persisting results under {}", dir.display());
                Arc::new(JsonFileStore::open(dir)?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, ledger_factory(), store))
    }

    /// Drops an ended session from the directory and persists its result on
    /// the blocking pool, so slow storage never holds up the caller. Only the
    /// first caller for a given session gets the recording task back.
    pub async fn retire_session(&self, session_id: &str) -> Option<JoinHandle<usize>> {
        let handle = self.directory.remove(session_id)?;
        let result = handle.lock().await.result().cloned();
        info!("Session {} retired", session_id);

        let result = result?;
        let store = Arc::clone(&self.store);
        Some(tokio::task::spawn_blocking(move || {
            record_outcome(store.as_ref(), &result)
        }))
    }
}

/// Aborts background tasks when the server future is dropped.
struct TaskGuard(Vec<JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let ctx = ServerContext::from_config(config)?;
        Self::with_context(Arc::new(ctx)).await
    }

    pub async fn with_context(
        ctx: Arc<ServerContext>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let address = ctx.config.bind_address();
        let listener = TcpListener::bind(&address).await?;
        info!(
            "Server listening on {} (capacity {}, {} Hz)",
            listener.local_addr()?,
            ctx.config.max_connections,
            ctx.config.tick_rate
        );
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accepts connections forever. Dropping the future stops the ticker too.
    pub async fn run(self) {
        let mut tasks = vec![tokio::spawn(run_tick_loop(
            Arc::clone(&self.ctx),
            self.ctx.config.tick_duration(),
        ))];
        if let Some(timeout) = self.ctx.config.idle_timeout {
            tasks.push(tokio::spawn(run_idle_sweeper(Arc::clone(&self.ctx), timeout)));
        }
        let _guard = TaskGuard(tasks);

        info!("Server started successfully");

        loop {
            let stream = match self.listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            match self.ctx.registry.accept(stream) {
                Ok(peer) => {
                    let dispatcher = Dispatcher::new(Arc::clone(&self.ctx), peer.peer_id);
                    tokio::spawn(dispatcher.run(peer.reader, peer.shutdown));
                }
                Err(e) => warn!("Connection refused: {}", e),
            }
        }
    }
}
