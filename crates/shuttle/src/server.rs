//! `ShuttleServer` builder and server loop.
//!
//! This is the entry point for running the realtime server. It ties
//! together all the layers: transport → protocol → session → registry.
//!
//! The accept loop only takes TCP connections off the listener. The
//! WebSocket upgrade, bounded by the handshake timeout, and everything
//! after it run on the connection's own task, so a peer that never
//! completes its upgrade cannot hold up anyone else.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use shuttle_protocol::JsonCodec;
use shuttle_registry::{ConnectionRegistry, GroupRegistry};
use shuttle_session::{RefreshTokenStore, SessionConfig, SessionManager};
use shuttle_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::presence::PresenceLocks;
use crate::{Directory, ServerConfig, ShuttleError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<D: Directory, S: RefreshTokenStore> {
    pub(crate) sessions: Arc<SessionManager<S>>,
    pub(crate) connections: Arc<ConnectionRegistry>,
    pub(crate) groups: Arc<GroupRegistry>,
    pub(crate) directory: D,
    pub(crate) presence: PresenceLocks,
    pub(crate) codec: JsonCodec,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Option<Duration>,
}

/// Builder for configuring and starting a shuttle server.
///
/// # Example
///
/// ```rust,no_run
/// use shuttle::prelude::*;
///
/// # async fn run() -> Result<(), ShuttleError> {
/// let server = ShuttleServerBuilder::new()
///     .config(ServerConfig::from_env()?)
///     .build(InMemoryDirectory::new(), MemoryRefreshStore::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ShuttleServerBuilder {
    config: ServerConfig,
}

impl ShuttleServerBuilder {
    /// Creates a new builder with default settings and no secrets.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the token signing secret and encryption key.
    pub fn secrets(mut self, jwt_secret: &[u8], encryption_key: &[u8]) -> Self {
        self.config.jwt_secret = jwt_secret.to_vec();
        self.config.encryption_key = encryption_key.to_vec();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Drops peers that have not finished the WebSocket upgrade after
    /// `timeout`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Closes connections idle for longer than `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Validates the configuration, binds the listener, and assembles
    /// the shared state.
    pub async fn build<D, S>(self, directory: D, store: S) -> Result<ShuttleServer<D, S>, ShuttleError>
    where
        D: Directory,
        S: RefreshTokenStore,
    {
        self.config.validate()?;

        let sessions = SessionManager::new(
            &self.config.jwt_secret,
            &self.config.encryption_key,
            store,
            self.config.session.clone(),
        )?;
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            sessions: Arc::new(sessions),
            connections: Arc::new(ConnectionRegistry::new()),
            groups: Arc::new(GroupRegistry::new()),
            directory,
            presence: PresenceLocks::new(),
            codec: JsonCodec,
            handshake_timeout: self.config.handshake_timeout,
            idle_timeout: self.config.idle_timeout,
        });

        Ok(ShuttleServer {
            transport,
            state,
            revocation_sweep: self.config.revocation_sweep,
        })
    }
}

impl Default for ShuttleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound shuttle server.
///
/// Call [`run()`](Self::run) to start accepting connections. The session
/// manager and registries can be cloned out beforehand, so an HTTP layer
/// (or a test) can log users in and out while the server runs.
pub struct ShuttleServer<D: Directory, S: RefreshTokenStore> {
    transport: WebSocketTransport,
    state: Arc<ServerState<D, S>>,
    revocation_sweep: Duration,
}

impl<D, S> ShuttleServer<D, S>
where
    D: Directory,
    S: RefreshTokenStore,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn sessions(&self) -> &Arc<SessionManager<S>> {
        &self.state.sessions
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.state.groups
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ShuttleError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// A background task sweeps expired entries from the revocation list
    /// for as long as the loop runs.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), ShuttleError> {
        tracing::info!(addr = ?self.local_addr().ok(), "shuttle server running");

        let sweeper = spawn_revocation_sweeper(
            Arc::clone(&self.state.sessions),
            self.revocation_sweep,
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(pending, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }

        sweeper.abort();
        self.transport.shutdown().await?;
        tracing::info!("shuttle server stopped");
        Ok(())
    }
}

fn spawn_revocation_sweeper<S: RefreshTokenStore>(
    sessions: Arc<SessionManager<S>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            sessions.sweep_revocations(SystemTime::now());
        }
    })
}
