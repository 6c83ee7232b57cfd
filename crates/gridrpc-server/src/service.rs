use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridrpc_common::protocol::{Result, RpcError};
use gridrpc_common::transport::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_TIMEOUT};
use gridrpc_common::Transport;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::dispatcher::Dispatcher;

/// Default bound on a single request frame (100 MB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = DEFAULT_MAX_FRAME_BYTES;

/// Stops a running [`RpcService`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stops accepting connections and closes idle ones. Handlers already
    /// running finish and their connections close after replying.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// TCP host for one [`Dispatcher`].
///
/// Every accepted connection gets its own task; requests on one connection
/// are served in order.
///
/// # Example
///
/// ```no_run
/// use gridrpc_common::config::ServiceConfig;
/// use gridrpc_server::{Dispatcher, MethodRegistry, RpcService};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServiceConfig::with_defaults("Framework/Hello");
/// let bind = config.bind_address();
/// let dispatcher = Dispatcher::new(config, MethodRegistry::new());
///
/// let service = RpcService::bind(&bind, dispatcher).await?;
/// service.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcService {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<watch::Sender<bool>>,
    max_request_bytes: usize,
    read_timeout: Option<Duration>,
}

impl RpcService {
    /// Binds the listener.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:9876")
    pub async fn bind(bind_addr: &str, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::Connection(format!("failed to bind to {}: {}", bind_addr, e)))?;
        let (tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            shutdown: Arc::new(tx),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        })
    }

    /// Sets the per-frame receive limit (0 for none) and the idle read
    /// timeout applied to every connection.
    pub fn with_limits(mut self, max_request_bytes: usize, read_timeout: Option<Duration>) -> Self {
        self.max_request_bytes = max_request_bytes;
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("failed to get local addr: {}", e)))
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Accepts connections until shut down.
    pub async fn run(self) -> Result<()> {
        let mut stop = self.shutdown.subscribe();
        tracing::info!(
            service = %self.dispatcher.config().name,
            addr = ?self.listener.local_addr().ok(),
            "service listening"
        );

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => Some(accepted),
                _ = stop.changed() => None,
            };

            let (stream, peer_addr) = match accepted {
                None => break,
                Some(Ok(accepted)) => accepted,
                Some(Err(e)) => {
                    // Usually out of file descriptors; keep serving.
                    tracing::error!(error = %e, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            tracing::debug!(%peer_addr, "connection established");
            let transport = Transport::accepted(stream).with_limits(self.max_request_bytes, self.read_timeout);
            let dispatcher = self.dispatcher.clone();
            let connection_stop = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.serve_until(transport, connection_stop).await {
                    tracing::debug!(%peer_addr, error = %e, "connection ended with error");
                }
            });
        }

        tracing::info!(service = %self.dispatcher.config().name, "service stopped");
        Ok(())
    }
}
