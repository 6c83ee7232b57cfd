use std::collections::HashMap;
use std::fmt;

use gridrpc_common::{Endpoint, Transport};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default number of idle connections kept per endpoint.
pub const DEFAULT_MAX_IDLE_PER_ENDPOINT: usize = 4;

/// Identifies which idle connections a call may reuse.
///
/// A connection to a handshaking endpoint carries the identity its token
/// established, so the token is part of the key. Plain connections are
/// anonymous and keyed by URL alone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    token: Option<String>,
}

impl CacheKey {
    pub fn new(endpoint: &Endpoint, token: Option<&str>) -> Self {
        Self {
            url: endpoint.url(),
            token: if endpoint.protocol().has_handshake() {
                token.map(str::to_string)
            } else {
                None
            },
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

// Never print the token.
impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("url", &self.url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

/// Idle connections, keyed by endpoint URL and the token they were opened
/// with.
///
/// A connection is only put back after a complete request/response exchange,
/// so anything taken from the cache is positioned at a frame boundary.
/// Connections are reused last-in first-out. Once a key holds `max_idle`
/// connections, further returns are closed instead.
///
/// # Example
///
/// ```rust,no_run
/// use gridrpc_client::{CacheKey, ConnectionCache};
/// use gridrpc_common::transport::{Transport, DEFAULT_CONNECT_TIMEOUT};
/// use gridrpc_common::Endpoint;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = ConnectionCache::new(4);
/// let key = CacheKey::new(&Endpoint::parse("plain://127.0.0.1:9876")?, None);
///
/// let transport = match cache.take(&key).await {
///     Some(transport) => transport,
///     None => Transport::connect("127.0.0.1:9876", DEFAULT_CONNECT_TIMEOUT).await?,
/// };
///
/// // ... one exchange ...
///
/// cache.put(&key, transport).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionCache {
    idle: Mutex<HashMap<CacheKey, Vec<Transport<TcpStream>>>>,
    max_idle: usize,
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_ENDPOINT)
    }
}

impl ConnectionCache {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    /// Takes the most recently returned idle connection for `key`.
    pub async fn take(&self, key: &CacheKey) -> Option<Transport<TcpStream>> {
        let mut idle = self.idle.lock().await;
        let connections = idle.get_mut(key)?;
        let transport = connections.pop();
        if connections.is_empty() {
            idle.remove(key);
        }
        transport
    }

    /// Returns a connection after a complete exchange.
    pub async fn put(&self, key: &CacheKey, transport: Transport<TcpStream>) {
        if self.max_idle == 0 {
            return;
        }

        let mut idle = self.idle.lock().await;
        let connections = idle.entry(key.clone()).or_default();
        if connections.len() < self.max_idle {
            connections.push(transport);
        } else {
            tracing::trace!(url = %key.url, "idle limit reached, closing connection");
        }
    }

    pub async fn idle_count(&self, key: &CacheKey) -> usize {
        self.idle.lock().await.get(key).map_or(0, Vec::len)
    }

    /// Closes every idle connection.
    pub async fn clear(&self) {
        self.idle.lock().await.clear();
    }
}
