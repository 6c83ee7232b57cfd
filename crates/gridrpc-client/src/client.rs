use std::sync::{Arc, Mutex};
use std::time::Duration;

use gridrpc_common::config::ConfigStore;
use gridrpc_common::protocol::{Request, Result, RpcArgs, RpcError, RpcResult};
use gridrpc_common::transport::DEFAULT_CONNECT_TIMEOUT;
use gridrpc_common::{Endpoint, Transport};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::net::TcpStream;

use crate::cache::{CacheKey, ConnectionCache};
use crate::endpoints::{EndpointSet, Selection};

/// Default bound on one attempt against one endpoint.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// A call's result together with the endpoint that produced it.
///
/// Follow-up calls that must reach the same server instance should use
/// `Selection::Pinned(outcome.served_by)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub result: RpcResult,
    pub served_by: Endpoint,
}

impl CallOutcome {
    /// The success value, or the remote failure as [`RpcError::Remote`].
    pub fn into_value(self) -> Result<Value> {
        self.result.into_value()
    }
}

/// Client for one logical service.
///
/// Each call walks a candidate list of endpoints. Transport failures and
/// availability failures (`serviceBusy`, `unknownService`) move on to the
/// next candidate; any other result, including an application failure, is
/// returned as is.
///
/// There is no cancellation: when an attempt times out the connection is
/// dropped and the server finishes the call on its own.
///
/// # Example
///
/// ```no_run
/// use gridrpc_client::{EndpointSet, RpcClient, Selection};
/// use gridrpc_common::Endpoint;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoints = EndpointSet::new("Framework/Hello")
///     .with_central(Endpoint::parse("plain://127.0.0.1:9876")?);
/// let client = RpcClient::new(endpoints);
///
/// let outcome = client.call(Selection::Failover, "sayHello", vec![json!("World")]).await?;
/// println!("{} answered {:?}", outcome.served_by, outcome.result);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    endpoints: EndpointSet,
    cache: Arc<ConnectionCache>,
    token: Option<String>,
    extra_credentials: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
    rng: Arc<Mutex<StdRng>>,
}

impl RpcClient {
    pub fn new(endpoints: EndpointSet) -> Self {
        Self {
            endpoints,
            cache: Arc::new(ConnectionCache::default()),
            token: None,
            extra_credentials: None,
            timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// A client for `service` using the endpoints configured in `store`.
    pub fn from_config(store: &dyn ConfigStore, service: &str) -> Result<Self> {
        Ok(Self::new(EndpointSet::from_config(store, service)?))
    }

    /// Token presented to endpoints that use the token protocol.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Group every call of this client acts as.
    pub fn with_extra_credentials(mut self, group: impl Into<String>) -> Self {
        self.extra_credentials = Some(group.into());
        self
    }

    /// Bound on each attempt, from connecting to receiving the result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Shares idle connections with other clients.
    pub fn with_cache(mut self, cache: Arc<ConnectionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the random source used to order replicas.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Arc::new(Mutex::new(rng));
        self
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Calls `method` on the candidates chosen by `selection`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NoEndpointsConfigured`] if there is nothing to call
    /// - [`RpcError::AllEndpointsFailed`] with the last failure if every
    ///   candidate failed
    pub async fn call(&self, selection: Selection, method: impl Into<String>, args: RpcArgs) -> Result<CallOutcome> {
        let candidates = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.endpoints.candidates(&selection, &mut *rng)?
        };
        self.call_endpoints(&candidates, method, args).await
    }

    /// Calls `method` on `endpoints`, in order, until one answers.
    pub async fn call_endpoints(
        &self,
        endpoints: &[Endpoint],
        method: impl Into<String>,
        args: RpcArgs,
    ) -> Result<CallOutcome> {
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpointsConfigured(self.endpoints.service().to_string()));
        }

        let request = self.request(method.into(), args);
        let mut last_failure = String::new();

        for endpoint in endpoints {
            let attempt = tokio::time::timeout(self.timeout, self.call_one(endpoint, &request)).await;
            let outcome = attempt.unwrap_or_else(|_| Err(RpcError::Timeout(self.timeout.as_millis() as u64)));

            match outcome {
                Ok(result) if result.failure_kind().is_some_and(|k| k.is_availability()) => {
                    let message = result.message().unwrap_or_default().to_string();
                    tracing::warn!(endpoint = %endpoint, %message, "endpoint unavailable, trying next");
                    last_failure = format!("{}: {}", endpoint, message);
                }
                Ok(result) => {
                    return Ok(CallOutcome {
                        result,
                        served_by: endpoint.clone(),
                    })
                }
                Err(e) if e.is_transport_failure() => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "call failed, trying next endpoint");
                    last_failure = format!("{}: {}", endpoint, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RpcError::AllEndpointsFailed(last_failure))
    }

    fn request(&self, method: String, args: RpcArgs) -> Request {
        let mut request = Request::new(method, args);
        if !self.endpoints.service().is_empty() {
            request = request.for_service(self.endpoints.service());
        }
        if let Some(group) = &self.extra_credentials {
            request = request.with_extra_credentials(group.clone());
        }
        request
    }

    /// One attempt against one endpoint. A cached connection that turns out
    /// to be dead is replaced by a fresh one once.
    async fn call_one(&self, endpoint: &Endpoint, request: &Request) -> Result<RpcResult> {
        let key = CacheKey::new(endpoint, self.token.as_deref());

        if let Some(mut transport) = self.cache.take(&key).await {
            match exchange(&mut transport, request).await {
                Ok(result) => {
                    self.cache.put(&key, transport).await;
                    return Ok(result);
                }
                Err(RpcError::PeerClosed) | Err(RpcError::Io(_)) => {
                    tracing::debug!(url = %key.url(), "cached connection is gone, reconnecting");
                }
                Err(e) => return Err(e),
            }
        }

        let mut transport = self.open(endpoint).await?;
        let result = exchange(&mut transport, request).await?;
        self.cache.put(&key, transport).await;
        Ok(result)
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Transport<TcpStream>> {
        let mut transport = Transport::connect(endpoint.address(), self.connect_timeout).await?;
        if endpoint.protocol().has_handshake() {
            let token = self
                .token
                .as_deref()
                .ok_or_else(|| RpcError::HandshakeFailed(format!("no token for {}", endpoint)))?;
            transport.handshake_client(token).await?;
        }
        Ok(transport)
    }
}

async fn exchange(transport: &mut Transport<TcpStream>, request: &Request) -> Result<RpcResult> {
    transport.send(request).await?;
    transport.receive().await
}
