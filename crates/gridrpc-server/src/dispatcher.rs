//! Request dispatch and admission control
//!
//! A [`Dispatcher`] serves connections one request at a time: the next frame
//! is only read after the previous result has been sent. Each request goes
//! through the same gates in order:
//!
//! 1. the requested service name, if given, must be this service or an alias
//! 2. the method must be registered (or be the built-in `ping`)
//! 3. the caller's credential must satisfy one of the method's properties
//! 4. the arguments must match the declared signature
//! 5. the service's backlog must be below `MaxWaitingPetitions`, and a worker
//!    slot must be free, both service-wide and for the method
//!
//! Failing a gate produces a failure result and leaves the connection open.
//! Admission never queues: a request that cannot get a slot immediately is
//! answered with `serviceBusy`. The backlog counts every request, on any
//! connection, that has been received and not yet answered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gridrpc_common::config::ServiceConfig;
use gridrpc_common::protocol::{FailureKind, Request, Result, RpcError, RpcResult};
use gridrpc_common::{Authenticator, Credential, Transport};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;

use crate::registry::{CallContext, HandlerKind, MethodEntry, MethodRegistry, PING_METHOD};

/// Answer of the built-in `ping` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub uptime_secs: u64,
    pub in_flight: usize,
}

/// Point-in-time view of the dispatcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub in_flight: usize,
    /// Highest `in_flight` observed since startup
    pub peak_in_flight: usize,
    pub served: u64,
    /// Requests refused with `serviceBusy`
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    /// Requests received and not yet answered, across all connections.
    pending: AtomicUsize,
    served: AtomicU64,
    rejected: AtomicU64,
}

/// A granted worker slot. Held by the handler task until it finishes.
struct Slot {
    counters: Arc<Counters>,
    _worker: OwnedSemaphorePermit,
    _method: Option<OwnedSemaphorePermit>,
}

impl Slot {
    fn new(counters: Arc<Counters>, worker: OwnedSemaphorePermit, method: Option<OwnedSemaphorePermit>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            counters,
            _worker: worker,
            _method: method,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        // Runs before the permits are released.
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.served.fetch_add(1, Ordering::Relaxed);
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    /// Counts one more pending request; returns how many were already pending.
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let ahead = counter.fetch_add(1, Ordering::SeqCst);
        (Self(counter), ahead)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves the methods of one service.
pub struct Dispatcher {
    config: Arc<ServiceConfig>,
    registry: Arc<MethodRegistry>,
    authenticator: Option<Arc<dyn Authenticator>>,
    workers: Arc<Semaphore>,
    method_slots: HashMap<String, Arc<Semaphore>>,
    counters: Arc<Counters>,
    started: Instant,
}

impl Dispatcher {
    pub fn new(config: ServiceConfig, registry: MethodRegistry) -> Self {
        let method_slots = registry
            .names()
            .map(|name| (name.to_string(), Arc::new(Semaphore::new(config.method_ceiling(name)))))
            .collect();

        tracing::info!(
            service = %config.name,
            methods = registry.len(),
            max_threads = config.max_threads,
            max_waiting = config.max_waiting_petitions,
            "dispatcher ready"
        );

        Self {
            workers: Arc::new(Semaphore::new(config.max_threads)),
            config: Arc::new(config),
            registry: Arc::new(registry),
            authenticator: None,
            method_slots,
            counters: Arc::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Sets the authenticator used for handshaking protocols.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
            served: self.counters.served.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn ping_info(&self) -> PingInfo {
        PingInfo {
            name: self.config.name.clone(),
            aliases: self.config.aliases.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
            in_flight: self.in_flight(),
        }
    }

    /// Serves `transport` until the peer disconnects.
    pub async fn serve_connection<S>(&self, transport: Transport<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (_keep_open, shutdown) = watch::channel(false);
        self.serve_until(transport, shutdown).await
    }

    /// Serves `transport` until the peer disconnects or `shutdown` turns
    /// true.
    ///
    /// A peer closing the connection between requests is a normal end and
    /// returns `Ok`. Any other transport failure, including a request that
    /// does not decode, closes the connection and is returned.
    pub async fn serve_until<S>(&self, mut transport: Transport<S>, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = transport.remote_addr();

        if self.config.protocol.has_handshake() {
            if let Err(e) = self.handshake(&mut transport).await {
                tracing::warn!(?peer, error = %e, "handshake failed");
                let _ = transport.close().await;
                return Err(e);
            }
            tracing::debug!(?peer, credential = %transport.connecting_credentials(), "handshake complete");
        }

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                let _ = transport.close().await;
                return Ok(());
            }

            let received = tokio::select! {
                received = transport.receive::<Request>() => Some(received),
                _ = shutdown.changed() => None,
            };

            let request = match received {
                None => {
                    tracing::debug!(?peer, "closing connection on shutdown");
                    let _ = transport.close().await;
                    return Ok(());
                }
                Some(Ok(request)) => request,
                Some(Err(RpcError::PeerClosed)) => {
                    tracing::debug!(?peer, "connection closed by peer");
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::warn!(?peer, error = %e, "dropping connection");
                    let _ = transport.close().await;
                    return Err(e);
                }
            };

            let credential = transport.peer_credentials();
            let result = self.dispatch(&credential, peer, request).await;
            transport.send(&result).await?;
        }
    }

    async fn handshake<S>(&self, transport: &mut Transport<S>) -> Result<Credential>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match &self.authenticator {
            Some(authenticator) => transport.handshake_server(authenticator.as_ref()).await,
            None => {
                let reason = "service has no authenticator";
                if let Err(e) = transport.send(&RpcResult::failure(FailureKind::AccessDenied, reason)).await {
                    tracing::debug!(peer = ?transport.remote_addr(), error = %e, "could not send handshake refusal");
                }
                Err(RpcError::HandshakeFailed(reason.to_string()))
            }
        }
    }

    /// Runs one request through every gate and, if admitted, its handler.
    pub async fn dispatch(&self, credential: &Credential, peer: Option<SocketAddr>, request: Request) -> RpcResult {
        let Request {
            method_name,
            arguments,
            service,
            extra_credentials,
        } = request;

        if let Some(service) = service.as_deref() {
            if !self.config.answers_to(service) {
                return RpcResult::failure(
                    FailureKind::UnknownService,
                    format!("this is {}, not {}", self.config.name, service),
                );
            }
        }

        let credential = match extra_credentials {
            Some(group) => credential.with_extra_group(group),
            None => credential.clone(),
        };

        if method_name == PING_METHOD {
            return match serde_json::to_value(self.ping_info()) {
                Ok(info) => RpcResult::ok(info),
                Err(e) => RpcResult::failure(FailureKind::Handler, e.to_string()),
            };
        }

        let (_pending, ahead) = PendingGuard::enter(&self.counters.pending);

        let Some(entry) = self.registry.get(&method_name) else {
            return RpcResult::failure(
                FailureKind::MethodNotFound,
                format!("method '{}' not found", method_name),
            );
        };

        if !credential.satisfies_any(entry.auth()) {
            tracing::info!(method = %method_name, %credential, "access denied");
            return RpcResult::failure(
                FailureKind::AccessDenied,
                format!("access denied to {} for {}", method_name, credential),
            );
        }

        if let Err(message) = entry.check_args(&arguments) {
            return RpcResult::failure(FailureKind::BadArgumentShape, message);
        }

        let Some(slot) = self.admit(&method_name, ahead) else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(method = %method_name, in_flight = self.in_flight(), "service busy, rejecting request");
            return RpcResult::failure(
                FailureKind::ServiceBusy,
                format!("{} is busy, try again later", self.config.name),
            );
        };

        let ctx = CallContext {
            credential,
            peer,
            method: method_name,
            service: self.config.name.clone(),
        };
        execute(entry, ctx, arguments, slot).await
    }

    fn admit(&self, method: &str, ahead: usize) -> Option<Slot> {
        if ahead >= self.config.max_waiting_petitions {
            return None;
        }

        let worker = self.workers.clone().try_acquire_owned().ok()?;
        let method_permit = match self.method_slots.get(method) {
            Some(slots) => Some(slots.clone().try_acquire_owned().ok()?),
            None => None,
        };
        Some(Slot::new(self.counters.clone(), worker, method_permit))
    }
}

/// Runs the handler in its own task so a panic is contained.
async fn execute(entry: &MethodEntry, ctx: CallContext, args: Vec<serde_json::Value>, slot: Slot) -> RpcResult {
    let method = ctx.method.clone();
    let joined = match entry.handler.clone() {
        HandlerKind::Async(handler) => {
            tokio::spawn(async move {
                let _slot = slot;
                handler.call(ctx, args).await
            })
            .await
        }
        HandlerKind::Blocking(handler) => {
            tokio::task::spawn_blocking(move || {
                let _slot = slot;
                (*handler)(ctx, args)
            })
            .await
        }
    };

    joined.unwrap_or_else(|e| handler_failure(&method, e))
}

fn handler_failure(method: &str, err: JoinError) -> RpcResult {
    let message = if err.is_panic() {
        let payload = err.into_panic();
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("{} panicked: {}", method, detail)
    } else {
        format!("{} was cancelled", method)
    };

    tracing::error!(%method, "{}", message);
    RpcResult::failure(FailureKind::Handler, message)
}
