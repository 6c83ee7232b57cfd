use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::credentials::{Authenticator, Credential};
use crate::protocol::error::{Result, RpcError};
use crate::protocol::{FailureKind, Handshake, RpcResult};
use crate::transport::codec::JsonCodec;
use crate::transport::frame::{self, FrameReader, DEFAULT_CHUNK_SIZE};

/// Which side created the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accepted by a listening service.
    Server,
    /// Opened by a client.
    Client,
}

/// One bidirectional, credentialed, framed connection.
///
/// A `Transport` owns its byte stream and its frame carry-over buffer, and is
/// used by exactly one logical call path at a time. Messages are sent and
/// received whole; see [`frame`](crate::transport::frame) for the wire
/// format.
///
/// # Example
///
/// ```no_run
/// use gridrpc_common::transport::Transport;
/// use gridrpc_common::protocol::{Request, RpcResult};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transport = Transport::connect("127.0.0.1:9876", Duration::from_secs(5)).await?;
///
/// transport.send(&Request::new("sayHello", vec![json!("World")])).await?;
/// let result: RpcResult = transport.receive().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transport<S> {
    stream: S,
    reader: FrameReader,
    mode: Mode,
    chunk_size: usize,
    /// Set once by the handshake.
    credentials: Option<Credential>,
    extra_credentials: Option<String>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    app_data: Option<Value>,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, mode: Mode) -> Self {
        Self {
            stream,
            reader: FrameReader::new(),
            mode,
            chunk_size: DEFAULT_CHUNK_SIZE,
            credentials: None,
            extra_credentials: None,
            local_addr: None,
            remote_addr: None,
            app_data: None,
        }
    }

    pub fn with_addresses(mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        self.local_addr = local;
        self.remote_addr = remote;
        self
    }

    /// Sets the receive limit (0 for none) and the per-read timeout.
    pub fn with_limits(mut self, max_bytes: usize, read_timeout: Option<Duration>) -> Self {
        self.reader.set_max_bytes(max_bytes);
        self.reader.set_read_timeout(read_timeout);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_server(&self) -> bool {
        self.mode == Mode::Server
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Request-scoped metadata carried alongside the connection.
    pub fn app_data(&self) -> Option<&Value> {
        self.app_data.as_ref()
    }

    pub fn set_app_data(&mut self, app_data: Value) {
        self.app_data = Some(app_data);
    }

    /// Encodes `value` and sends it as one frame.
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = JsonCodec::encode(value)?;
        frame::write_frame(&mut self.stream, &payload, self.chunk_size).await
    }

    /// Receives one frame and returns its raw payload.
    pub async fn receive_payload(&mut self) -> Result<Bytes> {
        self.reader.read_frame(&mut self.stream).await
    }

    /// Receives one frame and decodes it.
    ///
    /// A payload that does not decode as `T` fails with
    /// [`RpcError::MalformedRequest`].
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.receive_payload().await?;
        JsonCodec::decode_exact(&payload).map_err(|e| RpcError::MalformedRequest(e.to_string()))
    }

    /// Client side of the token handshake.
    ///
    /// Sends the token and waits for the service to acknowledge it. The
    /// credential the service recognised is recorded and returned.
    pub async fn handshake_client(&mut self, token: &str) -> Result<Credential> {
        self.send(&Handshake {
            token: token.to_string(),
        })
        .await?;

        let ack: RpcResult = self.receive().await?;
        let credential = match ack {
            RpcResult::Ok(value) => serde_json::from_value::<Credential>(value)
                .map_err(|e| RpcError::HandshakeFailed(format!("bad acknowledgement: {}", e)))?,
            RpcResult::Err(failure) => return Err(RpcError::HandshakeFailed(failure.message)),
        };

        self.credentials = Some(credential.clone());
        Ok(credential)
    }

    /// Service side of the token handshake.
    ///
    /// On failure the peer is told why before the error is returned; the
    /// caller is expected to close the connection.
    pub async fn handshake_server(&mut self, authenticator: &dyn Authenticator) -> Result<Credential> {
        let handshake: Handshake = self
            .receive()
            .await
            .map_err(|e| match e {
                RpcError::MalformedRequest(msg) => RpcError::HandshakeFailed(msg),
                other => other,
            })?;

        match authenticator.authenticate(&handshake) {
            Ok(credential) => {
                let ack = serde_json::to_value(&credential)?;
                self.send(&RpcResult::ok(ack)).await?;
                self.credentials = Some(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                let refusal = RpcResult::failure(FailureKind::AccessDenied, e.to_string());
                if let Err(send_err) = self.send(&refusal).await {
                    tracing::debug!(peer = ?self.remote_addr, error = %send_err, "could not send handshake refusal");
                }
                Err(e)
            }
        }
    }

    /// The credential established by the handshake, or the anonymous
    /// credential when no handshake was performed.
    pub fn connecting_credentials(&self) -> Credential {
        self.credentials.clone().unwrap_or_else(Credential::anonymous)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Narrows the effective identity to `group` without a new handshake.
    pub fn set_extra_credentials(&mut self, group: impl Into<String>) {
        self.extra_credentials = Some(group.into());
    }

    pub fn clear_extra_credentials(&mut self) {
        self.extra_credentials = None;
    }

    pub fn extra_credentials(&self) -> Option<&str> {
        self.extra_credentials.as_deref()
    }

    /// The connecting credential as narrowed by any extra credentials.
    pub fn peer_credentials(&self) -> Credential {
        let base = self.connecting_credentials();
        match &self.extra_credentials {
            Some(group) => base.with_extra_group(group.clone()),
            None => base,
        }
    }

    /// Shuts down the write half of the stream.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(frame::map_io_error)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
