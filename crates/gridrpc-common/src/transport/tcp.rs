use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use crate::protocol::error::{Result, RpcError};
use crate::transport::connection::{Mode, Transport};

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl Transport<TcpStream> {
    /// Connects to `addr`, trying each resolved address until one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the address cannot be resolved or
    /// no resolved address accepts the connection within `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let socket_addrs = lookup_host(addr)
            .await
            .map_err(|e| RpcError::Connection(format!("invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| RpcError::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;
                    let local = stream.local_addr().ok();
                    let remote = stream.peer_addr().ok();
                    tracing::debug!(%socket_addr, "connected");
                    return Ok(Transport::new(stream, Mode::Client).with_addresses(local, remote));
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some(format!("timed out after {:?}", timeout)),
            }
        }

        Err(RpcError::Connection(format!(
            "failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Wraps a stream accepted by a listener.
    pub fn accepted(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Transport::new(stream, Mode::Server).with_addresses(local, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, RpcResult};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = Transport::accepted(stream);
            assert!(transport.is_server());
            let request: Request = transport.receive().await.unwrap();
            transport.send(&RpcResult::ok(request.method_name)).await.unwrap();
        });

        let mut client = Transport::connect(&addr.to_string(), DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(client.remote_addr(), Some(addr));

        client.send(&Request::new("echo", vec![])).await.unwrap();
        let result: RpcResult = client.receive().await.unwrap();
        assert_eq!(result.value(), Some(&serde_json::json!("echo")));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Transport::connect(&addr.to_string(), DEFAULT_CONNECT_TIMEOUT).await;
        assert!(matches!(result, Err(RpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_invalid_address() {
        let result = Transport::connect("not an address", DEFAULT_CONNECT_TIMEOUT).await;
        assert!(matches!(result, Err(RpcError::Connection(_))));
    }
}
