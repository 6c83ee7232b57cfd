use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    /// The remote end closed the stream, or a write made no progress.
    #[error("Connection closed by peer")]
    PeerClosed,

    /// No bytes became readable within the read timeout.
    #[error("Connection seems stalled after {0}ms without data")]
    StalledConnection(u64),

    #[error("Read limit exceeded ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("No endpoints configured for {0}")]
    NoEndpointsConfigured(String),

    #[error("All endpoints failed, last error: {0}")]
    AllEndpointsFailed(String),

    /// A failure returned by the remote service itself.
    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("Method '{0}' is already registered")]
    DuplicateMethod(String),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Whether this failure says something about the endpoint's availability
    /// rather than about the call itself. Clients advance to the next
    /// candidate endpoint on these.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RpcError::PeerClosed
                | RpcError::StalledConnection(_)
                | RpcError::FrameTooLarge(_)
                | RpcError::InvalidFrame(_)
                | RpcError::MalformedRequest(_)
                | RpcError::HandshakeFailed(_)
                | RpcError::Connection(_)
                | RpcError::Timeout(_)
                | RpcError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
