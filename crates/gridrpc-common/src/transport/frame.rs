//! Length-prefixed frame codec.
//!
//! A frame is the ASCII decimal length of the payload, a colon, then exactly
//! that many payload bytes:
//!
//! ```text
//! 42:<42 payload bytes>
//! ```
//!
//! Frames are self-delimiting and may be split arbitrarily across reads and
//! writes. [`FrameReader`] owns the carry-over buffer for one connection and
//! never hands out a partial frame.

use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};

/// Writes larger than this are issued in successive chunks (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// How long a read may wait for the peer before the connection counts as
/// stalled (600 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);

/// Default upper bound on one frame (100 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Longest accepted length prefix, in digits.
const MAX_PREFIX_DIGITS: usize = 20;

const INITIAL_CAPACITY: usize = 4096;

/// Most the buffer grows by before the bytes to fill it have arrived.
const READ_CHUNK: usize = 64 * 1024;

/// Encodes `payload` as one complete frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let prefix = format!("{}:", payload.len());
    let mut frame = Vec::with_capacity(prefix.len() + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Writes `payload` as one frame.
///
/// The length prefix is computed once over the whole payload; the bytes are
/// then pushed in chunks of at most `chunk_size`. Short writes are continued
/// until the chunk is fully accepted. A write that makes no progress means
/// the peer is gone and fails with [`RpcError::PeerClosed`].
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], chunk_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let prefix = format!("{}:", payload.len());
    let chunk_size = chunk_size.max(1);

    for part in [prefix.as_bytes(), payload] {
        for chunk in part.chunks(chunk_size) {
            let mut sent = 0;
            while sent < chunk.len() {
                let written = writer.write(&chunk[sent..]).await.map_err(map_io_error)?;
                if written == 0 {
                    return Err(RpcError::PeerClosed);
                }
                sent += written;
            }
        }
    }

    writer.flush().await.map_err(map_io_error)?;
    Ok(())
}

/// Parse state, kept across calls so that a dropped read leaves the buffer
/// consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    WaitingForLength,
    WaitingForPayload { size: usize },
}

/// Reassembles frames from a byte stream.
///
/// Bytes that arrive past the end of a frame stay in the buffer and start the
/// next frame.
pub struct FrameReader {
    buffer: BytesMut,
    state: State,
    /// Upper bound on buffered bytes while assembling a frame; 0 disables it.
    max_bytes: usize,
    read_timeout: Option<Duration>,
}

impl FrameReader {
    /// A reader with the default frame limit and read timeout.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_BYTES, Some(DEFAULT_READ_TIMEOUT))
    }

    pub fn with_limits(max_bytes: usize, read_timeout: Option<Duration>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::WaitingForLength,
            max_bytes,
            read_timeout,
        }
    }

    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;
    }

    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) {
        self.read_timeout = read_timeout;
    }

    /// Number of bytes read from the stream but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Reads the next complete frame payload from `reader`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::FrameTooLarge`] if the limit is exceeded before a frame
    ///   is complete, or the declared length is above it
    /// - [`RpcError::InvalidFrame`] if the length prefix is not a decimal
    ///   number
    /// - [`RpcError::PeerClosed`] if the stream ends first
    /// - [`RpcError::StalledConnection`] if no data arrives within the read
    ///   timeout
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if let Some(size) = self.take_length()? {
                        self.state = State::WaitingForPayload { size };
                        continue;
                    }
                    if self.max_bytes != 0 && self.buffer.len() > self.max_bytes {
                        return Err(RpcError::FrameTooLarge(self.max_bytes));
                    }
                    self.fill(reader).await?;
                }
                State::WaitingForPayload { size } => {
                    if self.buffer.len() >= size {
                        self.state = State::WaitingForLength;
                        return Ok(self.buffer.split_to(size).freeze());
                    }
                    // The declared size is the peer's claim; only grow as data arrives.
                    self.buffer.reserve((size - self.buffer.len()).min(READ_CHUNK));
                    self.fill(reader).await?;
                }
            }
        }
    }

    /// Consumes the length prefix if the separator has arrived.
    fn take_length(&mut self) -> Result<Option<usize>> {
        let separator = self.buffer.iter().position(|&b| b == b':');
        let digits = match separator {
            Some(pos) => &self.buffer[..pos],
            None => &self.buffer[..],
        };

        if let Some(bad) = digits.iter().find(|b| !b.is_ascii_digit()) {
            return Err(RpcError::InvalidFrame(format!(
                "unexpected byte 0x{:02x} in length prefix",
                bad
            )));
        }
        if digits.len() > MAX_PREFIX_DIGITS {
            return Err(RpcError::InvalidFrame("length prefix too long".to_string()));
        }

        let Some(pos) = separator else {
            return Ok(None);
        };
        if pos == 0 {
            return Err(RpcError::InvalidFrame("empty length prefix".to_string()));
        }

        // Digits only, so this is valid UTF-8.
        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RpcError::InvalidFrame("length prefix out of range".to_string()))?;

        if self.max_bytes != 0 && size > self.max_bytes {
            return Err(RpcError::FrameTooLarge(self.max_bytes));
        }

        self.buffer.advance(pos + 1);
        Ok(Some(size))
    }

    async fn fill<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let read = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, reader.read_buf(&mut self.buffer))
                .await
                .map_err(|_| RpcError::StalledConnection(timeout.as_millis() as u64))?,
            None => reader.read_buf(&mut self.buffer).await,
        };

        match read.map_err(map_io_error)? {
            0 => Err(RpcError::PeerClosed),
            _ => Ok(()),
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Map IO errors to RpcError variants
///
/// Resets, aborts and broken pipes mean the peer is gone; everything else is
/// reported as-is.
pub(crate) fn map_io_error(err: io::Error) -> RpcError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => RpcError::PeerClosed,
        _ => RpcError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts at most `per_write` bytes per call.
    struct TrickleWriter {
        data: Vec<u8>,
        per_write: usize,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.per_write);
            self.data.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode_frame(b"hello"), b"5:hello".to_vec());
        assert_eq!(encode_frame(b""), b"0:".to_vec());
    }

    #[tokio::test]
    async fn test_short_writes_are_continued() {
        let mut writer = TrickleWriter { data: Vec::new(), per_write: 3 };
        write_frame(&mut writer, b"0123456789", 4).await.unwrap();

        assert_eq!(writer.data, b"10:0123456789".to_vec());
    }

    #[tokio::test]
    async fn test_zero_progress_write_is_peer_closed() {
        let mut writer = TrickleWriter { data: Vec::new(), per_write: 0 };
        let result = write_frame(&mut writer, b"abc", DEFAULT_CHUNK_SIZE).await;

        assert!(matches!(result, Err(RpcError::PeerClosed)));
    }

    #[tokio::test]
    async fn test_read_single_frame() {
        let mut input: &[u8] = b"5:hello";
        let mut reader = FrameReader::new();

        let payload = reader.read_frame(&mut input).await.unwrap();
        assert_eq!(&payload[..], b"hello");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_surplus_bytes_start_next_frame() {
        let mut input: &[u8] = b"3:abc4:defg0:";
        let mut reader = FrameReader::new();

        assert_eq!(&reader.read_frame(&mut input).await.unwrap()[..], b"abc");
        assert_eq!(&reader.read_frame(&mut input).await.unwrap()[..], b"defg");
        assert!(reader.read_frame(&mut input).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_byte_chunks() {
        let (mut client, mut server) = tokio::io::duplex(1);
        let payload = br#"{"methodName":"sayHello","arguments":["World"]}"#.to_vec();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, DEFAULT_CHUNK_SIZE).await.unwrap();
            client
        });

        let mut reader = FrameReader::new();
        let received = reader.read_frame(&mut server).await.unwrap();
        assert_eq!(&received[..], &expected[..]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_payload_is_never_returned() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"5:hell").await.unwrap();

        let mut reader = FrameReader::with_limits(0, None);
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            reader.read_frame(&mut server),
        )
        .await;
        assert!(pending.is_err(), "a 4-byte payload must not satisfy a 5-byte frame");

        client.write_all(b"o").await.unwrap();
        let payload = reader.read_frame(&mut server).await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_peer_closed_mid_frame() {
        let mut input: &[u8] = b"10:short";
        let mut reader = FrameReader::new();

        let result = reader.read_frame(&mut input).await;
        assert!(matches!(result, Err(RpcError::PeerClosed)));
    }

    #[tokio::test]
    async fn test_peer_closed_before_any_frame() {
        let mut input: &[u8] = b"";
        let mut reader = FrameReader::new();

        assert!(matches!(reader.read_frame(&mut input).await, Err(RpcError::PeerClosed)));
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let mut input: &[u8] = b"100:abc";
        let mut reader = FrameReader::with_limits(16, None);

        assert!(matches!(
            reader.read_frame(&mut input).await,
            Err(RpcError::FrameTooLarge(16))
        ));
    }

    #[tokio::test]
    async fn test_missing_separator_over_limit() {
        let mut input: &[u8] = b"1234567890";
        let mut reader = FrameReader::with_limits(4, None);

        assert!(matches!(
            reader.read_frame(&mut input).await,
            Err(RpcError::FrameTooLarge(4))
        ));
    }

    #[tokio::test]
    async fn test_non_numeric_prefix() {
        let mut input: &[u8] = b"abc:def";
        let mut reader = FrameReader::new();

        assert!(matches!(reader.read_frame(&mut input).await, Err(RpcError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn test_stalled_connection() {
        let (_client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::with_limits(0, Some(Duration::from_millis(20)));

        assert!(matches!(
            reader.read_frame(&mut server).await,
            Err(RpcError::StalledConnection(20))
        ));
    }

    #[tokio::test]
    async fn test_payload_that_never_arrives_stalls() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"16:abc").await.unwrap();
        let mut reader = FrameReader::with_limits(16, Some(Duration::from_millis(20)));

        assert!(matches!(
            reader.read_frame(&mut server).await,
            Err(RpcError::StalledConnection(20))
        ));
    }

    #[tokio::test]
    async fn test_declared_length_is_not_preallocated() {
        let mut input: &[u8] = b"104857600:";
        let mut reader = FrameReader::with_limits(DEFAULT_MAX_FRAME_BYTES, None);

        assert!(matches!(reader.read_frame(&mut input).await, Err(RpcError::PeerClosed)));
        assert!(reader.buffer.capacity() <= INITIAL_CAPACITY + READ_CHUNK);
    }

    #[tokio::test]
    async fn test_default_reader_rejects_huge_prefix() {
        let mut input: &[u8] = b"18446744073709551615:x";
        let mut reader = FrameReader::new();

        assert!(matches!(
            reader.read_frame(&mut input).await,
            Err(RpcError::FrameTooLarge(DEFAULT_MAX_FRAME_BYTES))
        ));
    }

    #[tokio::test]
    async fn test_unlimited_reader_survives_huge_prefix() {
        let mut input: &[u8] = b"18446744073709551615:x";
        let mut reader = FrameReader::with_limits(0, None);

        assert!(matches!(reader.read_frame(&mut input).await, Err(RpcError::PeerClosed)));
        assert_eq!(reader.buffered(), 1);
    }

    #[tokio::test]
    async fn test_chunked_write_reads_back_whole() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = TrickleWriter { data: Vec::new(), per_write: usize::MAX };
        write_frame(&mut writer, &payload, 1000).await.unwrap();

        let mut input: &[u8] = &writer.data;
        let mut reader = FrameReader::new();
        assert_eq!(&reader.read_frame(&mut input).await.unwrap()[..], &payload[..]);
    }
}
