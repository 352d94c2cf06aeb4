//! Incremental byte-stream reader
//!
//! Opens the stream endpoint and yields the response body chunk by chunk, in
//! arrival order, without buffering the whole resource.
//!
//! ```text
//! GET /api/stream-pipe/{taskId}/stream
//!        │
//!        ▼
//!   status check ──non-2xx──► Error::Transport { status, reason }
//!        │
//!        ▼
//!   body stream ──► next() ──► Some(chunk) ... None (end of stream)
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{Error, Result};

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Anything the stream session can pull chunks from
#[async_trait]
pub trait ChunkSource: Send {
    /// Next non-empty chunk, or `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Stop reading and release the underlying transport
    fn close(&mut self);
}

/// Chunked reader over an HTTP response body
pub struct ChunkReader {
    url: String,
    content_length: Option<u64>,
    body: Option<ChunkStream>,
    bytes_read: u64,
}

impl ChunkReader {
    /// Issue a GET and check the response
    pub async fn open(client: &reqwest::Client, url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::StreamUnavailable(format!("invalid URL {}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::StreamUnavailable(format!(
                "scheme '{}' does not support incremental reads",
                parsed.scheme()
            )));
        }

        let response = client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        Self::from_response(response)
    }

    /// Wrap an already received response
    pub fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Stream request rejected");
            return Err(Error::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        if matches!(status.as_u16(), 204 | 205) {
            return Err(Error::StreamUnavailable(format!(
                "HTTP {} carries no body",
                status.as_u16()
            )));
        }

        let content_length = response.content_length();
        tracing::debug!(url = %url, content_length = ?content_length, "Stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::transport(e.to_string())));

        Ok(Self {
            url,
            content_length,
            body: Some(Box::pin(body)),
            bytes_read: 0,
        })
    }

    /// Wrap an arbitrary chunk stream
    pub fn from_stream<S>(url: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            url: url.into(),
            content_length: None,
            body: Some(Box::pin(stream)),
            bytes_read: 0,
        }
    }

    /// Next non-empty chunk, or `None` at end of stream or after close
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.bytes_read += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Some(Err(e)) => {
                    self.body = None;
                    return Err(e);
                }
                None => {
                    self.body = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Drop the body; safe to call more than once
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            tracing::debug!(url = %self.url, bytes_read = self.bytes_read, "Stream reader closed");
        }
    }

    /// Whether the body is still being read
    pub fn is_open(&self) -> bool {
        self.body.is_some()
    }

    /// Bytes yielded so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Declared body length, if any
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Stream URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChunkSource for ChunkReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.next().await
    }

    fn close(&mut self) {
        ChunkReader::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on loopback
    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/api/stream-pipe/task_abc12345/stream", addr)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn test_not_found_is_transport_error() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;

        let err = ChunkReader::open(&client(), &url).await.err().unwrap();
        assert_eq!(err.to_string(), "Transport error: HTTP 404: Not Found");
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_reads_body_until_end() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 6\r\n\r\nftypmp",
        )
        .await;

        let mut reader = ChunkReader::open(&client(), &url).await.unwrap();
        assert_eq!(reader.content_length(), Some(6));

        let mut body = Vec::new();
        while let Some(chunk) = reader.next().await.unwrap() {
            body.extend_from_slice(&chunk);
        }

        assert_eq!(body, b"ftypmp");
        assert_eq!(reader.bytes_read(), 6);
        assert!(!reader.is_open());
    }

    #[tokio::test]
    async fn test_no_content_is_unavailable() {
        let url = serve_once(b"HTTP/1.1 204 No Content\r\n\r\n").await;

        let err = ChunkReader::open(&client(), &url).await.err().unwrap();
        assert!(matches!(err, Error::StreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_unavailable() {
        let err = ChunkReader::open(&client(), "file:///tmp/video.mp4")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::StreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_skips_empty_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"A")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"B")),
        ];
        let mut reader = ChunkReader::from_stream("mem://", futures::stream::iter(chunks));

        assert_eq!(reader.next().await.unwrap(), Some(Bytes::from_static(b"A")));
        assert_eq!(reader.next().await.unwrap(), Some(Bytes::from_static(b"B")));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let chunks = vec![Ok(Bytes::from_static(b"A"))];
        let mut reader = ChunkReader::from_stream("mem://", futures::stream::iter(chunks));

        reader.close();
        reader.close();

        assert!(!reader.is_open());
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_body_error_surfaces() {
        let chunks = vec![
            Ok(Bytes::from_static(b"A")),
            Err(Error::transport("connection reset")),
        ];
        let mut reader = ChunkReader::from_stream("mem://", futures::stream::iter(chunks));

        reader.next().await.unwrap();
        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, Error::Transport { status: None, .. }));
    }
}
