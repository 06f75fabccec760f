//! Boundary to the external proxy engine.
//!
//! An [`Engine`] turns a built [`Outbound`] into a live [`Instance`]; requests
//! issued through the instance are tunnelled by the engine. The harness owns
//! each instance exclusively and closes it exactly once.

use crate::error::ProbeError;
use crate::outbound::Outbound;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

const CHUNK_LEN: usize = 64 * 1024;
static ZERO_CHUNK: [u8; CHUNK_LEN] = [0; CHUNK_LEN];

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bytes held in memory; clones share the buffer
    Bytes(Bytes),
    /// That many zero bytes, produced chunk by chunk while sending
    Zeros(u64),
}

impl Payload {
    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(bytes) => bytes.len() as u64,
            Payload::Zeros(len) => *len,
        }
    }

    /// True when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The body as a sequence of chunks. Zero payloads slice one static
    /// 64 KiB buffer, so memory use does not grow with the length.
    pub fn chunks(&self) -> Box<dyn Iterator<Item = Bytes> + Send + Sync> {
        match self {
            Payload::Bytes(bytes) => Box::new(std::iter::once(bytes.clone())),
            Payload::Zeros(len) => {
                let zeros = Bytes::from_static(&ZERO_CHUNK);
                let mut left = *len;
                Box::new(std::iter::from_fn(move || {
                    if left == 0 {
                        return None;
                    }
                    let n = left.min(CHUNK_LEN as u64);
                    left -= n;
                    Some(zeros.slice(..n as usize))
                }))
            }
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

/// One HTTP request sent through an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// HTTP method
    pub method: reqwest::Method,
    /// Absolute target URL
    pub url: String,
    /// Optional request body
    pub body: Option<Payload>,
}

impl ProbeRequest {
    /// Request without a body.
    pub fn new(method: reqwest::Method, url: impl Into<String>) -> Self {
        ProbeRequest {
            method,
            url: url.into(),
            body: None,
        }
    }

    /// Attaches a request body.
    pub fn with_body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// What came back from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Wall time from send until the body was fully read
    pub elapsed: Duration,
    /// HTTP status code
    pub status: u16,
    /// Response body, when it was valid UTF-8
    pub body: Option<String>,
}

/// Starts engine instances from outbound configurations.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Materializes a live instance for `outbound`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::StartFailed` if the engine cannot bring the instance up.
    async fn start(
        &self,
        outbound: &Outbound,
        allow_insecure: bool,
    ) -> Result<Box<dyn Instance>, ProbeError>;
}

/// A running engine instance exposing a request-through-tunnel operation.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Sends `request` through the tunnel, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::NoResponse` if the request fails or times out.
    async fn request(
        &self,
        request: &ProbeRequest,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;

    /// Releases the instance. Calling it again is a no-op.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_payload_is_chunked() {
        let payload = Payload::Zeros(150_000);
        let lens: Vec<usize> = payload.chunks().map(|c| c.len()).collect();
        assert_eq!(lens, [65_536, 65_536, 18_928]);
        assert!(payload.chunks().all(|c| c.iter().all(|&b| b == 0)));
        assert_eq!(Payload::Zeros(0).chunks().count(), 0);
        assert!(Payload::Zeros(0).is_empty());
    }

    #[test]
    fn huge_zero_payload_stays_lazy() {
        let payload = Payload::Zeros(u64::from(u32::MAX) * 1000);
        assert_eq!(payload.len(), 4_294_967_295_000);
        let mut chunks = payload.chunks();
        assert_eq!(chunks.next().map(|c| c.len()), Some(CHUNK_LEN));
        assert_eq!(chunks.next().map(|c| c.len()), Some(CHUNK_LEN));
    }

    #[test]
    fn byte_payload_clones_share_the_buffer() {
        let payload = Payload::from(b"hello".to_vec());
        let copy = payload.clone();
        match (&payload, &copy) {
            (Payload::Bytes(a), Payload::Bytes(b)) => assert_eq!(a.as_ptr(), b.as_ptr()),
            other => panic!("expected bytes, got {:?}", other),
        }
        let chunks: Vec<Bytes> = payload.chunks().collect();
        assert_eq!(chunks, [Bytes::from_static(b"hello")]);
    }
}
