//! HTTP change feed.
//!
//! The actual HTTP client is abstracted via a trait so applications can
//! plug in whatever HTTP library they already use.
//!
//! Wire format (JSON):
//!
//! ```text
//! GET  {base}/changes?since={ms}        -> {"changes": [ServerChangeEvent, ...]}
//! POST {base}/records/{type}/{id}       <- Payload
//! ```

use crate::error::{SyncError, SyncResult};
use crate::feed::{MemoryFeed, RemoteChangeFeed};
use mendsync_protocol::{Payload, RecordKey, ServerChangeEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if a request that got this status may be retried.
    pub fn is_retryable(&self) -> bool {
        self.status >= 500 || self.status == 408 || self.status == 429
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (DNS, connection
/// reset, timeout). Error statuses are returned as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// Body of a `GET /changes` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changes in remote apply order.
    pub changes: Vec<ServerChangeEvent>,
}

/// A [`RemoteChangeFeed`] speaking JSON over HTTP.
pub struct HttpChangeFeed<C: HttpClient> {
    /// Base URL of the remote service (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpChangeFeed<C> {
    /// Creates a new HTTP feed.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Stops issuing requests until [`HttpChangeFeed::reconnect`].
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Resumes issuing requests.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Returns the URL of the change listing.
    pub fn changes_url(&self, since: i64) -> String {
        format!("{}/changes?since={}", self.base_url, since)
    }

    /// Returns the URL a record is pushed to.
    pub fn record_url(&self, key: &RecordKey) -> String {
        format!(
            "{}/records/{}/{}",
            self.base_url,
            urlencoding::encode(&key.record_type),
            urlencoding::encode(&key.id)
        )
    }

    fn send(&self, result: Result<HttpResponse, String>) -> SyncResult<HttpResponse> {
        let response = result.map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;

        if !response.is_success() {
            let message = format!(
                "HTTP {}: {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            );
            *self.last_error.write() = Some(message.clone());
            return Err(SyncError::Transport {
                message,
                retryable: response.is_retryable(),
            });
        }

        *self.last_error.write() = None;
        Ok(response)
    }
}

impl<C: HttpClient> RemoteChangeFeed for HttpChangeFeed<C> {
    fn pull(&self, since: i64) -> SyncResult<Vec<ServerChangeEvent>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let response = self.send(self.client.get(&self.changes_url(since)))?;
        let body: ChangesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode changes: {e}")))?;
        Ok(body.changes)
    }

    fn push(&self, key: &RecordKey, payload: &Payload) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let body = serde_json::to_vec(payload)
            .map_err(|e| SyncError::Protocol(format!("failed to encode payload: {e}")))?;
        self.send(self.client.post(&self.record_url(key), body))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// A loopback HTTP client that routes requests to an in-process [`MemoryFeed`].
///
/// Useful for exercising the wire format without a network.
pub struct LoopbackClient {
    feed: Arc<MemoryFeed>,
}

impl LoopbackClient {
    /// Creates a client serving requests from `feed`.
    pub fn new(feed: Arc<MemoryFeed>) -> Self {
        Self { feed }
    }

    fn error_response(err: &SyncError) -> HttpResponse {
        let status = if err.is_retryable() { 503 } else { 422 };
        HttpResponse::new(status, err.to_string().into_bytes())
    }
}

impl HttpClient for LoopbackClient {
    fn get(&self, url: &str) -> Result<HttpResponse, String> {
        let Ok(url) = Url::parse(url) else {
            return Ok(HttpResponse::new(400, b"bad url".to_vec()));
        };
        if url.path_segments().and_then(|mut s| s.next_back()) != Some("changes") {
            return Ok(HttpResponse::new(404, b"not found".to_vec()));
        }
        let since = url
            .query_pairs()
            .find(|(name, _)| name == "since")
            .and_then(|(_, value)| value.parse::<i64>().ok());
        let Some(since) = since else {
            return Ok(HttpResponse::new(400, b"bad since".to_vec()));
        };

        match self.feed.pull(since) {
            Ok(changes) => {
                let body =
                    serde_json::to_vec(&ChangesResponse { changes }).map_err(|e| e.to_string())?;
                Ok(HttpResponse::new(200, body))
            }
            Err(SyncError::NotConnected) => Err("connection refused".into()),
            Err(e) => Ok(Self::error_response(&e)),
        }
    }

    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let Ok(url) = Url::parse(url) else {
            return Ok(HttpResponse::new(400, b"bad url".to_vec()));
        };
        let segments: Vec<&str> = url.path_segments().map(Iterator::collect).unwrap_or_default();
        let [.., "records", record_type, id] = segments.as_slice() else {
            return Ok(HttpResponse::new(404, b"not found".to_vec()));
        };
        let (Ok(record_type), Ok(id)) = (urlencoding::decode(record_type), urlencoding::decode(id))
        else {
            return Ok(HttpResponse::new(400, b"bad record path".to_vec()));
        };
        let Ok(payload) = serde_json::from_slice::<Payload>(&body) else {
            return Ok(HttpResponse::new(400, b"bad payload".to_vec()));
        };

        let key = RecordKey::new(record_type.into_owned(), id.into_owned());
        match self.feed.push(&key, &payload) {
            Ok(()) => Ok(HttpResponse::new(204, Vec::new())),
            Err(SyncError::NotConnected) => Err("connection refused".into()),
            Err(e) => Ok(Self::error_response(&e)),
        }
    }

    fn is_healthy(&self) -> bool {
        self.feed.is_connected()
    }
}
