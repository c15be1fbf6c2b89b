use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a track in the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of an album in the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlbumId(String);

impl AlbumId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AlbumId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AlbumId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Resolved byte window for a single stream request.
///
/// Transient per-request value, never persisted. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
}

impl RangeWindow {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by the window (inclusive bounds).
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Cache field string, e.g. `"0.1048575"`.
    pub fn field(&self) -> String {
        format!("{}.{}", self.start, self.end)
    }

    /// Value for an outbound `Range` header mirroring this window.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Type-safe cache addressing for one audio chunk, replacing ad-hoc string
/// concatenation at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub track: TrackId,
    pub window: RangeWindow,
}

impl ChunkKey {
    /// Hash field holding the serialized header record for a chunk.
    pub const HEADERS_FIELD: &'static str = "extraHdrs";

    pub fn new(track: &TrackId, window: RangeWindow) -> Self {
        Self {
            track: track.clone(),
            window,
        }
    }

    /// Hash key shared by all chunks of a track, e.g. `"track.42.chunk"`.
    pub fn hash_key(&self) -> String {
        format!("track.{}.chunk", self.track)
    }

    /// Hash field for this chunk's payload, e.g. `"0.1048575"`.
    pub fn field(&self) -> String {
        self.window.field()
    }
}

/// Debug signature attached to every streamed chunk response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDebug {
    pub request_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl SignatureDebug {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            issued_at: Utc::now(),
        }
    }
}

impl Default for SignatureDebug {
    fn default() -> Self {
        Self::new()
    }
}

/// Curated header subset cached alongside a chunk's bytes.
///
/// Lifecycle is tied to the chunk entry it describes: written together on a
/// miss, recreated whenever the payload is recreated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHeaderSet {
    pub content_type: String,
    pub accept_ranges: String,
    pub content_range: String,
    pub signature: SignatureDebug,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vary: Option<String>,
    pub complete: bool,
}

impl StreamHeaderSet {
    /// Derive a response header set from a cached record, refreshing only the
    /// debug timestamp. The cached record itself stays untouched.
    pub fn with_fresh_timestamp(&self) -> Self {
        let mut headers = self.clone();
        headers.signature.issued_at = Utc::now();
        headers
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
