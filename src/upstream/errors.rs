use thiserror::Error;

/// Typed error for upstream catalog operations.
///
/// Variants separate the transport failure modes that map to distinct
/// client-facing statuses. Each carries a stable kind string (Node-style
/// errno identifiers, which is what the upstream ecosystem reports) used as
/// the lookup key in the response envelope's static mapping table.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    /// Request exceeded the shared client timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// Upstream hostname could not be resolved.
    #[error("upstream host could not be resolved: {0}")]
    Dns(String),

    /// TCP connection refused by the upstream.
    #[error("upstream connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection dropped mid-transfer.
    #[error("upstream connection reset: {0}")]
    ConnectionReset(String),

    /// Upstream answered with a non-success HTTP status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Body received but not decodable as the expected shape.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// Local I/O failure while spooling an upstream body to disk.
    #[error("failed to write upstream payload: {0}")]
    Io(String),

    /// Anything else the transport reports.
    #[error("upstream network error: {0}")]
    Network(String),
}

impl UpstreamError {
    /// Stable identifier for the envelope mapping table.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout => "ETIMEDOUT",
            UpstreamError::Dns(_) => "ENOTFOUND",
            UpstreamError::ConnectionRefused(_) => "ECONNREFUSED",
            UpstreamError::ConnectionReset(_) => "ECONNRESET",
            UpstreamError::Status { status, .. } if *status >= 500 => "EBADGATEWAY",
            UpstreamError::Status { .. } => "EUPSTREAM",
            UpstreamError::Decode(_) => "EDECODE",
            UpstreamError::Io(_) => "EIO",
            UpstreamError::Network(_) => "ENETWORK",
        }
    }

    /// Upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry at the client layer could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout
            | UpstreamError::ConnectionReset(_)
            | UpstreamError::Network(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            UpstreamError::Timeout
        } else if error.is_connect() {
            let lowered = message.to_lowercase();
            if lowered.contains("dns") || lowered.contains("resolve") {
                UpstreamError::Dns(message)
            } else if lowered.contains("refused") {
                UpstreamError::ConnectionRefused(message)
            } else {
                UpstreamError::Network(message)
            }
        } else if error.is_decode() {
            UpstreamError::Decode(message)
        } else if error.is_body() {
            UpstreamError::ConnectionReset(message)
        } else {
            UpstreamError::Network(message)
        }
    }

    pub fn from_status(status: u16, message: String) -> Self {
        UpstreamError::Status { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_identifiers() {
        assert_eq!(UpstreamError::Timeout.kind(), "ETIMEDOUT");
        assert_eq!(UpstreamError::Dns("x".into()).kind(), "ENOTFOUND");
        assert_eq!(
            UpstreamError::ConnectionRefused("x".into()).kind(),
            "ECONNREFUSED"
        );
        assert_eq!(UpstreamError::from_status(502, "bad".into()).kind(), "EBADGATEWAY");
        assert_eq!(UpstreamError::from_status(403, "no".into()).kind(), "EUPSTREAM");
    }

    #[test]
    fn status_is_surfaced_only_for_http_failures() {
        assert_eq!(UpstreamError::from_status(504, "slow".into()).status(), Some(504));
        assert_eq!(UpstreamError::Timeout.status(), None);
    }

    #[test]
    fn transient_classification() {
        assert!(UpstreamError::Timeout.is_transient());
        assert!(UpstreamError::ConnectionReset("x".into()).is_transient());
        assert!(!UpstreamError::Dns("x".into()).is_transient());
        assert!(!UpstreamError::from_status(404, "missing".into()).is_transient());
    }
}
