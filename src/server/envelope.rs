use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

use crate::upstream::UpstreamError;

pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const CODE_SUCCESS: u32 = 0;
pub const CODE_GENERIC: u32 = 1;
pub const CODE_REQUIRED_PARAMETER: u32 = 4;
pub const CODE_MALFORMED_PARAMETER: u32 = 5;

/// Static mapping from upstream failure identifiers to the client-facing
/// status and message. Unknown identifiers fall back to a generic 500.
const ERROR_TABLE: &[(&str, u16, &str)] = &[
    ("ETIMEDOUT", 504, "upstream request timed out"),
    ("ENOTFOUND", 502, "upstream host could not be resolved"),
    ("ECONNREFUSED", 502, "upstream connection refused"),
    ("ECONNRESET", 502, "upstream connection reset"),
    ("EBADGATEWAY", 502, "upstream returned a server error"),
    ("EUPSTREAM", 502, "upstream rejected the request"),
    ("EDECODE", 502, "upstream response could not be decoded"),
    ("EIO", 500, "failed to store upstream payload"),
    ("ENETWORK", 502, "upstream is unreachable"),
];

fn map_error_kind(kind: &str) -> (StatusCode, &'static str) {
    for (id, status, message) in ERROR_TABLE {
        if *id == kind {
            let status =
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, message);
        }
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

#[derive(Debug, Serialize)]
pub struct EnvelopeHeaders {
    pub status: &'static str,
    pub code: u32,
    pub error_message: String,
    pub warnings: String,
    #[serde(rename = "x-took")]
    pub took: String,
    pub results_count: usize,
}

/// Uniform response shape for every non-streaming route.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub headers: EnvelopeHeaders,
    pub results: Value,
}

impl Envelope {
    pub fn success(results: Value, took_ms: u64) -> Self {
        let results = match results {
            Value::Array(items) => Value::Array(items),
            Value::Null => Value::Array(vec![]),
            other => Value::Array(vec![other]),
        };
        let results_count = results.as_array().map(|a| a.len()).unwrap_or(0);
        Self {
            headers: EnvelopeHeaders {
                status: STATUS_SUCCEEDED,
                code: CODE_SUCCESS,
                error_message: String::new(),
                warnings: String::new(),
                took: format!("{}ms", took_ms),
                results_count,
            },
            results,
        }
    }

    pub fn failure(code: u32, error_message: String, took_ms: u64) -> Self {
        Self {
            headers: EnvelopeHeaders {
                status: STATUS_FAILED,
                code,
                error_message,
                warnings: String::new(),
                took: format!("{}ms", took_ms),
                results_count: 0,
            },
            results: Value::Array(vec![]),
        }
    }

    /// Validation failures are always HTTP 400; a missing `client_id` is a
    /// required-parameter error, any other field a malformed-parameter one.
    pub fn validation_failure(field: &str, message: &str, took_ms: u64) -> (StatusCode, Self) {
        let code = if field == "client_id" {
            CODE_REQUIRED_PARAMETER
        } else {
            CODE_MALFORMED_PARAMETER
        };
        (
            StatusCode::BAD_REQUEST,
            Self::failure(code, format!("{}: {}", field, message), took_ms),
        )
    }

    /// Map an upstream failure through the static table. `code` carries the
    /// upstream's declared status when one was received.
    pub fn upstream_failure(error: &UpstreamError, took_ms: u64) -> (StatusCode, Self) {
        let (status, message) = map_error_kind(error.kind());
        let code = error.status().map(u32::from).unwrap_or(CODE_GENERIC);
        (status, Self::failure(code, message.to_string(), took_ms))
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
