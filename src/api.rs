//! The slice of the Drive v3 object model this crate reads and writes.

use reqwest::{Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Reqwest error: {0:?}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Serde JSON error. Response: {1}")]
    SerdeJSONError(#[source] serde_json::Error, String),
    #[error("Drive API returned HTTP {status}: {message}")]
    Status {
        status: u16,
        reason: Option<String>,
        message: String,
    },
    #[error("Access token rejected by Drive API")]
    Unauthorized,
}

impl Error {
    /// Consumes a non-success response and turns its body into an error.
    pub async fn from_response(response: Response) -> Error {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Error::Unauthorized;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return e.into(),
        };
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Error::Status {
                status: status.as_u16(),
                reason: envelope.error.errors.into_iter().find_map(|x| x.reason),
                message: envelope.error.message,
            },
            Err(_) => Error::Status {
                status: status.as_u16(),
                reason: None,
                message: body,
            },
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ReqwestError(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            Error::Status { status, reason, .. } => match *status {
                429 | 500 | 502 | 503 | 504 => true,
                403 => matches!(
                    reason.as_deref(),
                    Some("rateLimitExceeded") | Some("userRateLimitExceeded")
                ),
                _ => false,
            },
            Error::SerdeJSONError(..) | Error::Unauthorized => false,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    reason: Option<String>,
}

/// Metadata sent along with the media when a file is created or updated.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FileMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        FileMetadata {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// A file resource as returned by Drive. Only the attributes asked for via
/// the `fields` parameter are present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "size_from_str")]
    pub size: Option<u64>,
    #[serde(default)]
    pub parents: Vec<String>,
    pub md5_checksum: Option<String>,
}

// Drive encodes int64 fields as JSON strings.
fn size_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Number(n)) => Ok(Some(n)),
        Some(Size::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Reads a successful response body as a [`DriveFile`].
pub async fn decode_file(response: Response) -> Result<DriveFile, Error> {
    let result_str = response.text().await?;
    serde_json::from_str(&result_str).map_err(|e| Error::SerdeJSONError(e, result_str))
}
