//! Resumable upload sessions.
//!
//! A session is opened once (see [`crate::client::DriveClient::start_resumable`]) and
//! then fed with chunks through `PUT` requests against the session URI. Drive
//! answers every chunk with either `308 Resume Incomplete` and a `Range`
//! header describing what it persisted so far, or `200`/`201` with the file
//! resource once the last byte arrived.
//!
//! ```text
//!   initiate ──► Active ──PUT chunk──► 308 ──┐
//!                  ▲                         │
//!                  └─────────────────────────┘
//!                Active ──PUT last chunk──► 200/201 ──► Complete
//!                Active ──DELETE──► 499 ──► Aborted
//! ```
//!
//! Interrupted chunks (`5xx`, dropped connections) are recovered by asking
//! the server for its offset with an empty `PUT` and resending from there.

use crate::api::{self, DriveFile};
use crate::config::Config;
use crate::writer::uploader::ProgressListener;
use log::{debug, info, warn};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Drive API error: {0}")]
    ApiError(#[from] api::Error),
    #[error("The session initiation response has no Location header")]
    MissingLocation,
    #[error("Unparseable Range header: {0}")]
    InvalidRange(String),
    #[error("The upload session has expired, the upload must restart from the beginning")]
    SessionExpired,
    #[error("Upload interrupted with HTTP {0}")]
    Interrupted(u16),
    #[error("Server offset {actual} does not match the expected offset {expected}")]
    OffsetMismatch { expected: u64, actual: u64 },
    #[error("The upload session is already finished")]
    Finished,
    #[error("Upload cancelled")]
    Cancelled,
    #[error("No tokio runtime to drive the upload: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::ApiError(e.into())
    }
}

impl Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Interrupted(_) => true,
            Error::ApiError(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Everything needed to re-attach to a session, possibly from another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_uri: String,
    pub name: String,
    pub content_type: String,
    /// `None` when the upload streams a source of unknown length.
    pub total_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    Incomplete { next_offset: u64 },
    Complete(DriveFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Complete(DriveFile),
    Aborted,
}

pub struct ResumableSession {
    http: Client,
    config: Arc<Config>,
    auth_token: Arc<String>,
    handle: SessionHandle,
    name: Arc<String>,
    offset: u64,
    state: SessionState,
    progress_listener: Option<ProgressListener>,
}

impl ResumableSession {
    pub(crate) fn new(
        http: Client,
        config: Arc<Config>,
        auth_token: Arc<String>,
        handle: SessionHandle,
        progress_listener: Option<ProgressListener>,
    ) -> Self {
        ResumableSession {
            http,
            config,
            auth_token,
            name: Arc::new(handle.name.clone()),
            handle,
            offset: 0,
            state: SessionState::Active,
            progress_listener,
        }
    }

    /// Number of bytes the server has acknowledged.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::Complete(_))
    }

    /// The uploaded file, once the session completed.
    pub fn file(&self) -> Option<&DriveFile> {
        match &self.state {
            SessionState::Complete(file) => Some(file),
            _ => None,
        }
    }

    /// Sends `data` as a single `PUT` starting at the current offset.
    ///
    /// `last` marks the final piece of the upload; when the total size is
    /// unknown it makes the request announce `offset + data.len()` as the size.
    pub async fn upload_chunk(&mut self, data: &[u8], last: bool) -> Result<ChunkStatus, Error> {
        self.ensure_active()?;

        let len = data.len() as u64;
        let range = content_range(self.offset, len, self.handle.total_size, last);
        debug!("{}: PUT {} ({} bytes)", self.name, range, len);

        let response = self
            .http
            .put(&self.handle.session_uri)
            .bearer_auth(self.auth_token.as_str())
            .header(header::CONTENT_RANGE, range)
            .header(header::CONTENT_LENGTH, len)
            .body(data.to_vec())
            .send()
            .await?;

        let status = read_status(response).await?;
        self.apply(&status, Some(self.offset + len))?;
        Ok(status)
    }

    /// Asks the server how many bytes it has persisted.
    pub async fn query_status(&mut self) -> Result<ChunkStatus, Error> {
        self.ensure_active()?;

        let range = content_range(self.offset, 0, self.handle.total_size, false);
        debug!("{}: status query {}", self.name, range);

        let response = self
            .http
            .put(&self.handle.session_uri)
            .bearer_auth(self.auth_token.as_str())
            .header(header::CONTENT_RANGE, range)
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = read_status(response).await?;
        self.apply(&status, self.handle.total_size)?;
        Ok(status)
    }

    /// Uploads `data` completely, starting at the current offset.
    ///
    /// Whatever the server did not persist is sent again. Transient failures
    /// are retried with exponential backoff, each time resynchronizing the
    /// offset with a status query first. Returns `Incomplete` once every byte
    /// of a non-final piece is acknowledged.
    pub async fn send(&mut self, data: &[u8], last: bool) -> Result<ChunkStatus, Error> {
        self.ensure_active()?;

        let start = self.offset;
        let end = start + data.len() as u64;
        let mut failures = 0u32;
        let mut recovering = false;

        loop {
            let before = self.offset;
            let step = if recovering {
                self.query_status().await
            } else {
                let sent = (self.offset - start) as usize;
                self.upload_chunk(&data[sent..], last).await
            };

            let error = match step {
                Ok(ChunkStatus::Complete(file)) => return Ok(ChunkStatus::Complete(file)),
                Ok(ChunkStatus::Incomplete { next_offset }) => {
                    if next_offset > end {
                        return Err(Error::OffsetMismatch {
                            expected: end,
                            actual: next_offset,
                        });
                    }
                    if next_offset == end && !last {
                        return Ok(ChunkStatus::Incomplete { next_offset });
                    }
                    if next_offset > before && !recovering {
                        failures = 0;
                        continue;
                    }
                    if recovering {
                        recovering = false;
                        continue;
                    }
                    // a full PUT that persisted nothing
                    Error::Interrupted(308)
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if failures >= self.config.max_retries {
                return Err(Error::RetriesExhausted {
                    attempts: failures + 1,
                    last: Box::new(error),
                });
            }
            let delay = self.config.backoff_for(failures);
            failures += 1;
            warn!(
                "{}: {} at offset {}, retrying in {:?} ({}/{})",
                self.name, error, self.offset, delay, failures, self.config.max_retries
            );
            tokio::time::sleep(delay).await;
            recovering = true;
        }
    }

    /// Cancels the session on the server. Drive acknowledges with `499`.
    pub async fn abort(&mut self) -> Result<(), Error> {
        self.ensure_active()?;

        let response = self
            .http
            .delete(&self.handle.session_uri)
            .bearer_auth(self.auth_token.as_str())
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 499 || status.as_u16() == 404 || status.is_success() {
            warn!("{}: upload aborted at offset {}", self.name, self.offset);
            self.state = SessionState::Aborted;
            Ok(())
        } else {
            Err(api::Error::from_response(response).await.into())
        }
    }

    fn ensure_active(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Active => Ok(()),
            _ => Err(Error::Finished),
        }
    }

    fn apply(&mut self, status: &ChunkStatus, limit: Option<u64>) -> Result<(), Error> {
        match status {
            ChunkStatus::Incomplete { next_offset } => {
                let next_offset = *next_offset;
                if next_offset < self.offset || limit.map_or(false, |x| next_offset > x) {
                    return Err(Error::OffsetMismatch {
                        expected: self.offset,
                        actual: next_offset,
                    });
                }
                self.offset = next_offset;
            }
            ChunkStatus::Complete(file) => {
                self.offset = self
                    .handle
                    .total_size
                    .or(limit)
                    .or(file.size)
                    .unwrap_or(self.offset);
                info!("{}: upload complete, file id {}", self.name, file.id);
                self.state = SessionState::Complete(file.clone());
            }
        }
        self.report_progress();
        Ok(())
    }

    fn report_progress(&self) {
        if let Some(pl) = self.progress_listener.as_ref() {
            if let Ok(mut f) = pl.lock() {
                f(self.name.clone(), self.offset, self.handle.total_size);
            }
        }
    }
}

/// Extracts the session URI from the response to the initiation request.
pub(crate) async fn read_session_uri(response: Response) -> Result<String, Error> {
    if !response.status().is_success() {
        return Err(api::Error::from_response(response).await.into());
    }
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or(Error::MissingLocation)?;
    location
        .to_str()
        .map(str::to_owned)
        .map_err(|_| Error::MissingLocation)
}

async fn read_status(response: Response) -> Result<ChunkStatus, Error> {
    match response.status().as_u16() {
        200 | 201 => Ok(ChunkStatus::Complete(api::decode_file(response).await?)),
        308 => {
            let next_offset = match response.headers().get(header::RANGE) {
                Some(value) => {
                    let value = value
                        .to_str()
                        .map_err(|_| Error::InvalidRange(format!("{:?}", value)))?;
                    parse_range(value)?
                }
                None => 0,
            };
            Ok(ChunkStatus::Incomplete { next_offset })
        }
        404 | 410 => Err(Error::SessionExpired),
        code @ (500 | 502 | 503 | 504) => Err(Error::Interrupted(code)),
        _ => Err(api::Error::from_response(response).await.into()),
    }
}

/// Parses the `Range: bytes=0-N` header of a `308` response into the next
/// offset to send, `N + 1`.
pub fn parse_range(value: &str) -> Result<u64, Error> {
    let invalid = || Error::InvalidRange(value.to_owned());
    let (first, last) = value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|x| x.split_once('-'))
        .ok_or_else(invalid)?;
    let first: u64 = first.trim().parse().map_err(|_| invalid())?;
    let last: u64 = last.trim().parse().map_err(|_| invalid())?;
    if first != 0 || last == u64::MAX {
        return Err(invalid());
    }
    Ok(last + 1)
}

/// Builds the `Content-Range` header of a chunk of `len` bytes at `start`.
///
/// An empty chunk yields the `bytes */total` form used by status queries and
/// by the closing request of a stream that ended on a chunk boundary.
pub fn content_range(start: u64, len: u64, total: Option<u64>, last: bool) -> String {
    let total = match total {
        Some(total) => total.to_string(),
        None if last => (start + len).to_string(),
        None => "*".to_owned(),
    };
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}
