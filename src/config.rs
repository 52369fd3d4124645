//! Upload settings shared by every request a [`crate::client::DriveClient`] makes.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Every non-final chunk of a resumable upload must be a multiple of this size.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_FIELDS: &str = "id,name,mimeType,size,parents,md5Checksum";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Chunk size {0} is not a positive multiple of {} bytes", CHUNK_ALIGNMENT)]
    InvalidChunkSize(usize),
    #[error("Invalid base url: {0}")]
    InvalidUrl(String),
    #[error("Config JSON parsing error: {0:?}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base of the media upload endpoints.
    pub upload_url: String,
    /// Base of the metadata endpoints.
    pub api_url: String,
    pub chunk_size: usize,
    /// Payloads larger than this go through a resumable session.
    pub resumable_threshold: u64,
    /// Consecutive transient failures tolerated while sending one chunk.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub supports_all_drives: bool,
    /// Value of the `fields` query parameter.
    pub fields: String,
    pub restart_expired_sessions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upload_url: DEFAULT_UPLOAD_URL.to_owned(),
            api_url: DEFAULT_API_URL.to_owned(),
            chunk_size: 8 * 1024 * 1024,
            resumable_threshold: 5 * 1024 * 1024,
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 32_000,
            timeout_secs: 300,
            supports_all_drives: true,
            fields: DEFAULT_FIELDS.to_owned(),
            restart_expired_sessions: true,
        }
    }
}

impl Config {
    /// Parses a JSON document; absent keys keep their defaults.
    pub fn from_json(s: &str) -> Result<Config, Error> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(Error::InvalidChunkSize(self.chunk_size));
        }
        for url in [&self.upload_url, &self.api_url] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidUrl(url.clone()));
            }
        }
        Ok(())
    }

    pub fn with_chunk_size(mut self, v: usize) -> Self {
        self.chunk_size = v;
        self
    }

    pub fn with_resumable_threshold(mut self, v: u64) -> Self {
        self.resumable_threshold = v;
        self
    }

    pub fn with_max_retries(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    pub fn with_timeout_secs(mut self, v: u64) -> Self {
        self.timeout_secs = v;
        self
    }

    pub fn with_upload_url(mut self, v: impl Into<String>) -> Self {
        self.upload_url = v.into();
        self
    }

    pub fn with_api_url(mut self, v: impl Into<String>) -> Self {
        self.api_url = v.into();
        self
    }

    pub fn with_fields(mut self, v: impl Into<String>) -> Self {
        self.fields = v.into();
        self
    }

    pub fn with_supports_all_drives(mut self, v: bool) -> Self {
        self.supports_all_drives = v;
        self
    }

    pub fn with_restart_expired_sessions(mut self, v: bool) -> Self {
        self.restart_expired_sessions = v;
        self
    }

    /// Delay before retry number `attempt` (starting at 0).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub(crate) fn upload_url(&self) -> &str {
        self.upload_url.trim_end_matches('/')
    }

    pub(crate) fn api_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub(crate) fn common_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![];
        if !self.fields.is_empty() {
            query.push(("fields", self.fields.clone()));
        }
        if self.supports_all_drives {
            query.push(("supportsAllDrives", "true".to_owned()));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_unaligned_chunk_size() {
        let config = Config::default().with_chunk_size(CHUNK_ALIGNMENT + 1);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidChunkSize(n)) if n == CHUNK_ALIGNMENT + 1
        ));
        assert!(Config::default().with_chunk_size(0).validate().is_err());
    }

    #[test]
    fn rejects_url_without_scheme() {
        let config = Config::default().with_upload_url("localhost:8080");
        assert!(matches!(config.validate(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn json_keeps_defaults_for_missing_keys() {
        let config = Config::from_json(r#"{"chunk_size": 524288, "max_retries": 2}"#).unwrap();
        assert_eq!(config.chunk_size, 512 * 1024);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.resumable_threshold, 5 * 1024 * 1024);
        assert_eq!(config.upload_url, DEFAULT_UPLOAD_URL);
    }

    #[test]
    fn json_is_validated() {
        assert!(matches!(
            Config::from_json(r#"{"chunk_size": 1000}"#),
            Err(Error::InvalidChunkSize(1000))
        ));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = Config::default().with_backoff(100, 1000);
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(800));
        assert_eq!(config.backoff_for(4), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(80), Duration::from_millis(1000));
    }

    #[test]
    fn common_query_honors_flags() {
        let config = Config::default()
            .with_fields("")
            .with_supports_all_drives(false);
        assert!(config.common_query().is_empty());

        let query = Config::default().common_query();
        assert_eq!(query[0], ("fields", DEFAULT_FIELDS.to_owned()));
        assert_eq!(query[1], ("supportsAllDrives", "true".to_owned()));
    }
}
