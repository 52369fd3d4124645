use crate::api::{self, DriveFile, FileMetadata};
use crate::config::{self, Config};
use crate::session::{self, ResumableSession, SessionHandle};
use crate::writer::uploader::{ProgressListener, ProgressStream};
use log::{info, warn};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{header, redirect::Policy, Body, Client, RequestBuilder};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    ConfigError(#[from] config::Error),
    #[error("Reqwest error: {0:?}")]
    ReqwestError(#[from] reqwest::Error),
}

/// Where the uploaded media ends up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadTarget {
    /// A new file.
    #[default]
    Create,
    /// Replaces the content of the file with this id.
    Update(String),
}

impl UploadTarget {
    fn request(&self, http: &Client, base: &str) -> RequestBuilder {
        match self {
            UploadTarget::Create => http.post(format!("{}/files", base)),
            UploadTarget::Update(file_id) => http.patch(format!("{}/files/{}", base, file_id)),
        }
    }
}

/// A Drive client bound to one access token.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    auth_token: Arc<String>,
    config: Arc<Config>,
}

impl DriveClient {
    pub fn new(auth_token: impl Into<String>, config: Config) -> Result<Self, Error> {
        config.validate()?;
        // 308 is part of the upload protocol, never a redirect to follow
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(Policy::none())
            .build()?;

        Ok(DriveClient {
            http,
            auth_token: Arc::new(auth_token.into()),
            config: Arc::new(config),
        })
    }

    /// Fetches the metadata of an existing file.
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile, api::Error> {
        let response = self
            .http
            .get(format!("{}/files/{}", self.config.api_url(), file_id))
            .query(&self.config.common_query())
            .header("accept", "application/json")
            .bearer_auth(self.auth_token.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api::Error::from_response(response).await);
        }
        api::decode_file(response).await
    }

    /// Uploads metadata and media in one `multipart/related` request.
    pub async fn upload_single(
        &self,
        target: &UploadTarget,
        metadata: &FileMetadata,
        content_type: &str,
        data: Vec<u8>,
        progress_listener: Option<ProgressListener>,
    ) -> Result<DriveFile, api::Error> {
        let metadata_json =
            serde_json::to_vec(metadata).map_err(|e| api::Error::SerdeJSONError(e, String::new()))?;
        let boundary = gen_boundary(&data);
        let payload_len = data.len();
        let (body, prefix_len) = multipart_related(&boundary, &metadata_json, content_type, &data);
        let body_len = body.len();

        let name = Arc::new(metadata.name.clone().unwrap_or_default());
        let stream = ProgressStream::new(
            name.clone(),
            Arc::new(body),
            prefix_len,
            payload_len,
            progress_listener,
        );

        let response = target
            .request(&self.http, self.config.upload_url())
            .query(&[("uploadType", "multipart")])
            .query(&self.config.common_query())
            .bearer_auth(self.auth_token.as_str())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(header::CONTENT_LENGTH, body_len)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api::Error::from_response(response).await);
        }
        let file = api::decode_file(response).await?;
        info!("{}: uploaded {} bytes in one request, file id {}", name, payload_len, file.id);
        Ok(file)
    }

    /// Opens a resumable session. `total_size` is `None` for streams of
    /// unknown length.
    pub async fn start_resumable(
        &self,
        target: &UploadTarget,
        metadata: &FileMetadata,
        content_type: &str,
        total_size: Option<u64>,
        progress_listener: Option<ProgressListener>,
    ) -> Result<ResumableSession, session::Error> {
        let metadata_json =
            serde_json::to_vec(metadata).map_err(|e| api::Error::SerdeJSONError(e, String::new()))?;
        let name = metadata.name.clone().unwrap_or_default();

        let mut failures = 0u32;
        let session_uri = loop {
            let mut request = target
                .request(&self.http, self.config.upload_url())
                .query(&[("uploadType", "resumable")])
                .query(&self.config.common_query())
                .bearer_auth(self.auth_token.as_str())
                .header(header::CONTENT_TYPE, "application/json; charset=UTF-8")
                .header("X-Upload-Content-Type", content_type);
            if let Some(size) = total_size {
                request = request.header("X-Upload-Content-Length", size);
            }

            let result = match request.body(metadata_json.clone()).send().await {
                Ok(response) => session::read_session_uri(response).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(uri) => break uri,
                Err(session::Error::ApiError(e))
                    if e.is_transient() && failures < self.config.max_retries =>
                {
                    let delay = self.config.backoff_for(failures);
                    failures += 1;
                    warn!("{}: starting session failed: {}, retrying in {:?}", name, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!("{}: resumable session started, {:?} bytes", name, total_size);
        let handle = SessionHandle {
            session_uri,
            name,
            content_type: content_type.to_owned(),
            total_size,
        };
        Ok(self.attach(handle, progress_listener))
    }

    /// Re-attaches to a session started earlier and synchronizes its offset
    /// with the server.
    pub async fn resume_session(
        &self,
        handle: SessionHandle,
        progress_listener: Option<ProgressListener>,
    ) -> Result<ResumableSession, session::Error> {
        let mut session = self.attach(handle, progress_listener);
        session.query_status().await?;
        info!(
            "{}: resuming session at offset {}",
            session.handle().name,
            session.offset()
        );
        Ok(session)
    }

    fn attach(
        &self,
        handle: SessionHandle,
        progress_listener: Option<ProgressListener>,
    ) -> ResumableSession {
        ResumableSession::new(
            self.http.clone(),
            self.config.clone(),
            self.auth_token.clone(),
            handle,
            progress_listener,
        )
    }
}

fn gen_boundary(data: &[u8]) -> String {
    loop {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let boundary = format!("gdrive_upload_{}", token);
        if !data.windows(boundary.len()).any(|w| w == boundary.as_bytes()) {
            return boundary;
        }
    }
}

/// Lays out a two-part `multipart/related` body: JSON metadata first, media
/// second. Also returns the offset at which the media starts.
fn multipart_related(
    boundary: &str,
    metadata_json: &[u8],
    content_type: &str,
    data: &[u8],
) -> (Vec<u8>, usize) {
    let mut body = Vec::with_capacity(data.len() + metadata_json.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata_json);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    let prefix_len = body.len();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (body, prefix_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_layout() {
        let (body, prefix_len) =
            multipart_related("b0", br#"{"name":"a.txt"}"#, "text/plain", b"hello");
        let expected = "--b0\r\n\
            Content-Type: application/json; charset=UTF-8\r\n\r\n\
            {\"name\":\"a.txt\"}\r\n\
            --b0\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --b0--\r\n";
        assert_eq!(String::from_utf8(body.clone()).unwrap(), expected);
        assert_eq!(&body[prefix_len..prefix_len + 5], b"hello");
    }

    #[test]
    fn boundary_is_absent_from_payload() {
        let data = vec![b'x'; 1024];
        let boundary = gen_boundary(&data);
        assert!(boundary.starts_with("gdrive_upload_"));
        assert_eq!(boundary.len(), "gdrive_upload_".len() + 32);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = Config::default().with_chunk_size(1);
        assert!(matches!(
            DriveClient::new("token", config),
            Err(Error::ConfigError(config::Error::InvalidChunkSize(1)))
        ));
    }

    #[test]
    fn update_target_uses_patch() {
        let http = Client::new();
        let request = UploadTarget::Update("abc".to_owned())
            .request(&http, "https://example.com/upload")
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::PATCH);
        assert_eq!(request.url().as_str(), "https://example.com/upload/files/abc");

        let request = UploadTarget::Create
            .request(&http, "https://example.com/upload")
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
    }
}
