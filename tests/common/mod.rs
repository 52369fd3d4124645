#![allow(dead_code)]

use gdrive_upload::config::{Config, CHUNK_ALIGNMENT};
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TOKEN: &str = "ya29.test-token";
pub const CHUNK: u64 = CHUNK_ALIGNMENT as u64;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(server: &MockServer) -> Config {
    Config::default()
        .with_upload_url(format!("{}/upload", server.uri()))
        .with_api_url(format!("{}/api", server.uri()))
        .with_chunk_size(CHUNK_ALIGNMENT)
        .with_resumable_threshold(CHUNK)
        .with_backoff(1, 5)
}

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn temp_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

pub fn session_uri(server: &MockServer, session: &str) -> String {
    format!("{}/{}", server.uri(), session)
}

/// Answers one resumable initiation with a session at `/{session}`.
pub async fn mount_session(server: &MockServer, session: &str) {
    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .and(query_param("uploadType", "resumable"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Location", session_uri(server, session)),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
}

pub fn file_json(id: &str, size: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": "upload.bin",
        "mimeType": "application/octet-stream",
        "size": size.to_string(),
    })
}

pub fn incomplete(persisted: u64) -> ResponseTemplate {
    let response = ResponseTemplate::new(308);
    if persisted == 0 {
        response
    } else {
        response.insert_header("Range", format!("bytes=0-{}", persisted - 1).as_str())
    }
}

/// Bodies of every chunk `PUT` sent to `/{session}`, in order.
pub async fn chunks(server: &MockServer, session: &str) -> Vec<Vec<u8>> {
    let target = format!("/{}", session);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r: &Request| r.method.as_str() == "PUT" && r.url.path() == target)
        .filter(|r| !r.body.is_empty())
        .map(|r| r.body)
        .collect()
}

pub fn content_ranges(requests: &[Request]) -> Vec<String> {
    requests
        .iter()
        .filter_map(|r| r.headers.get("content-range"))
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.to_owned())
        .collect()
}
