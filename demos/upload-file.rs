use anyhow::Result;
use gdrive_upload::helper::{self, UploadOptions};
use gdrive_upload::session::SessionHandle;
use std::env;
use std::fs;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = env::args().collect::<Vec<_>>();

    match args.as_slice() {
        [_, path, auth_token] => upload(path, auth_token, None).await,
        [_, path, auth_token, folder_id] => upload(path, auth_token, Some(folder_id)).await,
        _ => panic!(
            "
        Please input the file path, an OAuth access token and optionally a folder id
        Example:
            cargo run --example upload-file the/path/to/my_file ya29.a0Af...... 1AbCdEf
        "
        ),
    }
}

async fn upload(path: &str, auth_token: &str, folder_id: Option<&String>) -> Result<()> {
    let file = helper::upload_file(
        path,
        auth_token,
        UploadOptions {
            parents: folder_id.into_iter().cloned().collect(),
            progress_listener: Some(Arc::new(Mutex::new(
                |name: Arc<String>, pos: u64, total: Option<u64>| {
                    println!("name: {name} {pos}/{}", total.unwrap_or(0));
                },
            ))),
            // keep the session so `resume-upload` can pick it up after a crash
            on_session: Some(Arc::new(|handle: &SessionHandle| {
                if let Ok(json) = serde_json::to_string(handle) {
                    let _ = fs::write("session.json", json);
                }
            })),
            ..Default::default()
        },
    )
    .await?;

    println!("uploaded: {:?}", file);
    Ok(())
}
