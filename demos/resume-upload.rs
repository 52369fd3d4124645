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
        [_, session_file, path, auth_token] => {
            let handle: SessionHandle = serde_json::from_str(&fs::read_to_string(session_file)?)?;
            let file = helper::resume_file(
                handle,
                path,
                auth_token,
                UploadOptions {
                    progress_listener: Some(Arc::new(Mutex::new(
                        |name: Arc<String>, pos: u64, total: Option<u64>| {
                            println!("name: {name} {pos}/{}", total.unwrap_or(0));
                        },
                    ))),
                    ..Default::default()
                },
            )
            .await?;
            println!("uploaded: {:?}", file);
            Ok(())
        }
        _ => panic!(
            "
        Please input the saved session file, the file path and an OAuth access token
        Example:
            cargo run --example resume-upload session.json the/path/to/my_file ya29.a0Af......
        "
        ),
    }
}
