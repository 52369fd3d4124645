use anyhow::Result;
use gdrive_upload::config::Config;
use gdrive_upload::helper::{self, UploadOptions};
use std::env;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = env::args().collect::<Vec<_>>();

    match args.as_slice() {
        [_, name, auth_token] => {
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let file = helper::upload_reader(
                &mut io::stdin().lock(),
                auth_token,
                UploadOptions {
                    name: Some(name.clone()),
                    config: Config::default().with_chunk_size(4 * 1024 * 1024),
                    cancel_flag: Some(cancel),
                    progress_listener: Some(Arc::new(Mutex::new(
                        |name: Arc<String>, pos: u64, _: Option<u64>| {
                            println!("name: {name} {pos} bytes");
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
        Please input the Drive file name and an OAuth access token, and pipe the content in
        Example:
            tar c my_dir | cargo run --example upload-stdin my_dir.tar ya29.a0Af......
        "
        ),
    }
}
