//! `gdrive-upload` is a crate to upload files to Google Drive (API v3).
//!
//! These features are supported:
//! * Single-shot `multipart/related` uploads for small files.
//! * Chunked resumable uploads that survive interruptions, resend whatever
//!   the server did not persist, and retry transient failures with backoff.
//! * Re-attaching to a persisted session, even from another process.
//! * Streaming uploads of sources with unknown length.
//! * Progress listeners and cancellation.
//!
//! Obtaining the OAuth access token is left to the caller.
//!
//! ## Example
//!
//! To upload a single file:
//! ```rust,no_run
//! # use std::sync::{Arc, Mutex};
//! # async fn run(path: &str, auth_token: &str) -> Result<(), gdrive_upload::helper::Error> {
//! let file = gdrive_upload::helper::upload_file(
//!     path,  // the file path
//!     auth_token,  // an OAuth access token with a Drive scope
//!     gdrive_upload::helper::UploadOptions {
//!         parents: vec!["folder-id".to_owned()],  // the destination folder
//!         progress_listener: Some(Arc::new(Mutex::new(|name: Arc<String>, pos: u64, total: Option<u64>| {  // the progress listener
//!             println!("name: {name} {pos}/{total:?}");
//!         }))),
//!         ..Default::default()
//!     },
//! )
//! .await?;
//! println!("uploaded as {}", file.id);
//! # Ok(())
//! # }
//! ```
//!
//! To keep an interrupted upload going later, persist the [`session::SessionHandle`]
//! handed to `UploadOptions::on_session` and pass it to [`helper::resume_file`].

pub mod api;
pub mod client;
pub mod config;
pub mod helper;
pub mod session;
pub mod writer;
