use crate::api::{self, DriveFile, FileMetadata};
use crate::client::{self, DriveClient, UploadTarget};
use crate::config::Config;
use crate::session::{self, ChunkStatus, ResumableSession, SessionHandle};
use crate::writer::{splitter::ChunkSplitter, uploader, ChainWrite};
use log::warn;
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Client error: {0}")]
    ClientError(#[from] client::Error),
    #[error("Drive API error: {0}")]
    ApiError(#[from] api::Error),
    #[error("Upload session error: {0}")]
    SessionError(#[from] session::Error),
    #[error("Cannot derive a file name from {0}")]
    NoFileName(PathBuf),
    #[error("A name is required to upload a stream")]
    MissingName,
    #[error("Session expects {expected} bytes but the local file has {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::SessionError(session::Error::Cancelled))
    }
}

/// Called with the handle of every session right after it is opened.
pub type SessionListener = Arc<dyn Fn(&SessionHandle) + Send + Sync + 'static>;

#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Defaults to the file name of the uploaded path.
    pub name: Option<String>,
    pub parents: Vec<String>,
    /// Defaults to `application/octet-stream`.
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub target: UploadTarget,
    pub config: Config,
    pub progress_listener: Option<uploader::ProgressListener>,
    /// Setting the flag aborts the upload before its next chunk.
    pub cancel_flag: Option<Arc<AtomicBool>>,
    pub on_session: Option<SessionListener>,
}

impl UploadOptions {
    fn metadata(&self, name: String) -> FileMetadata {
        FileMetadata {
            name: Some(name),
            parents: self.parents.clone(),
            mime_type: self.mime_type.clone(),
            description: self.description.clone(),
        }
    }

    fn content_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    fn notify_session(&self, handle: &SessionHandle) {
        if let Some(listener) = self.on_session.as_ref() {
            listener(handle);
        }
    }
}

fn file_name(path: &Path) -> Result<String, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|x| x.to_owned())
        .ok_or_else(|| Error::NoFileName(path.to_owned()))
}

/// Uploads a local file, in one request when it is small enough and through
/// a resumable session otherwise.
pub async fn upload_file(
    path: impl AsRef<Path>,
    auth_token: impl AsRef<str>,
    options: UploadOptions,
) -> Result<DriveFile, Error> {
    let path = path.as_ref();
    let name = match options.name.clone() {
        Some(name) => name,
        None => file_name(path)?,
    };
    let size = tokio::fs::metadata(path).await?.len();
    let client = DriveClient::new(auth_token.as_ref(), options.config.clone())?;
    let metadata = options.metadata(name);

    if size <= options.config.resumable_threshold {
        let data = tokio::fs::read(path).await?;
        if options.is_cancelled() {
            return Err(session::Error::Cancelled.into());
        }
        let file = client
            .upload_single(
                &options.target,
                &metadata,
                options.content_type(),
                data,
                options.progress_listener.clone(),
            )
            .await?;
        return Ok(file);
    }

    let mut restarted = false;
    loop {
        let mut session = client
            .start_resumable(
                &options.target,
                &metadata,
                options.content_type(),
                Some(size),
                options.progress_listener.clone(),
            )
            .await?;
        options.notify_session(session.handle());

        match send_file(&mut session, path, size, &options).await {
            Err(Error::SessionError(session::Error::SessionExpired))
                if options.config.restart_expired_sessions && !restarted =>
            {
                warn!(
                    "{}: session expired at offset {}, restarting from the beginning",
                    session.handle().name,
                    session.offset()
                );
                restarted = true;
            }
            result => return result,
        }
    }
}

/// Continues a session persisted from an earlier [`upload_file`] call.
pub async fn resume_file(
    handle: SessionHandle,
    path: impl AsRef<Path>,
    auth_token: impl AsRef<str>,
    options: UploadOptions,
) -> Result<DriveFile, Error> {
    let path = path.as_ref();
    let client = DriveClient::new(auth_token.as_ref(), options.config.clone())?;
    let mut session = client
        .resume_session(handle, options.progress_listener.clone())
        .await?;
    if let Some(file) = session.file() {
        return Ok(file.clone());
    }

    let local = tokio::fs::metadata(path).await?.len();
    let size = session.handle().total_size.unwrap_or(local);
    if size != local {
        return Err(Error::SizeMismatch {
            expected: size,
            actual: local,
        });
    }
    send_file(&mut session, path, size, &options).await
}

/// Uploads everything `reader` yields through a resumable session. The
/// length does not need to be known in advance.
///
/// Must run on a multi-thread tokio runtime.
pub async fn upload_reader(
    reader: &mut impl io::Read,
    auth_token: impl AsRef<str>,
    options: UploadOptions,
) -> Result<DriveFile, Error> {
    let name = options.name.clone().ok_or(Error::MissingName)?;
    let client = DriveClient::new(auth_token.as_ref(), options.config.clone())?;
    let session = client
        .start_resumable(
            &options.target,
            &options.metadata(name),
            options.content_type(),
            None,
            options.progress_listener.clone(),
        )
        .await?;
    options.notify_session(session.handle());

    let writer = uploader::ResumableWriter::new(session, options.cancel_flag.clone());
    let mut splitter = ChunkSplitter::new(options.config.chunk_size, writer);

    if let Err(e) = io::copy(reader, &mut splitter) {
        let writer = splitter.next_writer();
        return match writer.take_failure() {
            Some(session::Error::Cancelled) => {
                abort_quietly(writer.abort().await);
                Err(session::Error::Cancelled.into())
            }
            Some(failure) => Err(failure.into()),
            None => Err(e.into()),
        };
    }

    let (tail, writer) = splitter.into_parts();
    Ok(writer.finish(tail).await?)
}

async fn send_file(
    session: &mut ResumableSession,
    path: &Path,
    size: u64,
    options: &UploadOptions,
) -> Result<DriveFile, Error> {
    let chunk_size = options.config.chunk_size;
    let mut source = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; chunk_size];

    loop {
        if options.is_cancelled() {
            abort_quietly(session.abort().await);
            return Err(session::Error::Cancelled.into());
        }

        let offset = session.offset();
        if offset > size {
            return Err(session::Error::OffsetMismatch {
                expected: size,
                actual: offset,
            }
            .into());
        }
        let len = (size - offset).min(chunk_size as u64) as usize;
        source.seek(io::SeekFrom::Start(offset)).await?;
        source.read_exact(&mut buf[..len]).await?;
        let last = offset + len as u64 == size;

        match session.send(&buf[..len], last).await? {
            ChunkStatus::Complete(file) => return Ok(file),
            ChunkStatus::Incomplete { next_offset } if last => {
                return Err(session::Error::OffsetMismatch {
                    expected: size,
                    actual: next_offset,
                }
                .into())
            }
            ChunkStatus::Incomplete { .. } => {}
        }
    }
}

fn abort_quietly(result: Result<(), session::Error>) {
    if let Err(e) = result {
        warn!("failed to abort the upload session: {}", e);
    }
}
