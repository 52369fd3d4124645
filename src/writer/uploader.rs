use crate::api::DriveFile;
use crate::session::{self, ChunkStatus, ResumableSession};
use core::task::Poll;
use log::warn;
use std::{
    cmp, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::runtime::Handle;

/// Called with `(name, uploaded_bytes, total_bytes)`.
pub type ProgressListener =
    Arc<Mutex<dyn FnMut(Arc<String>, u64, Option<u64>) + Send + Sync + 'static>>;

/// Pushes every buffer it receives into a resumable session as a non-final
/// chunk. Meant to sit behind a [`super::splitter::ChunkSplitter`] so each
/// write carries exactly one aligned chunk.
///
/// `write` blocks the current thread until the chunk is acknowledged, which
/// requires a multi-thread tokio runtime.
pub struct ResumableWriter {
    session: ResumableSession,
    cancel_flag: Option<Arc<AtomicBool>>,
    completed: Option<DriveFile>,
    failure: Option<session::Error>,
}

impl ResumableWriter {
    pub fn new(session: ResumableSession, cancel_flag: Option<Arc<AtomicBool>>) -> Self {
        ResumableWriter {
            session,
            cancel_flag,
            completed: None,
            failure: None,
        }
    }

    pub fn session(&self) -> &ResumableSession {
        &self.session
    }

    /// The session error behind the last failed `write`, if any.
    pub fn take_failure(&mut self) -> Option<session::Error> {
        self.failure.take()
    }

    pub async fn abort(&mut self) -> Result<(), session::Error> {
        self.session.abort().await
    }

    /// Sends `tail` as the final chunk and returns the created file. A raised
    /// cancel flag aborts the session instead.
    pub async fn finish(mut self, tail: Vec<u8>) -> Result<DriveFile, session::Error> {
        if let Some(file) = self.completed.take() {
            if tail.is_empty() {
                return Ok(file);
            }
            return Err(session::Error::Finished);
        }
        if self.is_cancelled() {
            if let Err(e) = self.session.abort().await {
                warn!("failed to abort the upload session: {}", e);
            }
            return Err(session::Error::Cancelled);
        }

        match self.session.send(&tail, true).await? {
            ChunkStatus::Complete(file) => Ok(file),
            ChunkStatus::Incomplete { next_offset } => Err(session::Error::OffsetMismatch {
                expected: next_offset + tail.len() as u64,
                actual: next_offset,
            }),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    fn send_blocking(&mut self, buf: &[u8]) -> Result<(), session::Error> {
        if self.is_cancelled() {
            return Err(session::Error::Cancelled);
        }
        let handle = Handle::try_current()?;
        let status =
            tokio::task::block_in_place(|| handle.block_on(self.session.send(buf, false)))?;
        if let ChunkStatus::Complete(file) = status {
            self.completed = Some(file);
        }
        Ok(())
    }
}

impl io::Write for ResumableWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.send_blocking(buf) {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                let err = io::Error::new(io::ErrorKind::Other, e.to_string());
                self.failure = Some(e);
                Err(err)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streams an in-memory request body to reqwest in small pieces, reporting
/// how much of the payload has gone out.
///
/// The first `prefix_len` bytes of `data` (e.g. multipart headers) are not
/// counted as payload.
#[derive(Clone)]
pub struct ProgressStream {
    name: Arc<String>,
    data: Arc<Vec<u8>>,
    cursor: usize,
    prefix_len: usize,
    payload_len: usize,
    progress_listener: Option<ProgressListener>,
}

impl ProgressStream {
    pub fn new(
        name: Arc<String>,
        data: Arc<Vec<u8>>,
        prefix_len: usize,
        payload_len: usize,
        progress_listener: Option<ProgressListener>,
    ) -> Self {
        ProgressStream {
            name,
            data,
            cursor: 0,
            prefix_len,
            payload_len,
            progress_listener,
        }
    }
}

impl futures::Stream for ProgressStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let total_len = self.data.len();
        let remain_len = total_len - self.cursor;

        if remain_len == 0 {
            Poll::Ready(None)
        } else {
            let mut result = vec![0u8; cmp::min(remain_len, 1024 * 32)];
            let start_index = self.cursor;
            self.cursor += result.len();
            result.copy_from_slice(&self.data[start_index..self.cursor]);

            if let Some(pl) = self.progress_listener.as_ref() {
                let sent = cmp::min(self.cursor.saturating_sub(self.prefix_len), self.payload_len);
                if let Ok(mut f) = pl.lock() {
                    f(self.name.clone(), sent as u64, Some(self.payload_len as u64));
                }
            }

            Poll::Ready(Some(Ok(result)))
        }
    }
}
