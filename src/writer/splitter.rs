use super::*;
use std::io;
use std::mem;

/// Regroups arbitrary writes into pieces of exactly `chunk_size` bytes for
/// the next writer. The tail that does not fill a whole chunk stays buffered
/// until [`ChunkSplitter::into_parts`].
pub struct ChunkSplitter<W: io::Write> {
    chunk_size: usize,
    chunk: Vec<u8>,
    next_writer: W,
}

impl<W: io::Write> ChunkSplitter<W> {
    pub fn new(chunk_size: usize, next_writer: W) -> Self {
        ChunkSplitter {
            chunk_size,
            chunk: Vec::with_capacity(chunk_size),
            next_writer,
        }
    }

    /// Bytes written so far that have not been forwarded yet.
    pub fn buffered(&self) -> usize {
        self.chunk.len()
    }

    pub fn into_parts(self) -> (Vec<u8>, W) {
        (self.chunk, self.next_writer)
    }
}

impl<W: io::Write> io::Write for ChunkSplitter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let take = (self.chunk_size - self.chunk.len()).min(rest.len());
            self.chunk.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.chunk.len() == self.chunk_size {
                let chunk = mem::take(&mut self.chunk);
                if let Err(e) = self.next_writer.write_all(&chunk) {
                    // keep the unsent chunk
                    self.chunk = chunk;
                    return Err(e);
                }
                self.chunk = chunk;
                self.chunk.clear();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.next_writer().flush()
    }
}

impl<W: io::Write> ChainWrite<W> for ChunkSplitter<W> {
    fn next(self) -> W {
        self.next_writer
    }
    fn next_writer(&mut self) -> &mut W {
        &mut self.next_writer
    }
}
