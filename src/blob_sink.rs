//! Seekable append-or-overwrite byte sink
//!
//! Backs either an in-memory sequence of opaque chunks or a random-access
//! file. Both modes support writing at the cursor and seeking backward to
//! overwrite a previously-written region, which is what lets the muxer
//! reserve placeholder bytes and patch them once the real value is known.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use crate::{Error, Result};

/// One opaque, non-overlapping byte span in a memory-mode sink
#[derive(Debug, Clone)]
struct BlobChunk {
    offset: u64,
    data: Vec<u8>,
}

impl BlobChunk {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// The materialized output of a completed sink
#[derive(Debug, Clone)]
pub struct Blob {
    /// Concatenated bytes in positional order
    pub data: Vec<u8>,
    /// MIME type tag passed to `complete`, if any
    pub mime_type: Option<String>,
}

/// Either an in-memory chunk list or a file handle
pub enum BlobSink {
    /// In-memory mode: an ordered, non-overlapping chunk list
    Memory {
        chunks: Vec<BlobChunk>,
        pos: u64,
        length: u64,
    },
    /// File mode: a random-access file handle
    File { file: File, pos: u64, length: u64 },
}

impl BlobSink {
    /// Create a new in-memory sink
    pub fn memory() -> Self {
        BlobSink::Memory {
            chunks: Vec::new(),
            pos: 0,
            length: 0,
        }
    }

    /// Create a new file-backed sink
    pub fn file(file: File) -> Self {
        BlobSink::File {
            file,
            pos: 0,
            length: 0,
        }
    }

    /// Current write cursor
    pub fn pos(&self) -> u64 {
        match self {
            BlobSink::Memory { pos, .. } => *pos,
            BlobSink::File { pos, .. } => *pos,
        }
    }

    /// One past the highest byte ever written
    pub fn length(&self) -> u64 {
        match self {
            BlobSink::Memory { length, .. } => *length,
            BlobSink::File { length, .. } => *length,
        }
    }

    /// Move the cursor to `offset`. Must be within `[0, length]`.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let length = self.length();
        if offset > length {
            return Err(Error::SeekBeyondEnd { offset, length });
        }
        match self {
            BlobSink::Memory { pos, .. } => *pos = offset,
            BlobSink::File { file, pos, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                *pos = offset;
            }
        }
        Ok(())
    }

    /// Seek using a signed offset, surfacing [`Error::NegativeOffset`] for
    /// negative values before delegating to [`BlobSink::seek`].
    pub fn seek_signed(&mut self, offset: i64) -> Result<()> {
        if offset < 0 {
            return Err(Error::NegativeOffset(offset));
        }
        self.seek(offset as u64)
    }

    /// Write `bytes` at the current cursor, advancing it by `bytes.len()`
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self {
            BlobSink::Memory {
                chunks,
                pos,
                length,
            } => {
                write_memory(chunks, pos, length, bytes)?;
            }
            BlobSink::File { file, pos, length } => {
                file.seek(SeekFrom::Start(*pos))?;
                // std's `write_all` already loops on partial writes; that
                // looping is the "retry until fully written" policy.
                file.write_all(bytes)?;
                *pos += bytes.len() as u64;
                *length = (*length).max(*pos);
            }
        }
        Ok(())
    }

    /// Materialize the sink. Memory mode concatenates its chunks into one
    /// blob; file mode flushes and returns `None` (the bytes already live
    /// on disk).
    pub fn complete(mut self, mime_type: Option<&str>) -> Result<Option<Blob>> {
        match &mut self {
            BlobSink::Memory { chunks, .. } => {
                chunks.sort_by_key(|c| c.offset);
                let mut data = Vec::with_capacity(self.length() as usize);
                for chunk in chunks.iter() {
                    data.extend_from_slice(&chunk.data);
                }
                Ok(Some(Blob {
                    data,
                    mime_type: mime_type.map(str::to_string),
                }))
            }
            BlobSink::File { file, .. } => {
                file.flush()?;
                Ok(None)
            }
        }
    }
}

fn write_memory(
    chunks: &mut Vec<BlobChunk>,
    pos: &mut u64,
    length: &mut u64,
    bytes: &[u8],
) -> Result<()> {
    let offset = *pos;
    let len = bytes.len() as u64;

    if offset >= *length {
        chunks.push(BlobChunk {
            offset,
            data: bytes.to_vec(),
        });
    } else {
        let idx = chunks
            .iter()
            .position(|c| offset >= c.offset && offset < c.end());
        let idx = idx.ok_or(Error::OverwriteCrossesBlobBoundaries { offset, len })?;
        let chunk = &chunks[idx];
        if offset < chunk.offset || offset + len > chunk.end() {
            return Err(Error::OverwriteCrossesBlobBoundaries { offset, len });
        }
        if offset == chunk.offset && len == chunk.len() {
            chunks[idx].data = bytes.to_vec();
        } else {
            let rel = (offset - chunk.offset) as usize;
            chunks[idx].data[rel..rel + bytes.len()].copy_from_slice(bytes);
        }
    }

    *pos = offset + len;
    *length = (*length).max(*pos);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_within_chunk() {
        // S3: write "Hello, ", "world", "?!", "?!"; seek to 2; write "-man"
        let mut sink = BlobSink::memory();
        sink.write(b"Hello, ").unwrap();
        sink.write(b"world").unwrap();
        sink.write(b"?!").unwrap();
        sink.write(b"?!").unwrap();
        sink.seek(2).unwrap();
        sink.write(b"-man").unwrap();

        let blob = sink.complete(None).unwrap().unwrap();
        assert_eq!(blob.data, b"He-man world?!?!");
        assert_eq!(blob.data.len(), 16);
    }

    #[test]
    fn append_after_overwrite() {
        // S4: continue S3, seek to length, append " Hi." (a 4-byte write)
        let mut sink = BlobSink::memory();
        sink.write(b"Hello, ").unwrap();
        sink.write(b"world").unwrap();
        sink.write(b"?!").unwrap();
        sink.write(b"?!").unwrap();
        sink.seek(2).unwrap();
        sink.write(b"-man").unwrap();

        let len = sink.length();
        sink.seek(len).unwrap();
        sink.write(b" Hi.").unwrap();

        let blob = sink.complete(None).unwrap().unwrap();
        assert_eq!(blob.data, b"He-man world?!?! Hi.");
        assert_eq!(blob.data.len(), 20);
    }

    #[test]
    fn overwrite_crossing_boundary_fails() {
        let mut sink = BlobSink::memory();
        sink.write(b"abc").unwrap();
        sink.write(b"def").unwrap();
        sink.seek(2).unwrap();
        let err = sink.write(b"xxxx").unwrap_err();
        assert!(matches!(err, Error::OverwriteCrossesBlobBoundaries { .. }));
    }

    #[test]
    fn seek_beyond_end_fails() {
        let mut sink = BlobSink::memory();
        sink.write(b"abc").unwrap();
        assert!(sink.seek(10).is_err());
    }

    #[test]
    fn append_monotonicity() {
        let mut sink = BlobSink::memory();
        let writes: &[&[u8]] = &[b"a", b"bb", b"ccc", b"dddd"];
        let total: usize = writes.iter().map(|w| w.len()).sum();
        for w in writes {
            sink.write(w).unwrap();
        }
        assert_eq!(sink.length() as usize, total);
        assert_eq!(sink.pos() as usize, total);
    }
}
