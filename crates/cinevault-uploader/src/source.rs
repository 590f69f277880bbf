//! Byte sources for upload workers.
//!
//! Workers read disjoint, non-overlapping ranges concurrently, so a source
//! must support random access without shared state. [`FileSource`] opens a
//! fresh handle per read instead of sharing one seekable descriptor between
//! workers.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use cinevault_core::ByteRange;

/// Read-only, random-access byte input for one upload session.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Reads exactly `range.length` bytes starting at `range.offset`.
    async fn read_range(&self, range: ByteRange) -> io::Result<Bytes>;

    /// Total size of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File-backed source. Each `read_range` opens its own handle so concurrent
/// workers never contend on a shared file position, and never hold more
/// than one part's bytes at a time.
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read_range(&self, range: ByteRange) -> io::Result<Bytes> {
        if range.end() > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}..{} exceeds source length {}",
                    range.offset,
                    range.end(),
                    self.len
                ),
            ));
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.offset)).await?;

        let mut buf = vec![0u8; range.length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// In-memory source for tests and small payloads.
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_range(&self, range: ByteRange) -> io::Result<Bytes> {
        if range.end() > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "range exceeds source length",
            ));
        }
        Ok(self
            .data
            .slice(range.offset as usize..range.end() as usize))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn memory_source_slices() {
        let source = MemorySource::new(Bytes::from_static(b"hello world"));
        let chunk = source.read_range(ByteRange::new(6, 5)).await.unwrap();
        assert_eq!(chunk, Bytes::from_static(b"world"));
        assert_eq!(source.len(), 11);

        let err = source.read_range(ByteRange::new(6, 6)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn file_source_reads_disjoint_ranges() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcdefghij").unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.len(), 10);

        let first = source.read_range(ByteRange::new(0, 4)).await.unwrap();
        let second = source.read_range(ByteRange::new(4, 6)).await.unwrap();
        assert_eq!(first, Bytes::from_static(b"abcd"));
        assert_eq!(second, Bytes::from_static(b"efghij"));

        let err = source.read_range(ByteRange::new(8, 4)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
