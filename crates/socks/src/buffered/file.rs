use super::{BufferedIterator, BufferedSequence};
use crate::SocketError;

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

/// The byte range `[offset, offset + len)` of a file.
///
/// Each iterator opens the file on its first read, so the sequence can be
/// read any number of times.
#[derive(Debug, Clone)]
pub struct BufferedFile {
    path: Arc<PathBuf>,
    offset: u64,
    len: usize,
}

impl BufferedFile {
    /// The whole file as it is right now.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SocketError> {
        let path = path.into();
        let len = Self::size(&path)?;
        Ok(Self::with_range(path, 0, len))
    }

    pub fn with_range(path: impl Into<PathBuf>, offset: u64, len: usize) -> Self {
        Self { path: Arc::new(path.into()), offset, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the file at `path` in bytes.
    pub fn size(path: &Path) -> Result<usize, SocketError> {
        let metadata = std::fs::metadata(path).map_err(|e| SocketError::from_io("metadata", &e))?;
        usize::try_from(metadata.len()).map_err(|_overflow| SocketError::unexpected_state("file too large"))
    }
}

impl BufferedSequence for BufferedFile {
    type Iter = FileIter;

    fn make_iter(&self) -> Self::Iter {
        FileIter { path: Arc::clone(&self.path), offset: self.offset, remaining: self.len, file: None }
    }
}

#[derive(Debug)]
pub struct FileIter {
    path: Arc<PathBuf>,
    offset: u64,
    remaining: usize,
    file: Option<File>,
}

impl FileIter {
    async fn file(&mut self) -> Result<&mut File, SocketError> {
        if self.file.is_none() {
            let mut file = File::open(self.path.as_path()).await.map_err(|e| SocketError::from_io("open", &e))?;
            file.seek(SeekFrom::Start(self.offset)).await.map_err(|e| SocketError::from_io("seek", &e))?;
            trace!(path = %self.path.display(), offset = self.offset, "opened buffered file");
            self.file = Some(file);
        }
        self.file.as_mut().ok_or_else(|| SocketError::unexpected_state("file not open"))
    }
}

#[async_trait]
impl BufferedIterator for FileIter {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.remaining == 0 || at_most == 0 {
            self.file = None;
            return Ok(None);
        }
        let mut buffer = vec![0; at_most.min(self.remaining)];
        let read = self.file().await?.read(&mut buffer).await.map_err(|e| SocketError::from_io("read", &e))?;
        if read == 0 {
            // the file shrank below the declared range
            self.remaining = 0;
            self.file = None;
            return Err(SocketError::Disconnected);
        }
        buffer.truncate(read);
        self.remaining -= read;
        Ok(Some(Bytes::from(buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffered::collect;

    fn fixture(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ferry-socks-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_whole_file_repeatedly() {
        let path = fixture("whole", b"Fish & Chips");
        let file = BufferedFile::open(&path).unwrap();
        assert_eq!(file.len(), 12);

        for _ in 0..2 {
            let mut iter = file.make_iter();
            assert_eq!(collect(&mut iter, 5).await.unwrap(), Bytes::from_static(b"Fish & Chips"));
            assert_eq!(iter.next_buffer(5).await.unwrap(), None);
        }
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_a_range() {
        let path = fixture("range", b"0123456789");
        let file = BufferedFile::with_range(&path, 3, 4);
        let mut iter = file.make_iter();
        assert_eq!(iter.next_exact(4).await.unwrap(), Bytes::from_static(b"3456"));
        assert_eq!(iter.next_buffer(1).await.unwrap(), None);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn truncated_file_disconnects() {
        let path = fixture("short", b"abc");
        let file = BufferedFile::with_range(&path, 0, 10);
        let mut iter = file.make_iter();
        assert_eq!(iter.next_exact(10).await.unwrap_err(), SocketError::Disconnected);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_fails() {
        let error = BufferedFile::open("/nonexistent/ferry/file").unwrap_err();
        assert!(matches!(error, SocketError::Failed { kind: "metadata", .. }));
    }
}
