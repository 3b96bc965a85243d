//! Byte streams feeding the decoder input.
//!
//! [`FileSource`] reads a file sequentially; [`MemorySource`] serves an
//! in-memory buffer (tests, embedded assets).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ip_common::ByteSource;

/// Sequential reader over a file on disk.
///
/// The size is taken once at open; the file is not expected to change
/// while a session streams it.
pub struct FileSource {
    path: PathBuf,
    file: File,
    len: u64,
    position: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        tracing::info!(path = %path.display(), size = len, "Opened input file");
        Ok(Self {
            path,
            file,
            len,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("position", &self.position)
            .finish()
    }
}

/// Byte stream over an owned buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.data[self.position..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.position += n;
        Ok(n)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ip-source-{}-{}",
            std::process::id(),
            name
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    // ── MemorySource ─────────────────────────────────────────────

    #[test]
    fn memory_source_reads_sequentially() {
        let mut src = MemorySource::new(b"hello world".to_vec());
        assert_eq!(src.len(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(src.position(), 5);
        assert_eq!(src.remaining(), 6);

        let mut rest = [0u8; 16];
        assert_eq!(src.read(&mut rest).unwrap(), 6);
        assert_eq!(&rest[..6], b" world");
        assert_eq!(src.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn memory_source_rewinds() {
        let mut src = MemorySource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 3];
        src.read(&mut buf).unwrap();
        src.rewind().unwrap();
        assert_eq!(src.position(), 0);
        assert_eq!(src.remaining(), 3);
    }

    #[test]
    fn empty_memory_source() {
        let mut src = MemorySource::default();
        assert!(src.is_empty());
        assert_eq!(src.read(&mut [0u8; 4]).unwrap(), 0);
    }

    // ── FileSource ───────────────────────────────────────────────

    #[test]
    fn file_source_reports_size_and_reads() {
        let path = temp_file("read", b"0123456789");
        let mut src = FileSource::open(&path).unwrap();
        assert_eq!(src.len(), 10);
        assert_eq!(src.path(), path.as_path());

        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(src.position(), 4);

        src.rewind().unwrap();
        let mut all = [0u8; 10];
        let mut got = 0;
        while got < all.len() {
            got += src.read(&mut all[got..]).unwrap();
        }
        assert_eq!(&all, b"0123456789");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = FileSource::open("/nonexistent/ip-source-missing").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
