//! Journal backends: where durably-flushed bytes actually land.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// A place the journal can durably write its framed byte stream.
///
/// `append` must not return until the bytes are visible to a subsequent
/// reader of the same backend; `sync` must not return until they survive a
/// crash. The journal calls `append` then `sync` for every flush.
pub trait JournalBackend: Send {
    /// Append `bytes` to the log.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Durably persist everything appended so far.
    fn sync(&mut self) -> io::Result<()>;

    /// Read back the entire log, for recovery.
    fn read_all(&mut self) -> io::Result<Vec<u8>>;
}

/// An in-memory backend: "acks immediately", the no-op logger permitted by
/// spec.md §4.5 for testing. Not actually durable across process restarts
/// unless the same instance is kept around.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// A fresh, empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalBackend for InMemoryBackend {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// A file-backed append-only log.
pub struct FileBackend {
    file: Mutex<File>,
}

impl FileBackend {
    /// Open (creating if absent) the journal file at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(FileBackend {
            file: Mutex::new(file),
        })
    }
}

impl JournalBackend for FileBackend {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.get_mut().write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.get_mut().sync_data()
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let file = self.file.get_mut();
        let mut buf = Vec::new();
        // Read from the start regardless of the append cursor's position.
        let mut clone = file.try_clone()?;
        use std::io::Seek;
        clone.seek(std::io::SeekFrom::Start(0))?;
        clone.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// A backend whose every `append`/`sync` fails, for testing the
/// `JournalUnavailable` fatal path (spec.md §7, scenario S5).
#[derive(Debug, Default)]
pub struct FailingBackend;

impl JournalBackend for FailingBackend {
    fn append(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "journal backend unavailable"))
    }

    fn sync(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "journal backend unavailable"))
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::Other, "journal backend unavailable"))
    }
}
