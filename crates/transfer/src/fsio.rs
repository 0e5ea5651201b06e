use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// An open file a task reads and writes at explicit offsets.
///
/// Handles are shared between the chunk path and the hashing path, so every
/// method takes `&self` and implementations serialize internally.
pub trait FileHandle: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. Returns the number of
    /// bytes read; fewer than requested only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `data` at `offset`, returning the number of bytes written.
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Truncates or extends the file to exactly `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Current file length in bytes.
    fn len(&self) -> io::Result<u64>;
}

/// Filesystem seam the tasks and the checkpoint store go through.
///
/// Production code uses [`StdFilesystem`]; tests substitute implementations
/// that fail or write short on demand.
pub trait Filesystem: Send + Sync {
    /// Opens an existing file read-only.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn FileHandle>>;

    /// Opens a file read-write, creating it if missing. Never truncates.
    fn open_read_write(&self, path: &Path) -> io::Result<Box<dyn FileHandle>>;

    /// Reads a whole file.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces a file's contents, truncating to the new length. Returns the
    /// number of bytes written.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<usize>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem.
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        Ok(Box::new(StdFileHandle { file: Mutex::new(File::open(path)?) }))
    }

    fn open_read_write(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Box::new(StdFileHandle { file: Mutex::new(file) }))
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<usize> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

struct StdFileHandle {
    file: Mutex<File>,
}

impl FileHandle for StdFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.lock().unwrap().set_len(len)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.lock().unwrap().metadata()?.len())
    }
}
