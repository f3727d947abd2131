//! Filesystem capability used by report writers.
//!
//! Writers only touch disk through [`FileSystem`], so a sandboxed host can
//! report itself unavailable (and get a no-op writer) and tests can inject
//! failures.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

pub trait FileSystem: Send + Sync + fmt::Debug {
    /// False in hosts without filesystem access
    fn is_available(&self) -> bool {
        true
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Create or overwrite
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Append, creating the file when missing
    fn append_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;

    /// Read up to `buf.len()` bytes at `offset`; 0 at end of file
    fn read_chunk(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// `None` when the path does not exist
    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>>;

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// `std::fs`-backed implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn append_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(contents)
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.set_len(len)
    }

    fn read_chunk(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStat {
                len: meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// `Read + Seek` view of a file through a [`FileSystem`]
pub struct FsReader<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
    offset: u64,
    len: u64,
}

impl<'a> FsReader<'a> {
    pub fn open(fs: &'a dyn FileSystem, path: &Path) -> io::Result<Self> {
        let stat = fs.stat(path)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })?;
        Ok(Self {
            fs,
            path: path.to_path_buf(),
            offset: 0,
            len: stat.len,
        })
    }
}

impl Read for FsReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.fs.read_chunk(&self.path, self.offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for FsReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
        };
        self.offset = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        Ok(self.offset)
    }
}

/// `Write` adapter appending every write to a file through a [`FileSystem`]
pub struct FsAppender<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl<'a> FsAppender<'a> {
    pub fn new(fs: &'a dyn FileSystem, path: &Path) -> Self {
        Self {
            fs,
            path: path.to_path_buf(),
        }
    }
}

impl Write for FsAppender<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fs.append_file(&self.path, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
