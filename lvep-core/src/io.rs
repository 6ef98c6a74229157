//! # I/O Bridge
//!
//! Adapts the host engine's file objects (or an in-memory buffer) to the
//! pull-based read/seek interface the demuxers consume.
//!
//! ```text
//! host File ──► FileSource ──┐
//!                            ├──► IoBridge ──► Read + Seek + MediaSource
//! FileData  ──► MemorySource ┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{LvepError, Result};

// ============================================================================
// Host file capability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Closed,
    Read,
    Write,
    Append,
}

/// The engine's abstract file object. Positions are always absolute.
pub trait MediaFile: Send {
    fn is_open(&self) -> bool;
    fn mode(&self) -> FileMode;
    fn open(&mut self, mode: FileMode) -> io::Result<()>;
    fn close(&mut self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    fn tell(&mut self) -> io::Result<u64>;
    fn size(&mut self) -> io::Result<u64>;
    fn filename(&self) -> &str;
}

/// A host file shared between the engine and any bridge reading from it.
pub type SharedFile = Arc<Mutex<dyn MediaFile>>;

/// Filesystem-backed [`MediaFile`].
pub struct DiskFile {
    path: PathBuf,
    filename: String,
    file: Option<File>,
    mode: FileMode,
}

impl DiskFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let filename = path.to_string_lossy().to_string();
        Self {
            path,
            filename,
            file: None,
            mode: FileMode::Closed,
        }
    }

    pub fn shared<P: AsRef<Path>>(path: P) -> SharedFile {
        Arc::new(Mutex::new(Self::new(path)))
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file is not open"))
    }

    /// Write through the handle (only meaningful in write/append mode).
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.handle()?.write_all(data)
    }
}

impl MediaFile for DiskFile {
    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn mode(&self) -> FileMode {
        self.mode
    }

    fn open(&mut self, mode: FileMode) -> io::Result<()> {
        if self.file.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is already open", self.filename),
            ));
        }
        let file = match mode {
            FileMode::Read => File::open(&self.path)?,
            FileMode::Write => File::create(&self.path)?,
            FileMode::Append => OpenOptions::new().append(true).create(true).open(&self.path)?,
            FileMode::Closed => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot open a file in closed mode",
                ))
            }
        };
        self.file = Some(file);
        self.mode = mode;
        Ok(())
    }

    fn close(&mut self) -> bool {
        self.mode = FileMode::Closed;
        self.file.take().is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.handle()?.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.handle()?.stream_position()
    }

    fn size(&mut self) -> io::Result<u64> {
        match self.file.as_ref() {
            Some(file) => Ok(file.metadata()?.len()),
            None => Ok(std::fs::metadata(&self.path)?.len()),
        }
    }

    fn filename(&self) -> &str {
        &self.filename
    }
}

/// In-memory file contents with the name they were loaded under.
#[derive(Debug, Clone)]
pub struct FileData {
    name: String,
    bytes: Bytes,
}

impl FileData {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ============================================================================
// Byte sources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
    /// Report the total size without moving
    Size,
}

pub trait ByteSource: Send + Sync {
    /// Returns 0 at end of data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Returns the new absolute position, or the size for [`Whence::Size`].
    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64>;
    /// A fresh cursor over the same underlying resource.
    fn duplicate(&self) -> Box<dyn ByteSource>;
}

/// Reads through a host file handle with a cursor of its own.
///
/// The handle is shared with the engine and with any other bridge over the
/// same file, so every read seeks it to this source's position first.
pub struct FileSource {
    file: SharedFile,
    pos: u64,
}

impl FileSource {
    /// Opens `file` for reading unless it already is.
    pub fn open(file: SharedFile) -> Result<Self> {
        {
            let mut handle = file.lock();
            if handle.mode() != FileMode::Read {
                if handle.is_open() {
                    handle.close();
                }
                handle.open(FileMode::Read).map_err(|e| {
                    LvepError::Open(format!(
                        "Could not open input file {}: {}",
                        handle.filename(),
                        e
                    ))
                })?;
            }
        }
        Ok(Self { file, pos: 0 })
    }

    pub fn file(&self) -> &SharedFile {
        &self.file
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(self.pos)?;
        let count = file.read(buf)?;
        self.pos += count as u64;
        Ok(count)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let target = match whence {
            Whence::Start => offset,
            Whence::Current => offset + self.pos as i64,
            Whence::End => offset + self.file.lock().size()? as i64,
            Whence::Size => return self.file.lock().size(),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to negative position {}", target),
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn duplicate(&self) -> Box<dyn ByteSource> {
        Box::new(Self {
            file: Arc::clone(&self.file),
            pos: 0,
        })
    }
}

/// Pure offset arithmetic over a shared buffer. Seeks clamp to `0..=len`.
pub struct MemorySource {
    data: Bytes,
    pos: u64,
}

impl MemorySource {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }
        let start = self.pos as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let len = self.data.len() as i64;
        let target = match whence {
            Whence::Start => offset,
            Whence::Current => self.pos as i64 + offset,
            Whence::End => len + offset,
            Whence::Size => return Ok(len as u64),
        };
        self.pos = target.clamp(0, len) as u64;
        Ok(self.pos)
    }

    fn duplicate(&self) -> Box<dyn ByteSource> {
        Box::new(Self::new(self.data.clone()))
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// A seekable byte stream plus the filename used as a format hint.
pub struct IoBridge {
    source: Box<dyn ByteSource>,
    filename: String,
}

impl IoBridge {
    pub fn new(source: Box<dyn ByteSource>, filename: impl Into<String>) -> Self {
        Self {
            source,
            filename: filename.into(),
        }
    }

    /// Opens the host file for reading; fails with [`LvepError::Open`].
    pub fn from_file(file: SharedFile) -> Result<Self> {
        let filename = file.lock().filename().to_string();
        let source = FileSource::open(file)?;
        Ok(Self::new(Box::new(source), filename))
    }

    pub fn from_data(data: &FileData) -> Self {
        Self::new(
            Box::new(MemorySource::new(data.bytes().clone())),
            data.name().to_string(),
        )
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Lowercased extension of the filename hint, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn seek_whence(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        self.source.seek(offset, whence)
    }

    pub fn size(&mut self) -> io::Result<u64> {
        self.source.seek(0, Whence::Size)
    }

    /// A second bridge over the same resource, positioned at the start.
    pub fn duplicate(&self) -> io::Result<Self> {
        let mut source = self.source.duplicate();
        source.seek(0, Whence::Start)?;
        Ok(Self {
            source,
            filename: self.filename.clone(),
        })
    }
}

impl Read for IoBridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

impl Seek for IoBridge {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(offset) => self.source.seek(offset as i64, Whence::Start),
            SeekFrom::Current(offset) => self.source.seek(offset, Whence::Current),
            SeekFrom::End(offset) => self.source.seek(offset, Whence::End),
        }
    }
}

impl symphonia::core::io::MediaSource for IoBridge {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        // Size queries need &mut on the source; a duplicate shares the resource.
        self.source.duplicate().seek(0, Whence::Size).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryFile;

    #[test]
    fn test_memory_source_clamps() {
        let mut source = MemorySource::new(Bytes::from_static(b"0123456789"));
        assert_eq!(source.seek(4, Whence::Start).unwrap(), 4);
        assert_eq!(source.seek(-100, Whence::Current).unwrap(), 0);
        assert_eq!(source.seek(100, Whence::Start).unwrap(), 10);
        assert_eq!(source.seek(-3, Whence::End).unwrap(), 7);
        assert_eq!(source.seek(5, Whence::End).unwrap(), 10);
        assert_eq!(source.seek(0, Whence::Size).unwrap(), 10);
        assert_eq!(source.position(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        source.seek(8, Whence::Start).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn test_file_source_translates_whence() {
        let file = MemoryFile::shared("clip.bin", b"abcdefghij".to_vec());
        let mut source = FileSource::open(file.clone()).unwrap();

        assert_eq!(source.seek(2, Whence::Start).unwrap(), 2);
        assert_eq!(source.seek(3, Whence::Current).unwrap(), 5);
        assert_eq!(source.seek(-1, Whence::End).unwrap(), 9);
        assert_eq!(source.seek(0, Whence::Size).unwrap(), 10);
        assert!(source.seek(-20, Whence::Current).is_err());

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'j');
    }

    #[test]
    fn test_file_source_reopens_for_reading() {
        let file = MemoryFile::shared("clip.bin", vec![1, 2, 3]);
        file.lock().open(FileMode::Write).unwrap();

        let _source = FileSource::open(file.clone()).unwrap();
        let handle = file.lock();
        assert_eq!(handle.mode(), FileMode::Read);
        assert_eq!(handle.open_count(), 2);
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_file_source_keeps_open_reader() {
        let file = MemoryFile::shared("clip.bin", vec![1, 2, 3]);
        let _first = FileSource::open(file.clone()).unwrap();
        let _second = FileSource::open(file.clone()).unwrap();

        let handle = file.lock();
        assert_eq!(handle.open_count(), 1);
        assert_eq!(handle.close_count(), 0);
    }

    #[test]
    fn test_file_sources_have_independent_cursors() {
        let file = MemoryFile::shared("clip.bin", b"abcdefghij".to_vec());
        let mut first = FileSource::open(file.clone()).unwrap();
        let mut second = FileSource::open(file.clone()).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(first.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        second.seek(5, Whence::Start).unwrap();
        assert_eq!(second.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"fgh");

        // The engine moving the shared handle does not disturb either cursor
        file.lock().seek(0).unwrap();
        assert_eq!(first.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(first.position(), 6);
        assert_eq!(second.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ij");
    }

    #[test]
    fn test_open_failure() {
        let file = MemoryFile::shared("locked.bin", vec![0; 16]);
        file.lock().fail_open(true);

        let shared: SharedFile = file.clone();
        let result = IoBridge::from_file(shared);
        assert!(matches!(result, Err(LvepError::Open(msg)) if msg.contains("locked.bin")));
        assert_eq!(Arc::strong_count(&file), 1);
    }

    #[test]
    fn test_bridge_retains_and_releases_file() {
        let file = MemoryFile::shared("clip.bin", vec![0; 16]);
        let shared: SharedFile = file.clone();
        let bridge = IoBridge::from_file(shared).unwrap();
        let copy = bridge.duplicate().unwrap();
        assert_eq!(Arc::strong_count(&file), 3);

        drop(bridge);
        drop(copy);
        assert_eq!(Arc::strong_count(&file), 1);
    }

    #[test]
    fn test_bridge_std_traits() {
        let data = FileData::new("Music/Theme.OGG", Bytes::from_static(b"hello world"));
        let mut bridge = IoBridge::from_data(&data);
        assert_eq!(bridge.extension().as_deref(), Some("ogg"));

        bridge.seek(SeekFrom::End(-5)).unwrap();
        let mut text = String::new();
        bridge.read_to_string(&mut text).unwrap();
        assert_eq!(text, "world");

        assert_eq!(bridge.size().unwrap(), 11);
        use symphonia::core::io::MediaSource;
        assert_eq!(bridge.byte_len(), Some(11));
        assert!(bridge.is_seekable());
    }

    #[test]
    fn test_disk_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut writer = DiskFile::new(&path);
        writer.open(FileMode::Write).unwrap();
        writer.write(b"lvep").unwrap();
        assert!(writer.close());

        let shared = DiskFile::shared(&path);
        let mut bridge = IoBridge::from_file(shared).unwrap();
        let mut contents = Vec::new();
        bridge.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"lvep");
        assert_eq!(bridge.size().unwrap(), 4);
    }
}
