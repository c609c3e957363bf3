//! Backing store of a storage node
//!
//! A single file or device node accessed with positional I/O. Reads and
//! writes go through separate read-only and write-only handles, so there
//! is no shared seek position.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use nad_common::{Error, Result};
use tracing::info;

#[derive(Debug)]
pub struct BackingStore {
    path: PathBuf,
    reader: File,
    writer: File,
    media_size: u64,
}

impl BackingStore {
    /// Open `path`, creating or extending it to `media_size` when given.
    ///
    /// A missing or empty file without a media size is rejected since its
    /// capacity would be zero.
    pub fn open(path: impl AsRef<Path>, media_size: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let Some(size) = media_size else {
                return Err(Error::configuration(format!(
                    "{} does not exist and no media size was given",
                    path.display()
                )));
            };
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            file.set_len(size)?;
            info!("Created backing file {} ({} bytes)", path.display(), size);
        }

        let writer = OpenOptions::new().write(true).open(&path)?;
        let mut reader = OpenOptions::new().read(true).open(&path)?;

        let metadata = reader.metadata()?;
        let mut current = if metadata.is_file() {
            metadata.len()
        } else {
            // Device nodes report zero length, ask the device instead
            let size = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(0))?;
            size
        };

        if current == 0 {
            match media_size {
                Some(size) if metadata.is_file() => {
                    writer.set_len(size)?;
                    info!("Extended {} to {} bytes", path.display(), size);
                    current = size;
                }
                _ => {
                    return Err(Error::configuration(format!(
                        "{} is empty, media size required",
                        path.display()
                    )));
                }
            }
        }

        Ok(Self {
            path,
            reader,
            writer,
            media_size: current,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capacity in bytes
    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    /// Capacity as reported to gateways; fails once the path is gone
    pub fn report_capacity(&self) -> Result<u64> {
        std::fs::metadata(&self.path)?;
        Ok(self.media_size)
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.media_size => Ok(()),
            _ => Err(Error::OutOfRange {
                offset,
                length,
                media_size: self.media_size,
            }),
        }
    }

    /// Read exactly `length` bytes at `offset`
    pub fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.check_range(offset, length)?;
        let len = usize::try_from(length).map_err(|_| Error::OutOfRange {
            offset,
            length,
            media_size: self.media_size,
        })?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        if filled < len {
            return Err(Error::ShortRead {
                offset,
                requested: length,
                actual: filled as u64,
            });
        }
        Ok(buf)
    }

    /// Write all of `data` at `offset`, returning the byte count
    pub fn write_range(&self, offset: u64, data: &[u8]) -> Result<u64> {
        self.check_range(offset, data.len() as u64)?;
        self.writer.write_all_at(data, offset)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_missing_file_with_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");

        let store = BackingStore::open(&path, Some(1 << 20)).unwrap();
        assert_eq!(store.media_size(), 1 << 20);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1 << 20);
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_missing_file_without_size_fails() {
        let dir = TempDir::new().unwrap();
        let err = BackingStore::open(dir.path().join("missing.img"), None).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_file_is_extended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.img");
        File::create(&path).unwrap();

        let err = BackingStore::open(&path, None).unwrap_err();
        assert!(err.to_string().contains("media size required"));

        let store = BackingStore::open(&path, Some(65536)).unwrap();
        assert_eq!(store.media_size(), 65536);
        // Never-written ranges read back as zeros
        assert_eq!(store.read_range(0, 4096).unwrap(), vec![0; 4096]);
    }

    #[test]
    fn test_existing_file_keeps_its_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::write(&path, vec![7u8; 8192]).unwrap();

        let store = BackingStore::open(&path, Some(1 << 20)).unwrap();
        assert_eq!(store.media_size(), 8192);
        assert_eq!(store.read_range(4096, 4096).unwrap(), vec![7; 4096]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = BackingStore::open(dir.path().join("disk.img"), Some(1 << 16)).unwrap();

        assert_eq!(store.write_range(4096, b"replicated").unwrap(), 10);
        assert_eq!(store.read_range(4096, 10).unwrap(), b"replicated");
        assert_eq!(store.read_range(4106, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_report_capacity_needs_backing_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        let store = BackingStore::open(&path, Some(8192)).unwrap();
        assert_eq!(store.report_capacity().unwrap(), 8192);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(store.report_capacity(), Err(Error::Io(_))));
    }

    #[test]
    fn test_range_guard() {
        let dir = TempDir::new().unwrap();
        let store = BackingStore::open(dir.path().join("disk.img"), Some(8192)).unwrap();

        assert!(matches!(
            store.read_range(4096, 8192),
            Err(Error::OutOfRange { media_size: 8192, .. })
        ));
        assert!(matches!(
            store.write_range(8190, &[1, 2, 3]),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            store.read_range(u64::MAX, 1),
            Err(Error::OutOfRange { .. })
        ));
        // Exactly at the end is fine
        assert!(store.read_range(8192, 0).unwrap().is_empty());
    }

    #[test]
    fn test_short_read_reports_lengths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        let store = BackingStore::open(&path, Some(8192)).unwrap();

        // Shrunk underneath the node
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(6000)
            .unwrap();

        match store.read_range(4096, 4096) {
            Err(Error::ShortRead {
                offset,
                requested,
                actual,
            }) => {
                assert_eq!(offset, 4096);
                assert_eq!(requested, 4096);
                assert_eq!(actual, 6000 - 4096);
            }
            other => panic!("expected short read, got {other:?}"),
        }
    }
}
