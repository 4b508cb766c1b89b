//! File handles
//!
//! A [`File`] is a lightweight cursor over one directory entry: the stat
//! snapshot taken at open time, the first cluster, and a byte offset (an
//! entry offset when the handle is a directory). It reaches the volume only
//! through the narrow [`VolumeAccess`] capability set, so everything here
//! tests against a mocked volume.

use std::io;

use crate::dir::{Attributes, DirEntry, Metadata};
use crate::error::Error;
use crate::fat::FatEntry;
use crate::volume::VolumeAccess;

/// An open file or directory on a mounted volume.
///
/// Handles borrow the volume; the volume outlives every handle it produced.
/// [`File::close`] drops the borrow and zeroes the handle, after which reads
/// report end-of-data and listings not-a-directory.
pub struct File<'v> {
    volume: Option<&'v dyn VolumeAccess>,
    path: String,
    is_directory: bool,
    is_read_only: bool,
    is_hidden: bool,
    is_system: bool,
    first_cluster: FatEntry,
    stat: Metadata,
    /// Byte offset for files, entry offset for directories.
    offset: i64,
}

impl<'v> File<'v> {
    pub(crate) fn new(volume: &'v dyn VolumeAccess, path: String, entry: &DirEntry) -> File<'v> {
        let attributes = entry.attributes();
        File {
            volume: Some(volume),
            path,
            is_directory: entry.is_dir(),
            is_read_only: attributes.contains(Attributes::READ_ONLY),
            is_hidden: attributes.contains(Attributes::HIDDEN),
            is_system: attributes.contains(Attributes::SYSTEM),
            first_cluster: FatEntry(entry.first_cluster()),
            stat: entry.metadata(),
            offset: 0,
        }
    }

    /// The name recorded in the stat snapshot.
    pub fn name(&self) -> &str {
        self.stat.name()
    }

    /// The path this handle was opened with, relative to the volume root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the handle is a directory.
    pub fn is_dir(&self) -> bool {
        self.is_directory
    }

    /// Whether the entry carries the read-only attribute.
    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    /// Whether the entry carries the hidden attribute.
    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    /// Whether the entry carries the system attribute.
    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// First cluster of the entry's data.
    pub fn first_cluster(&self) -> u32 {
        self.first_cluster.value()
    }

    /// The stat snapshot taken when the handle was opened.
    pub fn stat(&self) -> Metadata {
        self.stat.clone()
    }

    /// Close the handle: drop the volume borrow and zero every field.
    pub fn close(&mut self) -> Result<(), Error> {
        self.volume = None;
        self.path = String::new();
        self.is_directory = false;
        self.is_read_only = false;
        self.is_hidden = false;
        self.is_system = false;
        self.first_cluster = FatEntry(0);
        self.stat = Metadata::default();
        self.offset = 0;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the current offset.
    ///
    /// Refuses with [`Error::EndOfData`] once the offset has reached the
    /// file size. The offset advances by the bytes copied even when the
    /// read fails; a failing read reports the copied count inside
    /// [`Error::ReadFile`], with the bytes already in `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.stat.len() as i64;
        if self.offset >= size {
            return Err(Error::EndOfData);
        }
        let Some(volume) = self.volume else {
            return Err(Error::EndOfData);
        };

        let (data, err) = volume.read_file_at(self.first_cluster, size, self.offset, buf.len() as i64);
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.offset += n as i64;

        match err {
            None | Some(Error::EndOfData) => Ok(n),
            Some(err) => Err(err),
        }
    }

    /// Read up to `buf.len()` bytes at `offset`, without moving the handle
    /// offset. A count shorter than the buffer means the declared end of the
    /// file intervened; an offset at or past the size is [`Error::EndOfData`].
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let size = self.stat.len() as i64;
        let offset = i64::try_from(offset).map_err(|_| Error::InvalidArgument)?;
        if offset >= size {
            return Err(Error::EndOfData);
        }
        let Some(volume) = self.volume else {
            return Err(Error::EndOfData);
        };

        let (data, err) = volume.read_file_at(self.first_cluster, size, offset, buf.len() as i64);
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);

        match err {
            None | Some(Error::EndOfData) => Ok(n),
            Some(err) => Err(err),
        }
    }

    /// Move the offset. Targets outside `[0, file_size]` are
    /// [`Error::OutOfRange`]; overflowing arithmetic is
    /// [`Error::InvalidArgument`].
    pub fn seek(&mut self, pos: io::SeekFrom) -> Result<u64, Error> {
        let size = self.stat.len() as i64;
        let target = match pos {
            io::SeekFrom::Start(offset) => {
                i64::try_from(offset).map_err(|_| Error::InvalidArgument)?
            }
            io::SeekFrom::Current(delta) => self
                .offset
                .checked_add(delta)
                .ok_or(Error::InvalidArgument)?,
            io::SeekFrom::End(delta) => size.checked_add(delta).ok_or(Error::InvalidArgument)?,
        };

        if target < 0 || target > size {
            return Err(Error::OutOfRange);
        }
        self.offset = target;
        Ok(target as u64)
    }

    /// List the next `count` entries of this directory, starting at the
    /// handle's entry offset.
    ///
    /// `count <= 0` returns all remaining entries. A positive `count` with
    /// nothing remaining reports [`Error::EndOfData`]; fewer remaining than
    /// requested returns just the remainder. The offset clamps to the end of
    /// the listing.
    pub fn read_dir(&mut self, count: isize) -> Result<Vec<Metadata>, Error> {
        if !self.is_directory {
            return Err(Error::NotADirectory);
        }
        let Some(volume) = self.volume else {
            return Err(Error::NotADirectory);
        };

        let entries = if self.path.is_empty() {
            volume.read_root()?
        } else {
            volume.read_dir_entries(self.first_cluster)?
        };

        let start = (self.offset.max(0) as usize).min(entries.len());
        let remaining = &entries[start..];

        if count <= 0 {
            self.offset = entries.len() as i64;
            return Ok(remaining.iter().map(DirEntry::metadata).collect());
        }

        if remaining.is_empty() {
            return Err(Error::EndOfData);
        }

        let take = (count as usize).min(remaining.len());
        self.offset = (start + take) as i64;
        Ok(remaining[..take].iter().map(DirEntry::metadata).collect())
    }

    /// Like [`File::read_dir`], mapped through the entry names.
    pub fn read_dir_names(&mut self, count: isize) -> Result<Vec<String>, Error> {
        let entries = self.read_dir(count)?;
        Ok(entries.into_iter().map(|meta| meta.name).collect())
    }

    /// Unsupported: the volume is read-only.
    pub fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn write_at(&mut self, _buf: &[u8], _offset: u64) -> Result<usize, Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn write_string(&mut self, _text: &str) -> Result<usize, Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn sync(&mut self) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn truncate(&mut self, _size: u64) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}

impl std::fmt::Debug for File<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("is_directory", &self.is_directory)
            .field("first_cluster", &self.first_cluster)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl io::Read for File<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match File::read(self, buf) {
            Ok(n) => Ok(n),
            Err(Error::EndOfData) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl io::Seek for File<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        File::seek(self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::RawDirEntry;
    use crate::error::ErrorKind;
    use std::cell::RefCell;
    use std::io::SeekFrom;
    use zerocopy::FromZeros;

    /// A scripted volume: returns fixed data/entries and records the last
    /// range-read request.
    #[derive(Default)]
    struct MockVolume {
        data: Vec<u8>,
        read_err: RefCell<Option<Error>>,
        root: Vec<DirEntry>,
        dir: Vec<DirEntry>,
        last_read: RefCell<Option<(u32, i64, i64, i64)>>,
    }

    impl VolumeAccess for MockVolume {
        fn read_file_at(
            &self,
            cluster: FatEntry,
            file_size: i64,
            offset: i64,
            read_size: i64,
        ) -> (Vec<u8>, Option<Error>) {
            *self.last_read.borrow_mut() =
                Some((cluster.value(), file_size, offset, read_size));
            (self.data.clone(), self.read_err.borrow_mut().take())
        }

        fn read_dir_entries(&self, _cluster: FatEntry) -> Result<Vec<DirEntry>, Error> {
            Ok(self.dir.clone())
        }

        fn read_root(&self) -> Result<Vec<DirEntry>, Error> {
            Ok(self.root.clone())
        }
    }

    fn entry(name: &str, attributes: u8, first_cluster: u16, size: u32) -> DirEntry {
        let mut header = RawDirEntry::new_zeroed();
        let mut short = [b' '; 11];
        short[..name.len()].copy_from_slice(name.as_bytes());
        header.name = short;
        header.attributes = attributes;
        header.first_cluster_low = first_cluster.into();
        header.file_size = size.into();
        DirEntry {
            header,
            long_name: None,
        }
    }

    fn file<'v>(volume: &'v MockVolume, path: &str, entry: &DirEntry) -> File<'v> {
        File::new(volume, path.to_string(), entry)
    }

    #[test]
    fn read_copies_data_and_advances() {
        let volume = MockVolume {
            data: b"Hello World".to_vec(),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let mut handle = file(&volume, "GREET", &source);

        let mut buf = [0u8; 11];
        assert_eq!(handle.read(&mut buf).unwrap(), 11);
        assert_eq!(&buf, b"Hello World");
        assert_eq!(handle.seek(SeekFrom::Current(0)).unwrap(), 11);
        assert_eq!(
            *volume.last_read.borrow(),
            Some((9, 11, 0, 11)),
            "cluster, size, offset and length must reach the volume"
        );
    }

    #[test]
    fn read_starts_at_the_handle_offset() {
        let volume = MockVolume {
            data: b" World".to_vec(),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let mut handle = file(&volume, "GREET", &source);
        handle.seek(SeekFrom::Start(5)).unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(handle.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b" World");
        assert_eq!(*volume.last_read.borrow(), Some((9, 11, 5, 6)));
    }

    #[test]
    fn failing_read_still_advances_past_the_prefix() {
        let volume = MockVolume {
            data: b"H".to_vec(),
            read_err: RefCell::new(Some(Error::ReadFile {
                read: 1,
                source: Box::new(Error::UnexpectedEnd),
            })),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let mut handle = file(&volume, "GREET", &source);

        let mut buf = [0u8; 11];
        let err = handle.read(&mut buf).unwrap_err();
        assert!(err.is_kind(ErrorKind::ReadFile));
        assert!(err.is_kind(ErrorKind::UnexpectedEnd));
        assert_eq!(buf[0], b'H');
        // The one copied byte moved the offset.
        assert_eq!(handle.seek(SeekFrom::Current(0)).unwrap(), 1);
    }

    #[test]
    fn reading_a_short_file_ends_cleanly() {
        let volume = MockVolume {
            data: b"Hello World".to_vec(),
            read_err: RefCell::new(Some(Error::EndOfData)),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let mut handle = file(&volume, "GREET", &source);

        // A buffer larger than the file: the count tells the story.
        let mut buf = [0u8; 20];
        assert_eq!(handle.read(&mut buf).unwrap(), 11);
        // The next read starts at the end and reports the canonical marker.
        assert!(matches!(handle.read(&mut buf), Err(Error::EndOfData)));
    }

    #[test]
    fn read_at_leaves_the_offset_alone() {
        let volume = MockVolume {
            data: b"ello World".to_vec(),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let handle = file(&volume, "GREET", &source);

        let mut buf = [0u8; 10];
        assert_eq!(handle.read_at(&mut buf, 1).unwrap(), 10);
        assert_eq!(&buf, b"ello World");
        assert_eq!(*volume.last_read.borrow(), Some((9, 11, 1, 10)));
    }

    #[test]
    fn read_at_short_result_returns_the_count() {
        let volume = MockVolume {
            data: b"ell0".to_vec(),
            read_err: RefCell::new(Some(Error::EndOfData)),
            ..Default::default()
        };
        let source = entry("GREET", 0x20, 9, 11);
        let handle = file(&volume, "GREET", &source);

        let mut buf = [0u8; 10];
        assert_eq!(handle.read_at(&mut buf, 1).unwrap(), 4);
    }

    #[test]
    fn read_at_past_the_end_is_end_of_data() {
        let volume = MockVolume::default();
        let source = entry("GREET", 0x20, 9, 11);
        let handle = file(&volume, "GREET", &source);

        let mut buf = [0u8; 4];
        assert!(matches!(handle.read_at(&mut buf, 11), Err(Error::EndOfData)));
        assert!(matches!(handle.read_at(&mut buf, 99), Err(Error::EndOfData)));
    }

    #[test]
    fn seek_whence_variants() {
        let volume = MockVolume::default();
        let source = entry("BIG", 0x20, 2, 5000);
        let mut handle = file(&volume, "BIG", &source);

        handle.offset = 1234;
        assert_eq!(handle.seek(SeekFrom::Start(100)).unwrap(), 100);

        handle.offset = 1000;
        assert_eq!(handle.seek(SeekFrom::Current(200)).unwrap(), 1200);

        handle.offset = 1000;
        assert_eq!(handle.seek(SeekFrom::End(-200)).unwrap(), 4800);
    }

    #[test]
    fn seek_rejects_targets_outside_the_file() {
        let volume = MockVolume::default();
        let source = entry("BIG", 0x20, 2, 5000);
        let mut handle = file(&volume, "BIG", &source);

        assert!(matches!(
            handle.seek(SeekFrom::Start(5001)),
            Err(Error::OutOfRange)
        ));
        assert!(matches!(
            handle.seek(SeekFrom::Current(-1)),
            Err(Error::OutOfRange)
        ));
        assert!(matches!(
            handle.seek(SeekFrom::End(1)),
            Err(Error::OutOfRange)
        ));
        // Seeking to the exact size is allowed.
        assert_eq!(handle.seek(SeekFrom::End(0)).unwrap(), 5000);

        // Arithmetic overflow is an invalid argument, not out-of-range.
        handle.offset = 1;
        assert!(matches!(
            handle.seek(SeekFrom::Current(i64::MAX)),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn seek_round_trips_through_current() {
        let volume = MockVolume::default();
        let source = entry("BIG", 0x20, 2, 5000);
        let mut handle = file(&volume, "BIG", &source);

        handle.seek(SeekFrom::Start(1717)).unwrap();
        assert_eq!(handle.seek(SeekFrom::Current(0)).unwrap(), 1717);
    }

    fn listing() -> Vec<DirEntry> {
        vec![
            entry("ONE", 0x20, 10, 1),
            entry("TWO", 0x20, 11, 2),
            entry("THREE", 0x10, 12, 0),
        ]
    }

    #[test]
    fn read_dir_on_the_root_uses_the_root_listing() {
        let volume = MockVolume {
            root: listing(),
            ..Default::default()
        };
        let root = crate::dir::synthetic_root();
        let mut handle = file(&volume, "", &root);

        let names: Vec<String> = handle
            .read_dir(-1)
            .unwrap()
            .iter()
            .map(|meta| meta.name().to_string())
            .collect();
        assert_eq!(names, ["ONE", "TWO", "THREE"]);
    }

    #[test]
    fn read_dir_pages_through_with_the_offset() {
        let volume = MockVolume {
            dir: listing(),
            ..Default::default()
        };
        let source = entry("SUB", 0x10, 30, 0);
        let mut handle = file(&volume, "SUB", &source);

        let first: Vec<String> = handle.read_dir_names(2).unwrap();
        assert_eq!(first, ["ONE", "TWO"]);

        // Only one entry remains; the request for two returns it.
        let second: Vec<String> = handle.read_dir_names(2).unwrap();
        assert_eq!(second, ["THREE"]);

        // Nothing remains.
        assert!(matches!(handle.read_dir(2), Err(Error::EndOfData)));
        // A read-all on the exhausted handle is an empty success.
        assert_eq!(handle.read_dir(-1).unwrap().len(), 0);
    }

    #[test]
    fn read_dir_on_a_file_is_not_a_directory() {
        let volume = MockVolume::default();
        let source = entry("PLAIN", 0x20, 5, 77);
        let mut handle = file(&volume, "PLAIN", &source);

        assert!(matches!(handle.read_dir(-1), Err(Error::NotADirectory)));
        assert!(matches!(
            handle.read_dir_names(1),
            Err(Error::NotADirectory)
        ));
    }

    #[test]
    fn close_zeroes_the_handle() {
        let volume = MockVolume {
            data: b"data".to_vec(),
            root: listing(),
            ..Default::default()
        };
        let source = entry("SUB", 0x13, 30, 4);
        let mut handle = file(&volume, "SUB", &source);
        handle.offset = 2;

        handle.close().unwrap();

        assert_eq!(handle.name(), "");
        assert_eq!(handle.path(), "");
        assert!(!handle.is_dir());
        assert!(!handle.is_read_only());
        assert!(!handle.is_hidden());
        assert!(!handle.is_system());
        assert_eq!(handle.first_cluster(), 0);
        assert_eq!(handle.stat(), Metadata::default());

        let mut buf = [0u8; 4];
        assert!(matches!(handle.read(&mut buf), Err(Error::EndOfData)));
        assert!(matches!(handle.read_dir(-1), Err(Error::NotADirectory)));
    }

    #[test]
    fn attribute_flags_from_the_entry() {
        let volume = MockVolume::default();
        let source = entry("FLAGS", 0x01 | 0x02 | 0x04 | 0x20, 3, 9);
        let handle = file(&volume, "FLAGS", &source);

        assert!(handle.is_read_only());
        assert!(handle.is_hidden());
        assert!(handle.is_system());
        assert!(!handle.is_dir());
        assert_eq!(handle.first_cluster(), 3);
    }

    #[test]
    fn write_shaped_operations_are_unsupported() {
        let volume = MockVolume::default();
        let source = entry("PLAIN", 0x20, 5, 77);
        let mut handle = file(&volume, "PLAIN", &source);

        assert!(matches!(handle.write(b"x"), Err(Error::NotSupported)));
        assert!(matches!(handle.write_at(b"x", 0), Err(Error::NotSupported)));
        assert!(matches!(handle.write_string("x"), Err(Error::NotSupported)));
        assert!(matches!(handle.sync(), Err(Error::NotSupported)));
        assert!(matches!(handle.truncate(0), Err(Error::NotSupported)));
    }

    #[test]
    fn io_read_adapter_maps_end_of_data_to_zero() {
        use std::io::Read as _;

        let volume = MockVolume {
            data: b"payload".to_vec(),
            read_err: RefCell::new(Some(Error::EndOfData)),
            ..Default::default()
        };
        let source = entry("NOTE", 0x20, 4, 7);
        let mut handle = file(&volume, "NOTE", &source);

        let mut all = Vec::new();
        handle.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"payload");
    }
}
