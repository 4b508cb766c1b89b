//! Volume mount and core read services
//!
//! [`Volume`] owns the sector source and the decoded geometry. Mounting
//! decodes the BPB out of sector 0, validates it (unless checks are
//! skipped), classifies the FAT type from the cluster count and derives the
//! layout. After that the volume answers three kinds of questions: the next
//! cluster of a chain, the bytes of a file range, and the entries of a
//! directory. Path resolution walks those primitives from the root.

use std::io::{Read, Seek};
use std::sync::{Mutex, PoisonError};

use time::PrimitiveDateTime;
use zerocopy::{FromBytes, FromZeros};

use crate::bpb::{classify_cluster_count, Bpb, Fat16Ext, Fat32Ext, FatType};
use crate::dir::{decode_directory, synthetic_root, DirEntry, Metadata};
use crate::error::Error;
use crate::fat::{widen_fat16, FatEntry, ENTRY_MASK};
use crate::file::File;
use crate::sector::SectorSource;

bitflags::bitflags! {
    /// Flags accepted by [`Volume::open_file`]. Reading is implicit; the
    /// write-shaped flags are accepted and ignored on this read-only volume.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const WRITE = 1;
        const CREATE = 1 << 1;
        const TRUNCATE = 1 << 2;
        const APPEND = 1 << 3;
    }
}

/// Decoded volume geometry. Immutable once the mount completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub fs_type: FatType,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub fat_count: u8,
    /// Sectors per FAT copy.
    pub fat_size: u32,
    pub total_sector_count: u32,
    /// First sector of the data region.
    pub first_data_sector: u32,
    /// Number of root directory entries; zero on FAT32.
    pub root_entry_count: u16,
    /// First cluster of the root directory; zero on FAT16.
    pub root_cluster: u32,
    /// Volume serial number from the extension area.
    pub volume_id: u32,
    /// Raw 11-byte volume label, space-padded.
    pub(crate) label: [u8; 11],
}

/// A mounted read-only FAT16/FAT32 volume.
#[derive(Debug)]
pub struct Volume<S> {
    sectors: Mutex<SectorSource<S>>,
    geometry: Geometry,
}

/// The capability set the file layer needs from a volume. Kept narrow so
/// file-level tests can substitute a mock without touching real I/O.
pub(crate) trait VolumeAccess {
    /// Read a byte range of the chain starting at `cluster`. See
    /// [`Volume::read_file_at`] for the sentinel conventions.
    fn read_file_at(
        &self,
        cluster: FatEntry,
        file_size: i64,
        offset: i64,
        read_size: i64,
    ) -> (Vec<u8>, Option<Error>);

    /// Decode the directory whose chain starts at `cluster`.
    fn read_dir_entries(&self, cluster: FatEntry) -> Result<Vec<DirEntry>, Error>;

    /// Decode the root directory.
    fn read_root(&self) -> Result<Vec<DirEntry>, Error>;
}

impl<S: Read + Seek> Volume<S> {
    /// Mount a FAT filesystem from the given byte source.
    pub fn new(source: S) -> Result<Self, Error> {
        Self::mount(source, false).map_err(|err| Error::OpenFilesystem(Box::new(err)))
    }

    /// Mount like [`Volume::new`] but skip the structural validations, which
    /// allows opening not perfectly standard volumes. Use with caution.
    pub fn new_skip_checks(source: S) -> Result<Self, Error> {
        Self::mount(source, true).map_err(|err| Error::OpenFilesystem(Box::new(err)))
    }

    fn mount(source: S, skip_checks: bool) -> Result<Self, Error> {
        // Sector 0 always fits in the first 512 bytes; the real sector size
        // is only known once the BPB is decoded.
        let mut sectors = SectorSource::new(source, 512);
        let sector0 = sectors.fetch(0)?;

        let bpb = Bpb::read_from_prefix(&sector0)
            .map_err(|_| Error::InitializeFilesystem {
                reason: "boot sector too short for the BPB",
            })?
            .0;

        if !skip_checks {
            bpb.strict_checks(&sector0)?;
        }

        let bytes_per_sector = bpb.bytes_per_sector.get();
        let sectors_per_cluster = bpb.sectors_per_cluster;
        // Even a skip-checks mount needs divisors to make sense of the rest.
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return Err(Error::InitializeFilesystem {
                reason: "unusable sector or cluster size",
            });
        }

        let root_dir_sectors = (u32::from(bpb.root_entry_count.get()) * 32)
            .div_ceil(u32::from(bytes_per_sector));

        // FAT32 keeps its FAT size (and the root cluster) in the extension
        // area; its presence is signaled by a zero 16-bit FAT size.
        let fat32_ext = if bpb.fat_size_16.get() == 0 {
            Some(
                Fat32Ext::read_from_bytes(&bpb.fat_specific).map_err(|_| {
                    Error::InitializeFilesystem {
                        reason: "decoding the FAT32 extension area failed",
                    }
                })?,
            )
        } else {
            None
        };
        let fat_size = match &fat32_ext {
            Some(ext) => ext.fat_size.get(),
            None => u32::from(bpb.fat_size_16.get()),
        };

        let total_sector_count = if bpb.total_sectors_16.get() != 0 {
            u32::from(bpb.total_sectors_16.get())
        } else {
            bpb.total_sectors_32.get()
        };

        // The classification formula is fixed by the format specification;
        // wrapping keeps hostile skip-checks images from aborting.
        let data_sectors = total_sector_count
            .wrapping_sub(u32::from(bpb.reserved_sector_count.get()) + u32::from(bpb.fat_count))
            .wrapping_add(root_dir_sectors);
        let count_of_clusters = data_sectors / u32::from(sectors_per_cluster);

        let fs_type = classify_cluster_count(count_of_clusters);
        if fs_type == FatType::Fat12 {
            log::debug!("FAT12 volume ({count_of_clusters} clusters) is not supported");
            return Err(Error::NotSupported);
        }

        if !skip_checks {
            // The root entry count is zero on FAT32 and fills whole sectors
            // on FAT16.
            let root_bytes = u32::from(bpb.root_entry_count.get()) * 32;
            let invalid = match fs_type {
                FatType::Fat32 => bpb.root_entry_count.get() != 0,
                _ => root_bytes % u32::from(bytes_per_sector) != 0,
            };
            if invalid {
                return Err(Error::InitializeFilesystem {
                    reason: "invalid root entry count",
                });
            }
        }

        let first_data_sector = u32::from(bpb.reserved_sector_count.get())
            .wrapping_add(u32::from(bpb.fat_count).wrapping_mul(fat_size))
            .wrapping_add(root_dir_sectors);

        let (label, volume_id, root_cluster) = match fs_type {
            FatType::Fat32 => {
                let ext = fat32_ext.unwrap_or_else(Fat32Ext::new_zeroed);
                (ext.volume_label, ext.volume_id.get(), ext.root_cluster.get())
            }
            _ => {
                let ext = Fat16Ext::read_from_prefix(&bpb.fat_specific)
                    .map_err(|_| Error::InitializeFilesystem {
                        reason: "decoding the FAT16 extension area failed",
                    })?
                    .0;
                (ext.volume_label, ext.volume_id.get(), 0)
            }
        };

        sectors.set_bytes_per_sector(bytes_per_sector);

        let geometry = Geometry {
            fs_type,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count: bpb.reserved_sector_count.get(),
            fat_count: bpb.fat_count,
            fat_size,
            total_sector_count,
            first_data_sector,
            root_entry_count: bpb.root_entry_count.get(),
            root_cluster,
            volume_id,
            label,
        };

        log::info!(
            "mounted {fs_type} volume: {count_of_clusters} clusters, {bytes_per_sector} bytes per sector, label {:?}",
            String::from_utf8_lossy(&label).trim_end_matches(' ')
        );
        log::debug!(
            "volume layout: reserved={} fat_count={} fat_size={} first_data_sector={}",
            geometry.reserved_sector_count,
            geometry.fat_count,
            geometry.fat_size,
            geometry.first_data_sector
        );

        Ok(Volume {
            sectors: Mutex::new(sectors),
            geometry,
        })
    }

    /// Load one sector through the volume mutex.
    fn fetch(&self, sector: u64) -> Result<Vec<u8>, Error> {
        self.sectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fetch(sector)
    }

    /// Look up the FAT entry of `cluster`, i.e. the next link of its chain.
    pub(crate) fn fat_entry(&self, cluster: FatEntry) -> Result<FatEntry, Error> {
        let geometry = &self.geometry;
        let entry_size: u64 = match geometry.fs_type {
            FatType::Fat16 => 2,
            FatType::Fat32 => 4,
            FatType::Fat12 => return Err(Error::NotSupported),
        };

        let bytes_per_sector = u64::from(geometry.bytes_per_sector);
        let fat_offset = u64::from(cluster.value()) * entry_size;
        let fat_sector = u64::from(geometry.reserved_sector_count) + fat_offset / bytes_per_sector;
        let entry_offset = (fat_offset % bytes_per_sector) as usize;

        let wrap = |source: Error| Error::ReadFat {
            cluster: cluster.value(),
            source: Box::new(source),
        };

        let sector = self.fetch(fat_sector).map_err(wrap)?;
        let bytes = sector
            .get(entry_offset..entry_offset + entry_size as usize)
            .ok_or_else(|| wrap(Error::UnexpectedEnd))?;

        match geometry.fs_type {
            FatType::Fat16 => Ok(widen_fat16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            _ => Ok(FatEntry(
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & ENTRY_MASK,
            )),
        }
    }

    /// Read a byte range of the cluster chain starting at `cluster`.
    ///
    /// `file_size < 0` means the size is unknown: the read runs to the end
    /// of the chain. `read_size <= 0` reads up to `file_size` (or the chain
    /// end). A `read_size` reaching past the declared end is shortened and
    /// reported as the canonical [`Error::EndOfData`]; a chain that ends
    /// before the declared size yields [`Error::UnexpectedEnd`]. Whatever
    /// prefix was accumulated is always returned alongside the error.
    pub(crate) fn read_file_at(
        &self,
        cluster: FatEntry,
        file_size: i64,
        offset: i64,
        read_size: i64,
    ) -> (Vec<u8>, Option<Error>) {
        let geometry = &self.geometry;
        let bytes_per_sector = i64::from(geometry.bytes_per_sector);
        let sectors_per_cluster = i64::from(geometry.sectors_per_cluster);
        let bytes_per_cluster = sectors_per_cluster * bytes_per_sector;

        // Slice the result to the requested window and classify how the
        // read ended. Runs in front of every return.
        let finalize = move |mut data: Vec<u8>, err: Option<Error>| {
            let mut err = err;
            let mut file_size = file_size;
            let mut read_size = read_size;

            if file_size < 0 {
                file_size = data.len() as i64 + offset;
            }

            if err.is_none() && read_size > file_size - offset {
                err = Some(Error::EndOfData);
                read_size = file_size - offset;
            }

            // The chain was shorter than the declared size.
            if err.is_none()
                && (data.len() as i64) < file_size - offset
                && (data.len() as i64) < read_size
            {
                err = Some(Error::UnexpectedEnd);
            }

            if read_size > 0 && data.len() as i64 > read_size {
                data.truncate(read_size as usize);
            } else if data.len() as i64 > file_size {
                data.truncate(file_size.max(0) as usize);
            }

            let read = data.len();
            let err = err.map(|err| match err {
                // The canonical end marker stays bare so callers can match
                // it directly.
                Error::EndOfData => Error::EndOfData,
                other => Error::ReadFile {
                    read,
                    source: Box::new(other),
                },
            });
            (data, err)
        };

        let mut data: Vec<u8> = Vec::new();
        let mut cluster_number: i64 = 0;
        let mut current = cluster;

        // Walk the chain up to the cluster that covers `offset`.
        loop {
            if cluster_number * bytes_per_cluster <= offset
                && (cluster_number + 1) * bytes_per_cluster >= offset
            {
                break;
            }

            match self.fat_entry(current) {
                Err(err) => return finalize(data, Some(err)),
                Ok(next) => {
                    if !next.read_as_next() {
                        // The chain ends before the offset; the empty prefix
                        // is the result.
                        return finalize(data, None);
                    }
                    current = next;
                    cluster_number += 1;
                }
            }
        }

        // Whole sectors to skip inside the covering cluster, then the bytes
        // to drop from the head of the first sector actually read.
        let mut offset_rest = offset - cluster_number * bytes_per_cluster;
        let mut skip = offset_rest / bytes_per_sector;
        offset_rest -= bytes_per_sector * skip;

        loop {
            let first_sector = (i64::from(current.value()) - 2) * sectors_per_cluster
                + i64::from(geometry.first_data_sector);

            for i in skip..sectors_per_cluster {
                let sector = match self.fetch((first_sector + i) as u64) {
                    Ok(sector) => sector,
                    Err(err) => return finalize(data, Some(err)),
                };

                if data.is_empty() {
                    data.extend_from_slice(&sector[offset_rest as usize..]);
                } else {
                    data.extend_from_slice(&sector);
                }
            }
            skip = 0;

            // Enough clusters read to cover the requested window.
            if read_size > 0 && (cluster_number + 1) * bytes_per_cluster >= offset + read_size {
                break;
            }

            match self.fat_entry(current) {
                Err(err) => return finalize(data, Some(err)),
                Ok(next) => {
                    if !next.read_as_next() {
                        if (data.len() as i64) < file_size - offset {
                            return finalize(data, Some(Error::UnexpectedEnd));
                        }
                        break;
                    }
                    current = next;
                    cluster_number += 1;
                }
            }
        }

        finalize(data, None)
    }

    /// Decode a directory stored as a fixed run of sectors (the FAT16 root).
    fn read_dir_at_sector(&self, first_sector: u64) -> Result<Vec<DirEntry>, Error> {
        let geometry = &self.geometry;
        let root_dir_sectors = (u32::from(geometry.root_entry_count) * 32)
            .div_ceil(u32::from(geometry.bytes_per_sector));

        let mut data =
            Vec::with_capacity(root_dir_sectors as usize * usize::from(geometry.bytes_per_sector));
        for i in 0..u64::from(root_dir_sectors) {
            let sector = self
                .fetch(first_sector + i)
                .map_err(|err| Error::ReadDir(Box::new(err)))?;
            data.extend_from_slice(&sector);
        }

        Ok(decode_directory(&data))
    }

    /// Decode the directory whose cluster chain starts at `cluster`.
    pub(crate) fn read_dir_entries(&self, cluster: FatEntry) -> Result<Vec<DirEntry>, Error> {
        let (data, err) = self.read_file_at(cluster, -1, 0, 0);
        if let Some(err) = err {
            return Err(Error::ReadDir(Box::new(err)));
        }
        Ok(decode_directory(&data))
    }

    /// Decode the root directory: a fixed sector run on FAT16, a regular
    /// cluster chain on FAT32.
    pub(crate) fn read_root(&self) -> Result<Vec<DirEntry>, Error> {
        let geometry = &self.geometry;
        match geometry.fs_type {
            FatType::Fat16 => {
                let first_root_sector = u64::from(geometry.reserved_sector_count)
                    + u64::from(geometry.fat_count) * u64::from(geometry.fat_size);
                self.read_dir_at_sector(first_root_sector)
            }
            FatType::Fat32 => self.read_dir_entries(FatEntry(geometry.root_cluster)),
            FatType::Fat12 => Err(Error::NotSupported),
        }
    }

    /// Open a path relative to the volume root.
    ///
    /// Paths are slash-separated (backslashes are converted); `.` names the
    /// root; matching is case-insensitive. Non-final segments must be
    /// directories.
    pub fn open(&self, path: &str) -> Result<File<'_>, Error> {
        let wrap = |err: Error| Error::OpenFilesystem(Box::new(err));

        let path = path.replace('\\', "/");
        if !valid_path(&path) {
            return Err(wrap(Error::InvalidPath));
        }

        let path = if path == "." { "" } else { path.as_str() };
        let path = path.strip_suffix('/').unwrap_or(path).to_string();

        // The root has no entry of its own; hand out a synthetic one.
        if path.is_empty() {
            return Ok(File::new(self, String::new(), &synthetic_root()));
        }

        log::debug!("opening path {path:?}");
        let mut content = self.read_root().map_err(wrap)?;

        let segments: Vec<&str> = path.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }

            let Some(found) = content
                .iter()
                .find(|entry| names_match(&entry.name(), segment))
            else {
                log::debug!("path segment {segment:?} not found");
                return Err(wrap(Error::NotFound {
                    segment: segment.to_string(),
                }));
            };

            if i == segments.len() - 1 {
                return Ok(File::new(self, path.clone(), found));
            }

            if !found.is_dir() {
                return Err(wrap(Error::NotADirectory));
            }

            let first_cluster = FatEntry(found.first_cluster());
            content = self.read_dir_entries(first_cluster).map_err(wrap)?;
        }

        Err(wrap(Error::NotFound { segment: path }))
    }

    /// Open a path like [`Volume::open`]. Flags and mode are accepted for
    /// interface compatibility and ignored.
    pub fn open_file(
        &self,
        name: &str,
        _flags: OpenFlags,
        _mode: u32,
    ) -> Result<File<'_>, Error> {
        self.open(name)
    }

    /// Stat a path: open it, snapshot the metadata, close the handle.
    pub fn stat(&self, path: &str) -> Result<Metadata, Error> {
        let mut file = self.open(path)?;
        let metadata = file.stat();
        file.close()?;
        Ok(metadata)
    }
}

impl<S> Volume<S> {
    /// The volume label with trailing spaces trimmed.
    pub fn label(&self) -> String {
        String::from_utf8_lossy(&self.geometry.label)
            .trim_end_matches(' ')
            .to_string()
    }

    /// The volume serial number.
    pub fn volume_id(&self) -> u32 {
        self.geometry.volume_id
    }

    /// The FAT flavor this volume was classified as.
    pub fn fs_type(&self) -> FatType {
        self.geometry.fs_type
    }

    /// The name of this filesystem implementation.
    pub fn name(&self) -> &'static str {
        "FAT"
    }

    /// The decoded mount geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Unsupported: the volume is read-only.
    pub fn create(&self, _name: &str) -> Result<File<'_>, Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn mkdir(&self, _name: &str, _mode: u32) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn mkdir_all(&self, _path: &str, _mode: u32) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn remove(&self, _name: &str) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn remove_all(&self, _path: &str) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn rename(&self, _old_name: &str, _new_name: &str) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn chmod(&self, _name: &str, _mode: u32) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn chown(&self, _name: &str, _uid: u32, _gid: u32) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Unsupported: the volume is read-only.
    pub fn chtimes(
        &self,
        _name: &str,
        _accessed: Option<PrimitiveDateTime>,
        _modified: Option<PrimitiveDateTime>,
    ) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}

impl<S: Read + Seek> VolumeAccess for Volume<S> {
    fn read_file_at(
        &self,
        cluster: FatEntry,
        file_size: i64,
        offset: i64,
        read_size: i64,
    ) -> (Vec<u8>, Option<Error>) {
        Volume::read_file_at(self, cluster, file_size, offset, read_size)
    }

    fn read_dir_entries(&self, cluster: FatEntry) -> Result<Vec<DirEntry>, Error> {
        Volume::read_dir_entries(self, cluster)
    }

    fn read_root(&self) -> Result<Vec<DirEntry>, Error> {
        Volume::read_root(self)
    }
}

/// FAT entry names are matched with surrounding spaces trimmed, ignoring
/// case (FAT is case-insensitive).
fn names_match(entry_name: &str, segment: &str) -> bool {
    entry_name.trim_matches(' ').to_uppercase() == segment.to_uppercase()
}

/// Check a path for well-formedness: no NUL, no `.`/`..` segments (the
/// whole path `.` names the root), no empty segments other than a single
/// trailing slash. `/` alone is not a valid path; use `.` for the root.
fn valid_path(path: &str) -> bool {
    if path.contains('\0') {
        return false;
    }
    if path == "." {
        return true;
    }
    if path.is_empty() {
        return false;
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return false;
    }

    trimmed
        .split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
