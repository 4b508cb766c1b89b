//! Sector-level access to the backing byte source
//!
//! All physical I/O goes through [`SectorSource::fetch`], which resolves a
//! sector index to its bytes. A single-slot cache short-circuits repeated
//! fetches of the same sector, which covers the common sequential patterns
//! (FAT walks and directory scans revisit one sector many times in a row).

use std::io::{Read, Seek, SeekFrom};

use crate::error::Error;

/// Wraps the seekable byte source together with the one-sector cache.
///
/// Exclusion is provided by the volume, which keeps the whole source behind
/// its mutex; `fetch` is atomic from the caller's perspective.
#[derive(Debug)]
pub(crate) struct SectorSource<S> {
    source: S,
    bytes_per_sector: u16,
    /// Index and contents of the most recently read sector.
    cache: Option<(u64, Vec<u8>)>,
}

impl<S: Read + Seek> SectorSource<S> {
    /// A fresh source with an unprimed cache, so the first fetch always hits
    /// the backing store.
    pub(crate) fn new(source: S, bytes_per_sector: u16) -> Self {
        SectorSource {
            source,
            bytes_per_sector,
            cache: None,
        }
    }

    /// Switch the sector size once the BPB declares the real one.
    ///
    /// The cache slot is keyed by sector index, and indices mean something
    /// else under a different sector size, so the slot is dropped.
    pub(crate) fn set_bytes_per_sector(&mut self, bytes_per_sector: u16) {
        if self.bytes_per_sector != bytes_per_sector {
            self.bytes_per_sector = bytes_per_sector;
            self.cache = None;
        }
    }

    /// Load one sector, from the cache when possible.
    ///
    /// Reads exactly `bytes_per_sector` bytes; a short source surfaces as a
    /// fetch error annotated with the sector index. No retry.
    pub(crate) fn fetch(&mut self, sector: u64) -> Result<Vec<u8>, Error> {
        if let Some((cached, buffer)) = &self.cache {
            if *cached == sector {
                return Ok(buffer.clone());
            }
        }

        let position = sector
            .checked_mul(u64::from(self.bytes_per_sector))
            .ok_or_else(|| Error::FetchSector {
                sector,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "sector offset overflows",
                ),
            })?;

        let mut buffer = vec![0u8; usize::from(self.bytes_per_sector)];
        self.source
            .seek(SeekFrom::Start(position))
            .and_then(|_| self.source.read_exact(&mut buffer))
            .map_err(|source| Error::FetchSector { sector, source })?;

        self.cache = Some((sector, buffer.clone()));
        Ok(buffer)
    }

    /// Whether the given sector is the cached one. Test hook for the
    /// "cached sector skips I/O" property.
    #[cfg(test)]
    pub(crate) fn is_cached(&self, sector: u64) -> bool {
        matches!(&self.cache, Some((cached, _)) if *cached == sector)
    }
}
