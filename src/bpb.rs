//! Boot-sector structures
//!
//! The BIOS Parameter Block sits at the start of sector 0 and describes the
//! volume geometry. Its last 54 bytes are a type-specific extension area:
//! FAT16 volumes keep drive/label data there, FAT32 volumes prepend the
//! 32-bit FAT size, the root cluster and a reserved block.
//!
//! All multi-byte fields are little-endian and packed, modeled with
//! zerocopy's explicit little-endian integer types so decoding is a plain
//! byte-slice view on every host.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::Error;

/// Size of the FAT-specific extension area inside the BPB.
pub(crate) const FAT_SPECIFIC_LEN: usize = 54;

/// BIOS Parameter Block: the first 90 bytes of sector 0.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub(crate) struct Bpb {
    /// Jump instruction (`EB ?? 90` or `E9 ?? ??`)
    pub jump_boot: [u8; 3],
    /// OEM name
    pub oem_name: [u8; 8],
    /// Bytes per sector (512, 1024, 2048 or 4096)
    pub bytes_per_sector: U16,
    /// Sectors per cluster (power of two)
    pub sectors_per_cluster: u8,
    /// Reserved sectors before the first FAT
    pub reserved_sector_count: U16,
    /// Number of FAT copies
    pub fat_count: u8,
    /// Root directory entries (0 for FAT32)
    pub root_entry_count: U16,
    /// Total sectors, 16-bit variant (0 if the 32-bit field is used)
    pub total_sectors_16: U16,
    /// Media descriptor
    pub media: u8,
    /// Sectors per FAT, 16-bit variant (0 for FAT32)
    pub fat_size_16: U16,
    /// Sectors per track (geometry relic)
    pub sectors_per_track: U16,
    /// Number of heads (geometry relic)
    pub head_count: U16,
    /// Hidden sectors before the partition
    pub hidden_sectors: U32,
    /// Total sectors, 32-bit variant
    pub total_sectors_32: U32,
    /// Type-specific extension area
    pub fat_specific: [u8; FAT_SPECIFIC_LEN],
}

/// FAT16 extension area (first 26 bytes of the type-specific area).
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub(crate) struct Fat16Ext {
    pub drive_number: u8,
    pub reserved: u8,
    pub boot_signature: u8,
    pub volume_id: U32,
    /// Volume label, space-padded
    pub volume_label: [u8; 11],
    /// Filesystem type string, informational only
    pub fs_type: [u8; 8],
}

/// FAT32 extension area (all 54 bytes of the type-specific area).
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub(crate) struct Fat32Ext {
    /// Sectors per FAT, 32-bit
    pub fat_size: U32,
    /// Mirroring flags
    pub ext_flags: U16,
    /// Filesystem version
    pub fs_version: U16,
    /// First cluster of the root directory
    pub root_cluster: U32,
    /// FSInfo sector number
    pub fs_info: U16,
    /// Backup boot sector number
    pub backup_boot_sector: U16,
    pub reserved: [u8; 12],
    pub drive_number: u8,
    pub reserved1: u8,
    pub boot_signature: u8,
    pub volume_id: U32,
    /// Volume label, space-padded
    pub volume_label: [u8; 11],
    /// Filesystem type string, informational only
    pub fs_type: [u8; 8],
}

/// The FAT flavor of a volume, derived from the cluster count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    /// Detected but not supported; mounting fails with an accurate error.
    Fat12,
    Fat16,
    Fat32,
}

impl std::fmt::Display for FatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        })
    }
}

/// Classify a volume by its data-area cluster count.
///
/// The boundaries are fixed by the format: anything below 4085 clusters is
/// FAT12, below 65525 is FAT16, everything else FAT32.
pub(crate) fn classify_cluster_count(count_of_clusters: u32) -> FatType {
    if count_of_clusters < 4085 {
        FatType::Fat12
    } else if count_of_clusters < 65525 {
        FatType::Fat16
    } else {
        FatType::Fat32
    }
}

impl Bpb {
    /// Run the strict structural checks against this BPB and the raw sector
    /// it came from. Skip-checks mounts bypass this entirely.
    pub(crate) fn strict_checks(&self, sector0: &[u8]) -> Result<(), Error> {
        let fail = |reason: &'static str| {
            log::debug!("boot sector rejected: {reason}");
            Err(Error::InitializeFilesystem { reason })
        };

        let jump = self.jump_boot;
        if !(jump[0] == 0xEB && jump[2] == 0x90) && jump[0] != 0xE9 {
            return fail("no valid jump instruction at the start of the boot sector");
        }

        if !matches!(self.bytes_per_sector.get(), 512 | 1024 | 2048 | 4096) {
            return fail("invalid sector size");
        }

        let cluster_bytes =
            u32::from(self.bytes_per_sector.get()) * u32::from(self.sectors_per_cluster);
        if !self.sectors_per_cluster.is_power_of_two() || cluster_bytes > 32 * 1024 {
            return fail("invalid sectors per cluster");
        }

        if self.reserved_sector_count.get() == 0 {
            return fail("invalid reserved sector count");
        }

        if self.fat_count < 1 {
            return fail("invalid FAT count");
        }

        if self.media != 0xF0 && !(0xF8..=0xFF).contains(&self.media) {
            return fail("invalid media descriptor");
        }

        if sector0.len() < 512 || sector0[510] != 0x55 || sector0[511] != 0xAA {
            return fail("invalid signature at offset 510/511");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use zerocopy::FromZeros;

    #[test]
    fn on_disk_sizes() {
        assert_eq!(std::mem::size_of::<Bpb>(), 90);
        assert_eq!(std::mem::size_of::<Fat16Ext>(), 26);
        assert_eq!(std::mem::size_of::<Fat32Ext>(), FAT_SPECIFIC_LEN);
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify_cluster_count(0), FatType::Fat12);
        assert_eq!(classify_cluster_count(4084), FatType::Fat12);
        assert_eq!(classify_cluster_count(4085), FatType::Fat16);
        assert_eq!(classify_cluster_count(65524), FatType::Fat16);
        assert_eq!(classify_cluster_count(65525), FatType::Fat32);
        assert_eq!(classify_cluster_count(u32::MAX), FatType::Fat32);
    }

    fn plausible_bpb() -> Bpb {
        let mut bpb = Bpb::new_zeroed();
        bpb.jump_boot = [0xEB, 0x3C, 0x90];
        bpb.bytes_per_sector = U16::new(512);
        bpb.sectors_per_cluster = 4;
        bpb.reserved_sector_count = U16::new(1);
        bpb.fat_count = 2;
        bpb.media = 0xF8;
        bpb
    }

    fn signed_sector() -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn strict_checks_accept_a_plausible_boot_sector() {
        plausible_bpb().strict_checks(&signed_sector()).unwrap();
    }

    #[test]
    fn strict_checks_reject_each_broken_field() {
        let sector = signed_sector();

        let mut bpb = plausible_bpb();
        bpb.jump_boot = [0x00, 0x3C, 0x90];
        assert!(bpb.strict_checks(&sector).is_err());

        let mut bpb = plausible_bpb();
        bpb.bytes_per_sector = U16::new(513);
        assert!(bpb.strict_checks(&sector).is_err());

        let mut bpb = plausible_bpb();
        bpb.sectors_per_cluster = 3;
        assert!(bpb.strict_checks(&sector).is_err());

        // Power of two, but the cluster would exceed 32 KiB.
        let mut bpb = plausible_bpb();
        bpb.bytes_per_sector = U16::new(4096);
        bpb.sectors_per_cluster = 16;
        assert!(bpb.strict_checks(&sector).is_err());

        let mut bpb = plausible_bpb();
        bpb.reserved_sector_count = U16::new(0);
        assert!(bpb.strict_checks(&sector).is_err());

        let mut bpb = plausible_bpb();
        bpb.fat_count = 0;
        assert!(bpb.strict_checks(&sector).is_err());

        let mut bpb = plausible_bpb();
        bpb.media = 0xF1;
        assert!(bpb.strict_checks(&sector).is_err());

        let unsigned = vec![0u8; 512];
        let err = plausible_bpb().strict_checks(&unsigned).unwrap_err();
        assert!(err.is_kind(ErrorKind::InitializeFilesystem));
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn jump_variants() {
        let sector = signed_sector();

        let mut bpb = plausible_bpb();
        bpb.jump_boot = [0xE9, 0x12, 0x34];
        bpb.strict_checks(&sector).unwrap();

        bpb.jump_boot = [0xEB, 0x00, 0x00];
        assert!(bpb.strict_checks(&sector).is_err());
    }
}
