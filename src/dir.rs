//! Directory decoding
//!
//! Directories are flat arrays of 32-byte records. A record is either a
//! short 8.3 entry, a long-filename (LFN) slot carrying 13 UTF-16 code units
//! of an overlay name, a volume label, or one of the sentinel states
//! (free, deleted, dot). [`decode_directory`] runs the record stream through
//! a small state machine and yields the logical entries: each short entry,
//! merged with the long name decoded from the LFN run in front of it when
//! that run validates.
//!
//! # Long file names
//!
//! LFN slots precede their short entry in reverse order:
//!
//! ```text
//! <slot #3, sequence = 0x43, "h is long">
//! <slot #2, sequence = 0x02, "xtension whic">
//! <slot #1, sequence = 0x01, "My Big File.E">
//! <short entry,             "MYBIGFIL.EXT">
//! ```
//!
//! Every slot stores a checksum of the 11 short-name bytes; a mismatch, a
//! hole in the run or a sequence number out of order discards the long name
//! and the 8.3 name is used instead.

use time::macros::time;
use time::{Date, Duration, Month, PrimitiveDateTime, Time};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

bitflags::bitflags! {
    /// Attribute byte of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const DEVICE = 0x40;
        const RESERVED = 0x80;
        /// All four low bits at once mark an LFN slot.
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

/// Size of one directory record on disk.
pub(crate) const DIR_ENTRY_SIZE: usize = 32;

/// Short directory entry, as stored on disk.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub(crate) struct RawDirEntry {
    /// 8.3 name: 8 base bytes then 3 extension bytes, space-padded
    pub name: [u8; 11],
    pub attributes: u8,
    pub nt_reserved: u8,
    /// Creation time, tenths of a second (0-199)
    pub create_time_tenths: u8,
    pub create_time: U16,
    pub create_date: U16,
    pub access_date: U16,
    /// High half of the first cluster; zero on FAT16
    pub first_cluster_high: U16,
    pub write_time: U16,
    pub write_date: U16,
    pub first_cluster_low: U16,
    pub file_size: U32,
}

/// LFN slot, sharing the 32-byte record layout.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub(crate) struct RawLfnEntry {
    /// Low 5 bits: ordinal 1..=20; bit 0x40: first physical slot of a run
    pub sequence: u8,
    pub name1: [U16; 5],
    /// Always 0x0F
    pub attributes: u8,
    pub entry_type: u8,
    /// Rotate-right checksum of the target's 11 short-name bytes
    pub checksum: u8,
    pub name2: [U16; 6],
    /// Always zero
    pub first_cluster: U16,
    pub name3: [U16; 2],
}

/// One logical directory entry: a short header plus the long name decoded
/// from the LFN run in front of it, when that run was valid.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub(crate) header: RawDirEntry,
    pub(crate) long_name: Option<String>,
}

impl DirEntry {
    /// The display name: the long name when one was decoded, the rendered
    /// 8.3 name otherwise.
    pub fn name(&self) -> String {
        match &self.long_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => render_short_name(&self.header.name),
        }
    }

    /// Attribute flags of the entry.
    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.header.attributes)
    }

    /// Whether the entry names a directory.
    pub fn is_dir(&self) -> bool {
        self.attributes().contains(Attributes::DIRECTORY)
    }

    /// File size in bytes; zero for directories.
    pub fn size(&self) -> u64 {
        u64::from(self.header.file_size.get())
    }

    /// First cluster of the entry's data, combined from both halves.
    pub fn first_cluster(&self) -> u32 {
        (u32::from(self.header.first_cluster_high.get()) << 16)
            | u32::from(self.header.first_cluster_low.get())
    }

    /// Snapshot of the entry as a stat result.
    pub fn metadata(&self) -> Metadata {
        let header = &self.header;
        Metadata {
            name: self.name(),
            size: self.size(),
            is_dir: self.is_dir(),
            attributes: self.attributes(),
            modified: decode_date(header.write_date.get())
                .map(|date| PrimitiveDateTime::new(date, decode_time(header.write_time.get()))),
            created: decode_date(header.create_date.get())
                .map(|date| PrimitiveDateTime::new(date, decode_time(header.create_time.get()))),
            accessed: decode_date(header.access_date.get()),
        }
    }
}

/// The synthetic entry used for the volume root, which has no record of its
/// own: a blank name with the directory attribute set.
pub(crate) fn synthetic_root() -> DirEntry {
    let mut header = RawDirEntry::new_zeroed();
    header.name = [b' '; 11];
    header.attributes = Attributes::DIRECTORY.bits();
    DirEntry {
        header,
        long_name: None,
    }
}

/// Stat snapshot of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) is_dir: bool,
    pub(crate) attributes: Attributes,
    pub(crate) modified: Option<PrimitiveDateTime>,
    pub(crate) created: Option<PrimitiveDateTime>,
    pub(crate) accessed: Option<Date>,
}

impl Metadata {
    /// The entry name the snapshot was taken from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File size in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// True for zero-length files (and directories, which carry size 0).
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the snapshot describes a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Attribute flags.
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// Last write stamp; `None` when the on-disk date word is the zero value.
    pub fn modified(&self) -> Option<PrimitiveDateTime> {
        self.modified
    }

    /// Creation stamp; `None` when the on-disk date word is the zero value.
    pub fn created(&self) -> Option<PrimitiveDateTime> {
        self.created
    }

    /// Last access date; `None` when the on-disk date word is the zero value.
    pub fn accessed(&self) -> Option<Date> {
        self.accessed
    }
}

/// Decode a directory's raw bytes into its logical entries.
///
/// The input is scanned in 32-byte records (a trailing remainder is
/// ignored). Iteration stops at the 0x00 end marker. Deleted records, dot
/// entries and volume labels are filtered out; LFN runs are collected and
/// merged into the short entry that follows them.
pub(crate) fn decode_directory(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut pending: Vec<RawLfnEntry> = Vec::new();
    // Index of the last record that contributed to the pending run.
    let mut last_lfn_index: isize = -1;

    for (index, record) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
        let index = index as isize;
        let mut header = match RawDirEntry::read_from_bytes(record) {
            Ok(header) => header,
            Err(_) => break,
        };

        // End of the directory: everything after is free.
        if header.name[0] == 0x00 {
            break;
        }

        // Dot and dot-dot entries are intentionally not surfaced.
        if header.name[0] == 0x2E {
            continue;
        }

        // Deleted record.
        if header.name[0] == 0xE5 {
            continue;
        }

        // 0x05 escapes a real leading 0xE5.
        if header.name[0] == 0x05 {
            header.name[0] = 0xE5;
        }

        let attributes = Attributes::from_bits_retain(header.attributes);

        if attributes.contains(Attributes::LONG_NAME) {
            let slot = match RawLfnEntry::read_from_bytes(record) {
                Ok(slot) => slot,
                Err(_) => break,
            };

            // Deleted LFN slot.
            if slot.sequence == 0xE5 {
                continue;
            }

            // The 0x40 bit marks the first physical slot: start a fresh run.
            if slot.sequence & 0x40 != 0 {
                pending.clear();
                last_lfn_index = index - 1;
            }

            // Slots of one run sit directly after each other.
            if last_lfn_index + 1 != index {
                pending.clear();
                last_lfn_index = index;
                continue;
            }

            pending.push(slot);
            last_lfn_index = index;
            continue;
        }

        // Volume labels only carry the label; they are not entries.
        if attributes.contains(Attributes::VOLUME_ID) {
            continue;
        }

        let long_name = if !pending.is_empty() && last_lfn_index + 1 == index {
            decode_long_name(&pending, &header.name)
        } else {
            None
        };

        entries.push(DirEntry { header, long_name });
        pending.clear();
        last_lfn_index = index;
    }

    entries
}

/// Validate a collected LFN run against its short entry and decode the name.
///
/// The run is iterated backwards (nearest slot first), checking per slot
/// that the stored checksum matches the short name's and that the low 5
/// sequence bits equal the slot's 1-based position. Code units concatenate
/// in that order and terminate at the first zero unit.
fn decode_long_name(pending: &[RawLfnEntry], short_name: &[u8; 11]) -> Option<String> {
    let checksum = short_name_checksum(short_name);
    let mut units: Vec<u16> = Vec::with_capacity(pending.len() * 13);

    for (position, slot) in pending.iter().rev().enumerate() {
        if slot.checksum != checksum {
            log::debug!(
                "discarding long name for {:?}: slot checksum {:#04x} != {:#04x}",
                render_short_name(short_name),
                slot.checksum,
                checksum
            );
            return None;
        }
        if usize::from(slot.sequence & 0x1F) != position + 1 {
            log::debug!(
                "discarding long name for {:?}: sequence {:#04x} at position {}",
                render_short_name(short_name),
                slot.sequence,
                position + 1
            );
            return None;
        }

        units.extend(slot.name1.iter().map(|unit| unit.get()));
        units.extend(slot.name2.iter().map(|unit| unit.get()));
        units.extend(slot.name3.iter().map(|unit| unit.get()));
    }

    let end = units.iter().position(|&unit| unit == 0).unwrap_or(units.len());
    Some(String::from_utf16_lossy(&units[..end]))
}

/// Rotate-right checksum over the 11 short-name bytes, as stored in every
/// LFN slot of the entry's run.
pub(crate) fn short_name_checksum(name: &[u8; 11]) -> u8 {
    name.iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

/// Render an 8.3 name: trim trailing spaces from base and extension, join
/// with a dot when the extension is non-empty.
pub(crate) fn render_short_name(name: &[u8; 11]) -> String {
    let base = trim_trailing_spaces(&name[..8]);
    let ext = trim_trailing_spaces(&name[8..]);

    let mut rendered: String = base.iter().map(|&byte| byte as char).collect();
    if !ext.is_empty() {
        rendered.push('.');
        rendered.extend(ext.iter().map(|&byte| byte as char));
    }
    rendered
}

fn trim_trailing_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&byte| byte != b' ')
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

/// Decode a FAT date word. Bits 0..4 are the day, 5..8 the month, 9..15 the
/// years since 1980. Day or month zero is the distinguishable zero value.
/// Out-of-range months and days roll forward by calendar arithmetic.
pub fn decode_date(raw: u16) -> Option<Date> {
    let day = i64::from(raw & 0x1F);
    let month0 = i32::from((raw >> 5) & 0x0F) - 1;
    let mut year = 1980 + i32::from((raw >> 9) & 0x7F);

    if day == 0 || month0 < 0 {
        return None;
    }

    year += month0.div_euclid(12);
    let month = Month::try_from((month0.rem_euclid(12) + 1) as u8).ok()?;
    let first = Date::from_calendar_date(year, month, 1).ok()?;
    first.checked_add(Duration::days(day - 1))
}

/// Decode a FAT time word. Bits 0..4 count two-second steps, 5..10 minutes,
/// 11..15 hours. Overflow carries upward; anything past the day clamps to
/// 23:59:59.
pub fn decode_time(raw: u16) -> Time {
    let seconds = u32::from(raw & 0x1F) * 2;
    let minutes = u32::from((raw >> 5) & 0x3F);
    let hours = u32::from(raw >> 11);

    let total = hours * 3600 + minutes * 60 + seconds;
    if total >= 86_400 {
        return time!(23:59:59);
    }
    Time::from_hms((total / 3600) as u8, ((total / 60) % 60) as u8, (total % 60) as u8)
        .unwrap_or(time!(23:59:59))
}
