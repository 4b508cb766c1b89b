//! fatvol - read-only access to FAT16/FAT32 volumes
//!
//! This crate mounts a FAT volume from any seekable byte source - a file, a
//! block device, or an in-memory buffer - and exposes a hierarchical,
//! path-based API on top of the on-disk format: open a path, stat it, read
//! byte ranges of a file, list the entries of a directory.
//!
//! The volume is strictly read-only. Every write-shaped operation exists on
//! the API surface for interface compatibility and returns
//! [`Error::NotSupported`]. FAT12 volumes are detected and rejected at
//! mount time.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::OpenOptions;
//! use fatvol::Volume;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = OpenOptions::new().read(true).open("disk.img")?;
//!     let volume = Volume::new(image)?;
//!     println!("label: {}, type: {}", volume.label(), volume.fs_type());
//!
//!     let mut file = volume.open("docs/readme.md")?;
//!     let mut content = vec![0u8; file.stat().len() as usize];
//!     file.read(&mut content)?;
//!     Ok(())
//! }
//! ```

mod bpb;
mod dir;
mod error;
mod fat;
mod file;
mod sector;
mod volume;

pub use bpb::FatType;
pub use dir::{decode_date, decode_time, Attributes, Metadata};
pub use error::{Error, ErrorKind};
pub use file::File;
pub use volume::{Geometry, OpenFlags, Volume};
