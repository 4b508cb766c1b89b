//! Error taxonomy for volume access
//!
//! Every failure surfaces as one [`Error`] variant. Errors keep their cause
//! chain intact via [`std::error::Error::source`], so a caller can match a
//! kind at any wrapping depth with [`Error::is_kind`].

use std::io;

use thiserror::Error;

/// All errors that can occur while reading a FAT volume.
#[derive(Debug, Error)]
pub enum Error {
    /// The input path is malformed (empty, `/`, NUL, `..` or empty segments).
    #[error("invalid path")]
    InvalidPath,

    /// Umbrella for failures while mounting or opening, wrapping the cause.
    #[error("could not open the filesystem")]
    OpenFilesystem(#[source] Box<Error>),

    /// A structural validation failed while decoding the boot sector.
    #[error("could not initialize the filesystem: {reason}")]
    InitializeFilesystem {
        /// Which check failed.
        reason: &'static str,
    },

    /// FAT12 at mount time, or any write-shaped operation at runtime.
    #[error("not supported")]
    NotSupported,

    /// No directory entry matched a path segment.
    #[error("no matching path found: {segment}")]
    NotFound {
        /// The segment that failed to resolve.
        segment: String,
    },

    /// Low-level I/O failure while reading a sector.
    #[error("could not fetch sector {sector}")]
    FetchSector {
        /// Index of the sector that could not be read.
        sector: u64,
        #[source]
        source: io::Error,
    },

    /// A FAT entry lookup failed.
    #[error("could not read FAT entry of cluster {cluster}")]
    ReadFat {
        /// The cluster whose entry was requested.
        cluster: u32,
        #[source]
        source: Box<Error>,
    },

    /// A file range read aborted or came up short. The bytes produced before
    /// the failure are in the caller's buffer; `read` counts them.
    #[error("could not read file completely from the filesystem ({read} bytes read)")]
    ReadFile {
        /// Bytes produced before the failure.
        read: usize,
        #[source]
        source: Box<Error>,
    },

    /// A directory could not be read from the filesystem.
    #[error("could not read directory from the filesystem")]
    ReadDir(#[source] Box<Error>),

    /// Canonical end-of-data marker. Never wrapped.
    #[error("end of data")]
    EndOfData,

    /// The cluster chain ended before the declared file size was produced.
    #[error("unexpected end of data")]
    UnexpectedEnd,

    /// A seek target lies outside `[0, file_size]`.
    #[error("seek position out of range")]
    OutOfRange,

    /// Seek arithmetic overflowed, or a by-offset read got a negative offset.
    #[error("invalid argument")]
    InvalidArgument,

    /// Descent into a non-directory, or a listing request on a file.
    #[error("not a directory")]
    NotADirectory,
}

/// Discriminant-only mirror of [`Error`], for matching wrapped causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPath,
    OpenFilesystem,
    InitializeFilesystem,
    NotSupported,
    NotFound,
    FetchSector,
    ReadFat,
    ReadFile,
    ReadDir,
    EndOfData,
    UnexpectedEnd,
    OutOfRange,
    InvalidArgument,
    NotADirectory,
}

impl Error {
    /// The kind of this error, ignoring any wrapped cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPath => ErrorKind::InvalidPath,
            Error::OpenFilesystem(_) => ErrorKind::OpenFilesystem,
            Error::InitializeFilesystem { .. } => ErrorKind::InitializeFilesystem,
            Error::NotSupported => ErrorKind::NotSupported,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::FetchSector { .. } => ErrorKind::FetchSector,
            Error::ReadFat { .. } => ErrorKind::ReadFat,
            Error::ReadFile { .. } => ErrorKind::ReadFile,
            Error::ReadDir(_) => ErrorKind::ReadDir,
            Error::EndOfData => ErrorKind::EndOfData,
            Error::UnexpectedEnd => ErrorKind::UnexpectedEnd,
            Error::OutOfRange => ErrorKind::OutOfRange,
            Error::InvalidArgument => ErrorKind::InvalidArgument,
            Error::NotADirectory => ErrorKind::NotADirectory,
        }
    }

    /// True if this error, or any cause in its chain, has the given kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            Error::OpenFilesystem(source)
            | Error::ReadFat { source, .. }
            | Error::ReadFile { source, .. }
            | Error::ReadDir(source) => source.is_kind(kind),
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err.kind() {
            ErrorKind::InvalidPath | ErrorKind::InvalidArgument | ErrorKind::OutOfRange => {
                io::ErrorKind::InvalidInput
            }
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::NotSupported => io::ErrorKind::Unsupported,
            ErrorKind::EndOfData | ErrorKind::UnexpectedEnd => io::ErrorKind::UnexpectedEof,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::InitializeFilesystem => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
