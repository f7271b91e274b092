//! SFTP protocol values shared with the host framing layer
//!
//! Open-flag bitmasks, status codes and file attributes as defined in
//! draft-ietf-secsh-filexfer-02. Packet encoding and decoding belong to the
//! host SSH framework; this module only carries the values the filesystem
//! facade needs to interpret requests and describe results.

use crate::error::{Error, Result};

/// SFTP status codes (draft-ietf-secsh-filexfer)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

/// File open flags (as defined in the SFTP spec)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing
    pub const WRITE: u32 = 0x0000_0002;
    /// Writes go to the end of the file
    pub const APPEND: u32 = 0x0000_0004;
    /// Create the file if it does not exist
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate the file to zero length on open
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail if the file already exists
    pub const EXCL: u32 = 0x0000_0020;

    /// Read bit is set
    pub fn has_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Write bit is set
    pub fn has_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    /// Append bit is set
    pub fn has_append(self) -> bool {
        self.0 & Self::APPEND != 0
    }

    /// Create bit is set
    pub fn has_creat(self) -> bool {
        self.0 & Self::CREAT != 0
    }

    /// Truncate bit is set
    pub fn has_trunc(self) -> bool {
        self.0 & Self::TRUNC != 0
    }

    /// Exclusive-create bit is set
    pub fn has_excl(self) -> bool {
        self.0 & Self::EXCL != 0
    }
}

/// OS-level access mode derived from an SFTP open-flag bitmask
///
/// The translation is a pure function of the flags; it touches no
/// filesystem state. Exactly one of read or write must be requested (or
/// both), every other bit is OR'd in independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode {
    /// Open readable
    pub read: bool,
    /// Open writable
    pub write: bool,
    /// Position writes at the end of the file
    pub append: bool,
    /// Create when absent
    pub create: bool,
    /// Truncate existing contents
    pub truncate: bool,
    /// Refuse to open an existing file
    pub exclusive: bool,
}

impl AccessMode {
    /// Translate an SFTP flag bitmask into an access mode
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidFlags`] when the mask carries neither the
    /// read nor the write bit.
    pub fn from_flags(flags: OpenFlags) -> Result<Self> {
        if !flags.has_read() && !flags.has_write() {
            return Err(Error::InvalidFlags(
                "must have read flag, write flag, or both".into(),
            ));
        }

        Ok(Self {
            read: flags.has_read(),
            write: flags.has_write(),
            append: flags.has_append(),
            create: flags.has_creat(),
            truncate: flags.has_trunc(),
            exclusive: flags.has_excl(),
        })
    }

    /// Build the OS open options for this mode
    pub fn to_open_options(self) -> tokio::fs::OpenOptions {
        let mut options = tokio::fs::OpenOptions::new();

        if self.read {
            options.read(true);
        }
        if self.write {
            options.write(true);
        }
        if self.append {
            options.append(true);
        }
        if self.create {
            options.create(true);
        }
        if self.truncate {
            options.truncate(true);
        }
        if self.exclusive {
            options.create_new(true);
        }

        options
    }
}

/// Mask selecting the file-type bits of a permission word
pub const FILE_TYPE_MASK: u32 = 0o170_000;
/// Directory type bits
pub const TYPE_DIRECTORY: u32 = 0o040_000;
/// Symbolic link type bits
pub const TYPE_SYMLINK: u32 = 0o120_000;
/// Regular file type bits
pub const TYPE_REGULAR: u32 = 0o100_000;

/// File attributes (as defined in the SFTP spec)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owning user id
    pub uid: Option<u32>,
    /// Owning group id
    pub gid: Option<u32>,
    /// Permission and file-type bits
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
}

impl FileAttrs {
    /// Build attributes from OS metadata
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: Some(metadata.len()),
            uid: Some(metadata.uid()),
            gid: Some(metadata.gid()),
            permissions: Some(metadata.mode()),
            atime: u32::try_from(metadata.atime()).ok(),
            mtime: u32::try_from(metadata.mtime()).ok(),
        }
    }

    /// Build attributes from OS metadata (non-Unix fallback)
    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .and_then(|d| u32::try_from(d.as_secs()).ok());

        let type_bits = if metadata.is_dir() {
            TYPE_DIRECTORY
        } else {
            TYPE_REGULAR
        };

        Self {
            size: Some(metadata.len()),
            uid: None,
            gid: None,
            permissions: Some(type_bits | 0o644),
            atime: None,
            mtime,
        }
    }

    /// File-type bits report a directory
    pub fn is_directory(&self) -> bool {
        self.permissions
            .is_some_and(|mode| mode & FILE_TYPE_MASK == TYPE_DIRECTORY)
    }

    /// File-type bits report a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.permissions
            .is_some_and(|mode| mode & FILE_TYPE_MASK == TYPE_SYMLINK)
    }

    /// Re-type a symbolic link as a regular file
    ///
    /// Applied to listing entries so the confined view never reports an
    /// entry as a link.
    pub fn with_link_type_masked(mut self) -> Self {
        if let Some(mode) = self.permissions {
            if mode & FILE_TYPE_MASK == TYPE_SYMLINK {
                self.permissions = Some(TYPE_REGULAR | (mode & !FILE_TYPE_MASK));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_alone_is_read_only() {
        let mode = AccessMode::from_flags(OpenFlags(OpenFlags::READ)).unwrap();
        assert!(mode.read);
        assert!(!mode.write);
        assert!(!mode.append && !mode.create && !mode.truncate && !mode.exclusive);
    }

    #[test]
    fn test_write_alone_is_write_only() {
        let mode = AccessMode::from_flags(OpenFlags(OpenFlags::WRITE)).unwrap();
        assert!(!mode.read);
        assert!(mode.write);
    }

    #[test]
    fn test_read_write_is_read_write() {
        let mode =
            AccessMode::from_flags(OpenFlags(OpenFlags::READ | OpenFlags::WRITE)).unwrap();
        assert!(mode.read);
        assert!(mode.write);
    }

    #[test]
    fn test_neither_read_nor_write_fails() {
        let result = AccessMode::from_flags(OpenFlags(OpenFlags::CREAT | OpenFlags::TRUNC));
        assert!(matches!(result, Err(crate::Error::InvalidFlags(_))));
    }

    #[test]
    fn test_modifier_bits_are_independent() {
        let flags = OpenFlags(
            OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::APPEND
                | OpenFlags::TRUNC,
        );
        let mode = AccessMode::from_flags(flags).unwrap();
        assert!(mode.write && mode.create && mode.exclusive && mode.append && mode.truncate);
        assert!(!mode.read);

        let flags = OpenFlags(OpenFlags::READ | OpenFlags::CREAT);
        let mode = AccessMode::from_flags(flags).unwrap();
        assert!(mode.create);
        assert!(!mode.exclusive && !mode.append && !mode.truncate);
    }

    #[test]
    fn test_link_type_masking() {
        let attrs = FileAttrs {
            permissions: Some(TYPE_SYMLINK | 0o777),
            ..FileAttrs::default()
        };
        assert!(attrs.is_symlink());

        let masked = attrs.with_link_type_masked();
        assert!(!masked.is_symlink());
        assert_eq!(masked.permissions, Some(TYPE_REGULAR | 0o777));

        // Non-links pass through untouched
        let dir = FileAttrs {
            permissions: Some(TYPE_DIRECTORY | 0o755),
            ..FileAttrs::default()
        };
        assert_eq!(dir.with_link_type_masked().permissions, Some(TYPE_DIRECTORY | 0o755));
    }
}
