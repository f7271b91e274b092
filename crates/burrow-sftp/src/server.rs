//! Chrooted filesystem operations facade
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-11 (Error Handling)
//! STIG: V-222596, V-222566
//! Implementation: One method per SFTP verb, each resolving its path
//! through the confinement engine and translating OS results into the
//! facade's error taxonomy. Errors sent to the client only ever name the
//! client-supplied path, never the resolved host path.
//!
//! Permissions are not checked here: everything executes as the account
//! the server runs as, and the confinement root is the only boundary.

use crate::error::{Error, Result};
use crate::path::{Chroot, ConfinedPath, LinkClass};
use crate::protocol::{AccessMode, FileAttrs, OpenFlags};
use crate::realm::ChrootedAvatar;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::SeekFrom;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Server-side SFTP operation set
///
/// The capability contract the host SSH framework dispatches requests
/// into. One implementation per confinement policy; [`ChrootedSftpServer`]
/// is the chrooted one.
#[async_trait]
pub trait SftpServer {
    /// Open file handle type
    type File: SftpFile;
    /// Directory listing type
    type Directory;

    /// Canonical root-relative form of a client path
    async fn real_path(&self, path: &str) -> Result<String>;

    /// Attributes of a path, following links or not per the flag
    async fn get_attrs(&self, path: &str, follow_links: bool) -> Result<FileAttrs>;

    /// Open a file with an SFTP flag bitmask
    async fn open_file(&self, path: &str, flags: OpenFlags) -> Result<Self::File>;

    /// Unlink a file or symlink
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove an empty directory
    async fn remove_directory(&self, path: &str) -> Result<()>;

    /// Create a directory
    async fn make_directory(&self, path: &str) -> Result<()>;

    /// Atomically move a file, directory or link
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Open a directory for listing
    async fn open_directory(&self, path: &str) -> Result<Self::Directory>;

    /// Target of a symlink, root-relative
    async fn read_link(&self, path: &str) -> Result<String>;

    /// Create a symlink at `link_path` pointing to `target_path`
    async fn make_link(&self, link_path: &str, target_path: &str) -> Result<()>;

    /// Apply attributes to a path
    async fn set_attrs(&self, path: &str, attrs: FileAttrs) -> Result<()>;

    /// Protocol extension hook
    async fn extended_request(&self, name: &str, data: &[u8]) -> Result<Vec<u8>>;
}

/// Open file capability
#[async_trait]
pub trait SftpFile {
    /// Read up to `length` bytes at `offset`; an empty result means end of
    /// file
    async fn read_chunk(&mut self, offset: u64, length: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`
    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Attributes of the open file
    async fn attrs(&mut self) -> Result<FileAttrs>;

    /// Apply attributes to the open file
    async fn set_attrs(&mut self, attrs: FileAttrs) -> Result<()>;

    /// Flush and close the handle
    async fn close(self) -> Result<()>;
}

/// Chrooted SFTP server facade
///
/// Constructed per connection from the avatar the realm handed out; holds
/// no state beyond the confinement root, so sessions never share anything.
pub struct ChrootedSftpServer {
    chroot: Chroot,
    setstat_compat: bool,
}

impl ChrootedSftpServer {
    /// Build the facade for an authenticated avatar
    ///
    /// # Errors
    ///
    /// Fails if the avatar's root is not an existing absolute directory.
    pub fn new(avatar: &ChrootedAvatar) -> Result<Self> {
        Ok(Self {
            chroot: Chroot::new(avatar.root())?,
            setstat_compat: true,
        })
    }

    /// Choose the setstat behavior: `true` (the default) silently accepts
    /// attribute changes, which some clients require after uploads;
    /// `false` rejects them as unsupported.
    pub fn with_setstat_compat(mut self, enabled: bool) -> Self {
        self.setstat_compat = enabled;
        self
    }

    /// The confinement engine backing this facade
    pub fn chroot(&self) -> &Chroot {
        &self.chroot
    }
}

/// Map an OS error onto the facade taxonomy, naming only the
/// client-supplied path
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
fn fs_error(err: std::io::Error, client_path: &str) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(client_path.to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(client_path.to_string()),
        std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(client_path.to_string()),
        _ => Error::Io(err),
    }
}

#[async_trait]
impl SftpServer for ChrootedSftpServer {
    type File = ChrootedFile;
    type Directory = ChrootedDirectory;

    async fn real_path(&self, path: &str) -> Result<String> {
        self.chroot.real_path(path).await
    }

    async fn get_attrs(&self, path: &str, follow_links: bool) -> Result<FileAttrs> {
        let mut resolved = self.chroot.resolve(path);
        resolved
            .restat(follow_links)
            .await
            .map_err(|e| fs_error(e, path))
    }

    async fn open_file(&self, path: &str, flags: OpenFlags) -> Result<ChrootedFile> {
        let resolved = self.chroot.resolve(path);
        let mode = AccessMode::from_flags(flags)?;

        debug!(path, ?mode, "opening file");
        let file = mode
            .to_open_options()
            .open(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;

        Ok(ChrootedFile {
            file,
            path: resolved,
            setstat_compat: self.setstat_compat,
        })
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let resolved = self.chroot.resolve(path);

        // A broken link does not "exist" but must still be removable, so
        // the existence check must not follow links
        let metadata = fs::symlink_metadata(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        if metadata.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }

        fs::remove_file(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        info!(path, "removed file");
        Ok(())
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        let resolved = self.chroot.resolve(path);

        // Two traps when the path is a link that points at a directory:
        // an in-root directory link must not be removable as if it were
        // the directory, and an out-of-root directory link must not let
        // the client learn it is a link at all. Both classes fail the
        // same way: not a directory.
        let metadata = fs::symlink_metadata(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        if metadata.file_type().is_symlink() || !metadata.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }

        let mut entries = fs::read_dir(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        if entries.next_entry().await.map_err(Error::Io)?.is_some() {
            return Err(Error::DirectoryNotEmpty(path.to_string()));
        }

        fs::remove_dir(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        info!(path, "removed directory");
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        let resolved = self.chroot.resolve(path);

        if resolved.exists_or_is_link().await {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        fs::create_dir(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        info!(path, "created directory");
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let new_resolved = self.chroot.resolve(new_path);
        if new_resolved.exists_or_is_link().await {
            return Err(Error::AlreadyExists(new_path.to_string()));
        }

        let old_resolved = self.chroot.resolve(old_path);
        if !old_resolved.exists_or_is_link().await {
            return Err(Error::NotFound(old_path.to_string()));
        }

        fs::rename(old_resolved.as_path(), new_resolved.as_path())
            .await
            .map_err(|e| fs_error(e, old_path))?;
        info!(old_path, new_path, "renamed");
        Ok(())
    }

    async fn open_directory(&self, path: &str) -> Result<ChrootedDirectory> {
        let resolved = self.chroot.resolve(path);

        let metadata = fs::metadata(resolved.as_path())
            .await
            .map_err(|e| fs_error(e, path))?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }

        let mut children = VecDeque::new();
        if matches!(self.chroot.classify(&resolved).await, LinkClass::Outside) {
            // Opaque directory link: listable, but its contents live
            // outside the root and are never enumerated
            debug!(path, "listing opaque directory link as empty");
        } else {
            let mut read_dir = fs::read_dir(resolved.as_path())
                .await
                .map_err(|e| fs_error(e, path))?;
            while let Some(entry) = read_dir.next_entry().await.map_err(Error::Io)? {
                children.push_back(ConfinedPath::new(entry.path()));
            }
        }

        debug!(path, count = children.len(), "opened directory");
        Ok(ChrootedDirectory {
            chroot: self.chroot.clone(),
            children,
        })
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let resolved = self.chroot.resolve(path);

        // Only transparent links have a target the client may see; opaque
        // links must be indistinguishable from plain files here
        match self.chroot.classify(&resolved).await {
            LinkClass::Inside(real) => {
                debug!(path, target = %real.display(), "read link");
                self.chroot.relativize(&ConfinedPath::new(real))
            }
            LinkClass::NotALink | LinkClass::Outside => {
                Err(Error::NotALink(path.to_string()))
            }
        }
    }

    async fn make_link(&self, link_path: &str, target_path: &str) -> Result<()> {
        let link = self.chroot.resolve(link_path);
        let target = self.chroot.resolve(target_path);

        if link.exists_or_is_link().await {
            return Err(Error::AlreadyExists(link_path.to_string()));
        }
        if !target.exists().await {
            return Err(Error::NotFound(target_path.to_string()));
        }

        // The stored target is the resolved in-root path, so the link can
        // never be created pointing outside the root
        create_symlink(target.as_path(), link.as_path())
            .await
            .map_err(|e| fs_error(e, link_path))?;
        info!(link_path, target_path, "created symlink");
        Ok(())
    }

    async fn set_attrs(&self, path: &str, _attrs: FileAttrs) -> Result<()> {
        if self.setstat_compat {
            // Some clients issue SETSTAT after every upload and abort the
            // transfer if it errors
            debug!(path, "accepting setstat without applying attributes");
            Ok(())
        } else {
            Err(Error::NotSupported("SETSTAT".into()))
        }
    }

    async fn extended_request(&self, name: &str, _data: &[u8]) -> Result<Vec<u8>> {
        warn!(name, "unsupported extended request");
        Err(Error::NotSupported(format!("extended request {name}")))
    }
}

#[cfg(unix)]
async fn create_symlink(target: &std::path::Path, link: &std::path::Path) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_symlink(_target: &std::path::Path, _link: &std::path::Path) -> std::io::Result<()> {
    warn!("SYMLINK not supported on this platform");
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// A directory listing snapshot
///
/// Children are captured once at open time and drained lazily; entries
/// created afterwards are not observed. Order is whatever the underlying
/// filesystem enumerates.
pub struct ChrootedDirectory {
    chroot: Chroot,
    children: VecDeque<ConfinedPath>,
}

/// One listing entry: basename, fixed-width long line, attributes
#[derive(Debug, Clone)]
pub struct DirListingEntry {
    /// Entry basename
    pub name: String,
    /// `ls -l` style line with owner and group columns stripped
    pub long_name: String,
    /// Entry attributes
    pub attrs: FileAttrs,
}

impl ChrootedDirectory {
    /// Next entry of the snapshot, or `Ok(None)` once exhausted
    ///
    /// Entries are stat'ed following links so that both in-root links
    /// (transparent, shown as their target) and out-of-root links (opaque,
    /// mimicking their target's type) list as ordinary files or
    /// directories. A broken link falls back to its own stat with the
    /// link type bit masked.
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    pub async fn next_entry(&mut self) -> Result<Option<DirListingEntry>> {
        let Some(mut child) = self.children.pop_front() else {
            return Ok(None);
        };

        let attrs = if self.chroot.classify(&child).await.is_link() {
            // Links of either class take their target's stat; one whose
            // target cannot be reached keeps its own stat, re-typed so it
            // still does not read as a link
            match child.restat(true).await {
                Ok(attrs) => attrs,
                Err(_) => child
                    .restat(false)
                    .await
                    .map(FileAttrs::with_link_type_masked)
                    .map_err(Error::Io)?,
            }
        } else {
            child.restat(true).await.map_err(Error::Io)?
        };

        let name = child.basename();
        let long_name = long_name(&name, &attrs);
        Ok(Some(DirListingEntry {
            name,
            long_name,
            attrs,
        }))
    }

    /// Drop the remaining snapshot
    pub fn close(&mut self) {
        self.children.clear();
    }

    /// Entries not yet drained
    pub fn remaining(&self) -> usize {
        self.children.len()
    }
}

/// An open file bound to its confined path
///
/// All reads and writes are explicit offset operations; no caller-visible
/// position state exists beyond the OS descriptor.
pub struct ChrootedFile {
    file: fs::File,
    path: ConfinedPath,
    setstat_compat: bool,
}

impl ChrootedFile {
    /// The confined path the handle was opened at
    pub fn path(&self) -> &ConfinedPath {
        &self.path
    }
}

#[async_trait]
impl SftpFile for ChrootedFile {
    async fn read_chunk(&mut self, offset: u64, length: u32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; length as usize];
        let n = self.file.read(&mut buffer).await?;
        buffer.truncate(n);
        Ok(buffer)
    }

    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn attrs(&mut self) -> Result<FileAttrs> {
        // Buffered writes must land before the size is read back
        self.file.flush().await?;
        let metadata = self.file.metadata().await?;
        Ok(FileAttrs::from_metadata(&metadata))
    }

    async fn set_attrs(&mut self, _attrs: FileAttrs) -> Result<()> {
        if self.setstat_compat {
            debug!(path = %self.path.basename(), "accepting fsetstat without applying attributes");
            Ok(())
        } else {
            Err(Error::NotSupported("FSETSTAT".into()))
        }
    }

    async fn close(mut self) -> Result<()> {
        self.file.flush().await?;
        debug!(path = %self.path.basename(), "closed file handle");
        Ok(())
    }
}

/// Render a fixed-width listing line for an entry
///
/// Owner and group columns are omitted so listings cannot reveal host
/// account mappings.
pub fn long_name(name: &str, attrs: &FileAttrs) -> String {
    let mode = attrs.permissions.unwrap_or(0);
    let size = attrs.size.unwrap_or(0);
    let when = attrs
        .mtime
        .and_then(|t| chrono::DateTime::from_timestamp(i64::from(t), 0))
        .map(|t| t.format("%b %e %H:%M").to_string())
        .unwrap_or_else(|| "            ".to_string());

    format!(
        "{}{} {:>12} {} {}",
        type_char(mode),
        permission_string(mode),
        size,
        when,
        name
    )
}

fn type_char(mode: u32) -> char {
    use crate::protocol::{FILE_TYPE_MASK, TYPE_DIRECTORY, TYPE_SYMLINK};

    match mode & FILE_TYPE_MASK {
        TYPE_DIRECTORY => 'd',
        TYPE_SYMLINK => 'l',
        _ => '-',
    }
}

fn permission_string(mode: u32) -> String {
    [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ]
    .iter()
    .map(|&(bit, ch)| if mode & bit != 0 { ch } else { '-' })
    .collect()
}
