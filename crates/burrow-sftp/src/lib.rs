//! # Burrow SFTP
//!
//! Chrooted SFTP server core built for use under an external SSH transport.
//!
//! The crate provides the two server-side subsystems that carry the actual
//! security weight of a chrooted file transfer service:
//!
//! - A path confinement engine and filesystem operations facade that map
//!   untrusted client path strings onto a real filesystem without ever
//!   escaping a configured root, including correct handling of symbolic
//!   links whose targets lie outside the root.
//! - An SSH public key authentication pipeline that validates a signed
//!   challenge against authorized keys drawn from pluggable backends.
//!
//! ## Features
//!
//! - Lexical path resolution (no OS symlink following during confinement)
//! - Transparent in-root symlinks, opaque out-of-root symlinks
//! - File operations (open, read, write, remove, rename)
//! - Directory operations (list, create, remove) with snapshot listings
//! - Authorized keys from static file mappings or the OS account database
//!
//! The SSH wire protocol, key exchange and packet framing are the host
//! framework's responsibility; this crate exposes the per-session operation
//! set and the authentication entry point the host dispatches into.

pub mod auth;
pub mod config;
pub mod error;
pub mod keydb;
pub mod path;
pub mod protocol;
pub mod realm;
pub mod server;

pub use auth::{AuthFailure, SshCredentials, SshPublicKeyChecker};
pub use config::{Config, KeySource};
pub use error::{Error, Result};
pub use keydb::{AuthorizedKeysDb, AuthorizedKeysFilesMapping, UnixAuthorizedKeys};
pub use path::{Chroot, ConfinedPath, LinkClass};
pub use protocol::{AccessMode, FileAttrs, OpenFlags, StatusCode};
pub use realm::{ChrootedAvatar, ChrootedSshRealm};
pub use server::{
    ChrootedDirectory, ChrootedFile, ChrootedSftpServer, DirListingEntry, SftpFile, SftpServer,
};
