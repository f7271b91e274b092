//! Per-connection realm and avatar
//!
//! The realm is the factory hook the host SSH framework calls once a login
//! succeeds: given the configured root, it produces the avatar the SFTP
//! subsystem is bound to for that connection.

use std::path::{Path, PathBuf};

/// Factory producing confined avatars for authenticated users
pub struct ChrootedSshRealm {
    root: PathBuf,
}

impl ChrootedSshRealm {
    /// Realm confining every avatar to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The confinement root handed to avatars
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Produce the avatar for an authenticated username
    pub fn request_avatar(&self, username: &str) -> ChrootedAvatar {
        ChrootedAvatar {
            username: username.to_string(),
            root: self.root.clone(),
        }
    }
}

/// A shell-less, connection-scoped identity carrying its confinement root
#[derive(Debug, Clone)]
pub struct ChrootedAvatar {
    username: String,
    root: PathBuf,
}

impl ChrootedAvatar {
    /// Build an avatar directly, outside any realm
    pub fn new(username: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            root: root.into(),
        }
    }

    /// The authenticated username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The confinement root for this connection
    pub fn root(&self) -> &Path {
        &self.root
    }
}
