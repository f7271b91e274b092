//! Authorized key sources
//!
//! NIST 800-53: AC-2 (Account Management), IA-2 (Identification and
//! Authentication)
//! Implementation: Pluggable backends answering one question - which
//! public keys may log in as a given username. A static file mapping for
//! standalone deployments, and an OS account database backend that reads
//! the conventional `~/.ssh/authorized_keys` files, with an injectable
//! privilege-elevation callback for key files the server account cannot
//! read directly.

use crate::auth::{parse_key_line, read_authorized_keys_file};
use crate::config::KeySource;
use crate::error::Result;
use async_trait::async_trait;
use russh_keys::key::PublicKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// A provider of valid authorized SSH keys mapped to usernames
///
/// NIST 800-53: AC-2 (Account Management)
#[async_trait]
pub trait AuthorizedKeysDb: Send + Sync {
    /// The authorized public keys for `username`
    ///
    /// An unknown username yields an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Backend lookup failures; the authentication pipeline converts them
    /// into a generic rejection.
    async fn authorized_keys(&self, username: &str) -> Result<Vec<PublicKey>>;
}

#[async_trait]
impl AuthorizedKeysDb for Box<dyn AuthorizedKeysDb> {
    async fn authorized_keys(&self, username: &str) -> Result<Vec<PublicKey>> {
        (**self).authorized_keys(username).await
    }
}

/// Build the configured key-source backend
pub fn from_config(source: &KeySource) -> Box<dyn AuthorizedKeysDb> {
    match source {
        KeySource::Mapping { files } => {
            Box::new(AuthorizedKeysFilesMapping::new(files.clone()))
        }
        KeySource::System => Box::new(UnixAuthorizedKeys::system()),
    }
}

/// Static mapping of usernames to authorized key file paths
///
/// Unreadable files are logged and skipped; users missing from the mapping
/// simply have no keys.
pub struct AuthorizedKeysFilesMapping {
    files: HashMap<String, Vec<PathBuf>>,
}

impl AuthorizedKeysFilesMapping {
    /// Create a mapping backend
    pub fn new(files: HashMap<String, Vec<PathBuf>>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl AuthorizedKeysDb for AuthorizedKeysFilesMapping {
    async fn authorized_keys(&self, username: &str) -> Result<Vec<PublicKey>> {
        let mut keys = Vec::new();

        for path in self.files.get(username).into_iter().flatten() {
            match fs::read_to_string(path).await {
                Ok(contents) => {
                    keys.extend(read_authorized_keys_file(&contents, parse_key_line));
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable authorized keys file"
                    );
                }
            }
        }

        Ok(keys)
    }
}

/// One OS account record, as much of it as key lookup needs
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Account name
    pub name: String,
    /// Account user id
    pub uid: u32,
    /// Account primary group id
    pub gid: u32,
    /// Home directory
    pub home: PathBuf,
}

/// Access to the OS user account database
///
/// Injectable so tests run against a fake instead of the host's real
/// accounts.
///
/// NIST 800-53: IA-2 (Identification and Authentication)
pub trait UserDb: Send + Sync {
    /// Look a username up; `None` for unknown accounts
    fn lookup(&self, username: &str) -> Option<UserRecord>;
}

/// The host's real account database
pub struct SystemUsers;

impl UserDb for SystemUsers {
    #[cfg(unix)]
    fn lookup(&self, username: &str) -> Option<UserRecord> {
        use std::ffi::{CStr, CString};

        let c_username = CString::new(username).ok()?;

        unsafe {
            let pwd = libc::getpwnam(c_username.as_ptr());
            if pwd.is_null() {
                return None;
            }

            let home = CStr::from_ptr((*pwd).pw_dir).to_string_lossy().into_owned();
            Some(UserRecord {
                name: username.to_string(),
                uid: (*pwd).pw_uid,
                gid: (*pwd).pw_gid,
                home: PathBuf::from(home),
            })
        }
    }

    #[cfg(not(unix))]
    fn lookup(&self, _username: &str) -> Option<UserRecord> {
        None
    }
}

/// Re-read a key file with the target account's privileges
///
/// Given the account's uid, gid and the file path, returns the file
/// contents. Injected by the host when the server drops privileges;
/// without it an unreadable file is simply skipped.
pub type ElevatedRead = Arc<dyn Fn(u32, u32, &Path) -> std::io::Result<String> + Send + Sync>;

/// Keys from `authorized_keys` and `authorized_keys2` in account `.ssh`
/// directories
///
/// NIST 800-53: AC-2 (Account Management), AC-6 (Least Privilege)
pub struct UnixAuthorizedKeys<U = SystemUsers> {
    users: U,
    elevated_read: Option<ElevatedRead>,
}

impl UnixAuthorizedKeys<SystemUsers> {
    /// Backend over the host's real account database
    pub fn system() -> Self {
        Self::new(SystemUsers)
    }
}

impl<U: UserDb> UnixAuthorizedKeys<U> {
    /// Backend over an arbitrary account database
    pub fn new(users: U) -> Self {
        Self {
            users,
            elevated_read: None,
        }
    }

    /// Install a privilege-elevation callback for key files the server
    /// account cannot read
    ///
    /// NIST 800-53: AC-6 (Least Privilege)
    pub fn with_elevated_read(mut self, elevated_read: ElevatedRead) -> Self {
        self.elevated_read = Some(elevated_read);
        self
    }
}

#[async_trait]
impl<U: UserDb> AuthorizedKeysDb for UnixAuthorizedKeys<U> {
    async fn authorized_keys(&self, username: &str) -> Result<Vec<PublicKey>> {
        let Some(user) = self.users.lookup(username) else {
            debug!(user = %username, "unknown account, no authorized keys");
            return Ok(Vec::new());
        };

        let ssh_dir = user.home.join(".ssh");
        let mut keys = Vec::new();

        for file_name in ["authorized_keys", "authorized_keys2"] {
            let path = ssh_dir.join(file_name);

            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => Some(contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => match &self.elevated_read {
                    Some(elevated_read) => match elevated_read(user.uid, user.gid, &path) {
                        Ok(contents) => Some(contents),
                        Err(elevated_err) => {
                            warn!(
                                path = %path.display(),
                                error = %elevated_err,
                                "skipping key file unreadable even with elevation"
                            );
                            None
                        }
                    },
                    None => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping unreadable authorized keys file"
                        );
                        None
                    }
                },
            };

            if let Some(contents) = contents {
                keys.extend(read_authorized_keys_file(&contents, parse_key_line));
            }
        }

        Ok(keys)
    }
}
