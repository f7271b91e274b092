//! Error types for chrooted SFTP operations
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - Error messages must provide information necessary for
//! corrective actions without revealing information that could be exploited
//! Implementation: Operation-specific failures that never carry resolved
//! host paths, only the client-supplied path strings

use crate::auth::AuthFailure;
use thiserror::Error;

/// Result type alias for chrooted SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Chrooted SFTP error types
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error with no more specific classification
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File or directory does not exist
    #[error("{0} does not exist")]
    NotFound(String),

    /// Target path already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Operation requires a plain directory
    ///
    /// Also raised for symlinks that merely point at directories, so a
    /// directory-shaped link can never be treated as a real directory.
    #[error("{0} is not a directory")]
    NotADirectory(String),

    /// Operation requires a file or link, but found a directory
    #[error("{0} is a directory")]
    IsADirectory(String),

    /// Directory removal requires an empty directory
    #[error("{0} is not empty")]
    DirectoryNotEmpty(String),

    /// Operation requires a symbolic link with an in-root target
    #[error("{0} is not a link")]
    NotALink(String),

    /// Open flags carried neither read nor write access
    #[error("invalid open flags: {0}")]
    InvalidFlags(String),

    /// Path validation failure (invalid characters, malformed input)
    ///
    /// NIST 800-53: SI-10 (Input Validation)
    /// STIG: V-222396
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A resolved path fell outside the confinement root
    ///
    /// This is a defensive, internal-consistency error: lexical resolution
    /// guarantees confinement by construction, so observing this variant
    /// means the engine itself is broken.
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    #[error("confinement violation: {0}")]
    Confinement(String),

    /// Access control violation
    ///
    /// NIST 800-53: AC-3 (Access Enforcement), SI-11
    /// STIG: V-222596, V-222566
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Unsupported SFTP operation or feature
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication pipeline failure
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication), SI-11
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthFailure),
}

impl Error {
    /// Check if error was caused by client input rather than server state
    ///
    /// NIST 800-53: SI-10 (Input Validation), SI-11
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::AlreadyExists(_)
                | Error::NotADirectory(_)
                | Error::IsADirectory(_)
                | Error::DirectoryNotEmpty(_)
                | Error::NotALink(_)
                | Error::InvalidFlags(_)
                | Error::InvalidPath(_)
                | Error::PermissionDenied(_)
                | Error::NotSupported(_)
        )
    }

    /// Check if error is security-relevant and should be audited
    ///
    /// NIST 800-53: AU-2 (Audit Events), SI-11
    /// STIG: V-222566
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Error::Confinement(_)
                | Error::InvalidPath(_)
                | Error::PermissionDenied(_)
                | Error::Auth(_)
        )
    }

    /// Get error code for an SFTP STATUS message
    ///
    /// NIST 800-53: SI-11
    /// Implementation: Maps errors to RFC-compliant status codes
    pub fn to_status_code(&self) -> u32 {
        use crate::protocol::StatusCode;

        match self {
            Error::NotFound(_) => StatusCode::NoSuchFile as u32,
            Error::PermissionDenied(_) | Error::Auth(_) => StatusCode::PermissionDenied as u32,
            Error::InvalidFlags(_) | Error::InvalidPath(_) => StatusCode::BadMessage as u32,
            Error::NotSupported(_) => StatusCode::OpUnsupported as u32,
            _ => StatusCode::Failure as u32,
        }
    }

    /// Get sanitized error message for the remote client
    ///
    /// NIST 800-53: SI-11 (Error Handling)
    /// STIG: V-222566
    /// Implementation: Strips detail from errors whose cause must stay
    /// operator-only
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::Auth(_) => "Authentication failed".to_string(),
            Error::PermissionDenied(_) => "Permission denied".to_string(),
            Error::InvalidPath(_) | Error::Confinement(_) => "Invalid path".to_string(),
            Error::Config(_) => "Server configuration error".to_string(),
            // Remaining variants only ever name client-supplied paths
            _ => self.to_string(),
        }
    }
}

impl From<russh_keys::Error> for Error {
    fn from(err: russh_keys::Error) -> Self {
        Error::Config(format!("SSH key error: {err}"))
    }
}
