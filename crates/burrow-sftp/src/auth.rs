//! SSH public key authentication pipeline
//!
//! NIST 800-53: IA-2 (Identification and Authentication), AC-3 (Access
//! Enforcement)
//! STIG: V-222611 - The application must validate certificates
//! Implementation: Three-stage verification of a signed publickey login
//! attempt - sanity-check the credentials, look the key up in a pluggable
//! backend, verify the signature cryptographically
//!
//! The stages run strictly in order and every backend failure collapses
//! into the same "unauthorized" outcome, so a remote client can never
//! learn why an attempt was rejected.

use crate::keydb::AuthorizedKeysDb;
use russh_keys::key::{self, PublicKey};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One publickey login attempt, as handed over by the SSH layer
///
/// Created per attempt and consumed synchronously; nothing is retained
/// after the pipeline answers.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    /// Claimed username
    pub username: String,
    /// SSH wire encoding of the offered public key
    pub key_blob: Vec<u8>,
    /// Signature over `sig_data`, absent during the first (probe) phase of
    /// the publickey method
    pub signature: Option<Vec<u8>>,
    /// The exact bytes the client signed
    pub sig_data: Vec<u8>,
}

impl SshCredentials {
    /// Credentials for a signed attempt
    pub fn new(
        username: impl Into<String>,
        key_blob: Vec<u8>,
        signature: Option<Vec<u8>>,
        sig_data: Vec<u8>,
    ) -> Self {
        Self {
            username: username.into(),
            key_blob,
            signature,
            sig_data,
        }
    }
}

/// Authentication pipeline outcomes other than success
///
/// NIST 800-53: SI-11 (Error Handling), IA-2
/// STIG: V-222566
/// Implementation: Coarse on purpose - an unknown key and a failed
/// signature check surface as the same rejection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The key may be acceptable but the attempt carried no signature;
    /// part of the normal two-phase publickey flow, the client is expected
    /// to retry with proof of possession
    #[error("public key accepted, signature required")]
    SignatureRequired,

    /// The offered key blob could not be parsed
    #[error("malformed public key: {0}")]
    BadKey(String),

    /// Catch-all rejection
    #[error("unauthorized")]
    Unauthorized,
}

/// Checker that authenticates publickey credentials against a key source
///
/// NIST 800-53: IA-2 (Identification and Authentication)
/// STIG: V-222611, V-222578
pub struct SshPublicKeyChecker<D> {
    keydb: D,
}

impl<D: AuthorizedKeysDb> SshPublicKeyChecker<D> {
    /// Create a checker over a key-source backend
    pub fn new(keydb: D) -> Self {
        Self { keydb }
    }

    /// Run one login attempt through the pipeline
    ///
    /// Returns the authenticated username on success. The key lookup may
    /// block on disk, so the whole pipeline is a suspension point for the
    /// host.
    ///
    /// # Errors
    ///
    /// [`AuthFailure::SignatureRequired`] when the attempt carries no
    /// signature, [`AuthFailure::BadKey`] when the key blob is malformed,
    /// [`AuthFailure::Unauthorized`] for everything else.
    pub async fn request_authentication(
        &self,
        credentials: &SshCredentials,
    ) -> std::result::Result<String, AuthFailure> {
        // Stage 1: sanity. The first phase of the publickey method asks
        // whether the key would be acceptable without proving possession.
        let Some(signature) = credentials.signature.as_deref() else {
            debug!(user = %credentials.username, "publickey probe without signature");
            return Err(AuthFailure::SignatureRequired);
        };

        let key = key::parse_public_key(&credentials.key_blob, None).map_err(|e| {
            debug!(user = %credentials.username, "rejecting unparsable key blob");
            AuthFailure::BadKey(e.to_string())
        })?;

        // Stage 2: authorization. Backend errors are logged for the
        // operator and presented as a plain rejection.
        let authorized = match self.keydb.authorized_keys(&credentials.username).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    user = %credentials.username,
                    error = %e,
                    "authorized key lookup failed"
                );
                return Err(AuthFailure::Unauthorized);
            }
        };

        let fingerprint = key.fingerprint();
        if !authorized.iter().any(|k| k.fingerprint() == fingerprint) {
            warn!(user = %credentials.username, "public key not authorized");
            return Err(AuthFailure::Unauthorized);
        }

        // Stage 3: verification. A malformed or mismatched signature is a
        // failed login, indistinguishable from an unknown key.
        if !key.verify_detached(&credentials.sig_data, signature) {
            warn!(user = %credentials.username, "signature verification failed");
            return Err(AuthFailure::Unauthorized);
        }

        info!(user = %credentials.username, "publickey authentication succeeded");
        Ok(credentials.username.clone())
    }
}

/// Parse the keys out of an authorized_keys style document
///
/// Iterates lines, strips whitespace, skips blanks and `#` comments, and
/// hands the rest to `parse`. Lines the parser rejects are skipped, never
/// fatal to the read.
///
/// NIST 800-53: SI-10 (Information Input Validation)
pub fn read_authorized_keys_file<K, P>(contents: &str, parse: P) -> Vec<K>
where
    P: Fn(&str) -> crate::Result<K>,
{
    let mut keys = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse(trimmed) {
            Ok(key) => keys.push(key),
            Err(e) => {
                debug!(line = index + 1, error = %e, "skipping unparsable key line");
            }
        }
    }

    keys
}

/// Parse a single `<type> <base64-key> [comment]` authorized_keys line
///
/// # Errors
///
/// Fails when the line has fewer than two fields or the key data does not
/// decode as a public key.
pub fn parse_key_line(line: &str) -> crate::Result<PublicKey> {
    let mut parts = line.split_whitespace();
    let (Some(_key_type), Some(key_data)) = (parts.next(), parts.next()) else {
        return Err(crate::Error::Config(
            "invalid key format: expected at least <type> <key>".into(),
        ));
    };

    russh_keys::parse_public_key_base64(key_data)
        .map_err(|e| crate::Error::Config(format!("failed to parse public key: {e}")))
}
