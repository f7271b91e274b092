//! Full-flow integration test: authenticate, obtain an avatar, operate
//! inside the confined view
//!
//! The key fixture was generated with `ssh-keygen -t ed25519`; the
//! signature constant is that key's raw ed25519 signature over the session
//! bytes below.

use async_trait::async_trait;
use burrow_sftp::auth::{SshCredentials, SshPublicKeyChecker, parse_key_line};
use burrow_sftp::keydb::AuthorizedKeysDb;
use burrow_sftp::protocol::OpenFlags;
use burrow_sftp::realm::ChrootedSshRealm;
use burrow_sftp::server::{ChrootedSftpServer, SftpFile, SftpServer};
use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use tempfile::TempDir;

const ALICE_PUBLIC: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMQCeTFht0qT6cUS8OX5wgM3T6mai4vWVGmKozpdyWO2 alice@burrow-test";

const SESSION_DATA: &[u8] = b"exchange hash and request bytes";

/// Alice's signature over `SESSION_DATA`
const ALICE_SIG: &str = "6bf0a9bcc9031a8fa9bc8ca2da8f0c73f8abbed66e9ee5c59dfdafb99709f51c90efcf3c3ff95a7592cd4739f453f2622e4b58e2aa8203d92c39c427202b5603";

struct SingleUserKeys(PublicKey);

#[async_trait]
impl AuthorizedKeysDb for SingleUserKeys {
    async fn authorized_keys(&self, username: &str) -> burrow_sftp::Result<Vec<PublicKey>> {
        if username == "alice" {
            Ok(vec![self.0.clone()])
        } else {
            Ok(Vec::new())
        }
    }
}

#[tokio::test]
async fn test_login_then_upload_then_list() {
    let root = TempDir::new().unwrap();

    // Authenticate a signed publickey attempt
    let key = parse_key_line(ALICE_PUBLIC).unwrap();
    let checker = SshPublicKeyChecker::new(SingleUserKeys(parse_key_line(ALICE_PUBLIC).unwrap()));

    let credentials = SshCredentials::new(
        "alice",
        key.public_key_bytes(),
        Some(hex::decode(ALICE_SIG).unwrap()),
        SESSION_DATA.to_vec(),
    );
    let username = checker.request_authentication(&credentials).await.unwrap();
    assert_eq!(username, "alice");

    // The realm turns the identity into a confined session
    let realm = ChrootedSshRealm::new(root.path());
    let avatar = realm.request_avatar(&username);
    let server = ChrootedSftpServer::new(&avatar).unwrap();

    // Upload a file and read the directory back
    let mut file = server
        .open_file(
            "/uploads.txt",
            OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT),
        )
        .await
        .unwrap();
    file.write_chunk(0, b"first transfer").await.unwrap();
    file.close().await.unwrap();

    let attrs = server.get_attrs("/uploads.txt", true).await.unwrap();
    assert_eq!(attrs.size, Some(14));

    let mut listing = server.open_directory("/").await.unwrap();
    let entry = listing.next_entry().await.unwrap().unwrap();
    assert_eq!(entry.name, "uploads.txt");
    assert!(listing.next_entry().await.unwrap().is_none());

    // And nothing above the root is reachable
    assert_eq!(server.real_path("/../../..").await.unwrap(), "/");
}
