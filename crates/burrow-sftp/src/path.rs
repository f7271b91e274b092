//! Path confinement engine
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation)
//! STIG: V-222396 - Input validation, V-222596 - Authorization enforcement
//! Implementation: Resolves untrusted client path strings against a fixed
//! root without ever following symlinks during resolution, so no request
//! can name a location outside the root
//!
//! Resolution is purely lexical: `..` segments are clamped at the root and
//! descent never consults the filesystem. Symlinks are dealt with after the
//! fact by classifying each resolved path as not-a-link, a link whose real
//! target stays inside the root (transparent to clients), or a link whose
//! real target escapes it (opaque - presented as a plain file or directory,
//! target never disclosed).

use crate::error::{Error, Result};
use crate::protocol::FileAttrs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Classification of a resolved path with respect to the confinement root
///
/// NIST 800-53: AC-3 (Access Enforcement)
/// Implementation: Drives the transparent/opaque symlink policy applied by
/// every operation that follows links
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClass {
    /// Not a symbolic link (or does not exist)
    NotALink,
    /// A symlink whose fully resolved target lies under the root; carries
    /// the resolved target. Shown to clients as the target itself.
    Inside(PathBuf),
    /// A symlink whose target lies outside the root (or cannot be resolved
    /// at all). Shown to clients as a plain file or directory.
    Outside,
}

impl LinkClass {
    /// The path is a symbolic link of either class
    pub fn is_link(&self) -> bool {
        !matches!(self, LinkClass::NotALink)
    }
}

/// A confinement root and the resolution rules bound to it
///
/// The root is canonicalized once at construction; every prefix comparison
/// afterwards uses that canonical form so a symlinked root path does not
/// misclassify its own children.
#[derive(Debug, Clone)]
pub struct Chroot {
    root: PathBuf,
}

impl Chroot {
    /// Create a confinement root
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Config`] if the root is not an absolute path to
    /// an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(Error::Config(format!(
                "confinement root must be absolute: {}",
                root.display()
            )));
        }

        let root = std::fs::canonicalize(root)
            .map_err(|e| Error::Config(format!("confinement root {}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "confinement root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// The canonical confinement root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path string to a confined location
    ///
    /// Purely lexical; never touches the filesystem and never fails, so it
    /// is usable for paths that do not exist yet. Empty segments, `.`, and
    /// `..` while already at the root are no-ops; `..` elsewhere ascends
    /// one level; any other segment descends.
    ///
    /// NIST 800-53: SI-10 (Input Validation), AC-3 (Access Enforcement)
    /// STIG: V-222396, V-222596
    pub fn resolve(&self, path: &str) -> ConfinedPath {
        let mut resolved = self.root.clone();

        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    // Cannot ascend past the root
                    if resolved != self.root {
                        resolved.pop();
                    }
                }
                _ => resolved.push(segment),
            }
        }

        debug_assert!(resolved.starts_with(&self.root));
        ConfinedPath::new(resolved)
    }

    /// Express a confined path relative to the root
    ///
    /// Returns `"/"` for the root itself, otherwise `"/"` followed by the
    /// slash-joined segments from the root down.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Confinement`] if the path does not lie under the
    /// root. [`Chroot::resolve`] guarantees that cannot happen; the check is
    /// defensive only.
    pub fn relativize(&self, path: &ConfinedPath) -> Result<String> {
        self.relativize_real(path.as_path())
    }

    fn relativize_real(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            warn!(
                path = %path.display(),
                "path escaped the confinement root"
            );
            Error::Confinement(format!("{} is outside the root", path.display()))
        })?;

        if relative.as_os_str().is_empty() {
            return Ok("/".to_string());
        }

        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Classify a resolved path's relationship to the root
    ///
    /// A symlink is transparent only when its fully resolved target still
    /// lies under the root. Links that cannot be resolved (broken, looping)
    /// classify as outside: fail closed.
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    pub async fn classify(&self, path: &ConfinedPath) -> LinkClass {
        let metadata = match fs::symlink_metadata(path.as_path()).await {
            Ok(metadata) => metadata,
            Err(_) => return LinkClass::NotALink,
        };
        if !metadata.file_type().is_symlink() {
            return LinkClass::NotALink;
        }

        match fs::canonicalize(path.as_path()).await {
            Ok(real) if real.starts_with(&self.root) => LinkClass::Inside(real),
            Ok(_) | Err(_) => LinkClass::Outside,
        }
    }

    /// Resolve a client path to its canonical root-relative form
    ///
    /// Transparent links resolve to their target's root-relative path.
    /// Opaque links and ordinary paths answer with their own root-relative
    /// path: resolution never proceeds past the root boundary, so nothing
    /// about the outside filesystem is disclosed, not even the shape of a
    /// link target.
    pub async fn real_path(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path);
        match self.classify(&resolved).await {
            LinkClass::Inside(real) => self.relativize_real(&real),
            LinkClass::NotALink | LinkClass::Outside => self.relativize(&resolved),
        }
    }
}

/// A filesystem location guaranteed to lie under a confinement root
///
/// Carries a stat cache that is refreshed only on explicit [`restat`]
/// calls, along with the follow-links choice of the last refresh.
///
/// [`restat`]: ConfinedPath::restat
#[derive(Debug, Clone)]
pub struct ConfinedPath {
    path: PathBuf,
    stat: Option<FileAttrs>,
    stat_followed_link: bool,
}

impl PartialEq for ConfinedPath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ConfinedPath {}

impl ConfinedPath {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            stat: None,
            stat_followed_link: false,
        }
    }

    /// The absolute on-disk path
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Final path segment, or `/` for the root itself
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "/".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Refresh the stat cache
    ///
    /// Follows the symlink or stats the link itself per `follow_links`.
    /// The cache is never refreshed implicitly.
    ///
    /// # Errors
    ///
    /// Propagates the underlying stat error; the cache is cleared on
    /// failure.
    pub async fn restat(&mut self, follow_links: bool) -> std::io::Result<FileAttrs> {
        self.stat = None;
        self.stat_followed_link = follow_links;

        let metadata = if follow_links {
            fs::metadata(&self.path).await?
        } else {
            fs::symlink_metadata(&self.path).await?
        };

        let attrs = FileAttrs::from_metadata(&metadata);
        self.stat = Some(attrs);
        Ok(attrs)
    }

    /// Attributes from the last successful [`restat`](ConfinedPath::restat)
    pub fn cached_attrs(&self) -> Option<FileAttrs> {
        self.stat
    }

    /// Whether the cached stat followed symlinks
    pub fn stat_followed_link(&self) -> bool {
        self.stat_followed_link
    }

    /// The path names something (following links; a broken link does not
    /// "exist" in this sense)
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// The path names something or is a symlink, broken links included
    pub async fn exists_or_is_link(&self) -> bool {
        fs::symlink_metadata(&self.path).await.is_ok()
    }

    /// The path is a symbolic link of any kind
    pub async fn is_link(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// The path is a directory (following links)
    pub async fn is_dir(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chroot_in(dir: &TempDir) -> Chroot {
        Chroot::new(dir.path()).unwrap()
    }

    #[test]
    fn test_resolve_never_escapes_root() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        for hostile in [
            "../../../etc/passwd",
            "/.//../",
            "../..",
            "a/../../../b",
            "/..",
            "..",
            "....//../../..",
        ] {
            let resolved = chroot.resolve(hostile);
            assert!(
                resolved.as_path().starts_with(chroot.root()),
                "{hostile} escaped to {}",
                resolved.as_path().display()
            );
        }
    }

    #[test]
    fn test_resolve_root_aliases() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        let root = chroot.resolve(".");
        assert_eq!(root.as_path(), chroot.root());
        assert_eq!(chroot.resolve("../"), root);
        assert_eq!(chroot.resolve("/.//../"), root);
        assert_eq!(chroot.resolve(""), root);
        assert_eq!(chroot.resolve("/"), root);
    }

    #[test]
    fn test_resolve_parent_stops_at_root() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        assert_eq!(
            chroot.resolve("a/../../../b").as_path(),
            chroot.root().join("b")
        );
        assert_eq!(
            chroot.resolve("a/b/../c").as_path(),
            chroot.root().join("a").join("c")
        );
    }

    #[test]
    fn test_relativize_root_is_slash() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        let root = chroot.resolve("/");
        assert_eq!(chroot.relativize(&root).unwrap(), "/");
    }

    #[test]
    fn test_resolve_relativize_round_trip() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        for path in ["/a", "/a/b/c", "/deeply/nested/name.txt"] {
            let resolved = chroot.resolve(path);
            let relative = chroot.relativize(&resolved).unwrap();
            assert_eq!(relative, path);
            assert_eq!(chroot.resolve(&relative), resolved);
        }

        let root = chroot.resolve("/");
        assert_eq!(chroot.relativize(&root).unwrap(), "/");
        assert_eq!(chroot.resolve("/"), root);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_classify_plain_file() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);
        tokio::fs::write(chroot.root().join("plain"), b"data")
            .await
            .unwrap();

        let plain = chroot.resolve("plain");
        assert_eq!(chroot.classify(&plain).await, LinkClass::NotALink);

        let missing = chroot.resolve("missing");
        assert_eq!(chroot.classify(&missing).await, LinkClass::NotALink);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_classify_inside_link() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);
        tokio::fs::write(chroot.root().join("target"), b"data")
            .await
            .unwrap();
        tokio::fs::symlink(chroot.root().join("target"), chroot.root().join("link"))
            .await
            .unwrap();

        let link = chroot.resolve("link");
        assert_eq!(
            chroot.classify(&link).await,
            LinkClass::Inside(chroot.root().join("target"))
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_classify_outside_link() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);
        tokio::fs::symlink(outside.path(), chroot.root().join("leak"))
            .await
            .unwrap();

        let leak = chroot.resolve("leak");
        assert_eq!(chroot.classify(&leak).await, LinkClass::Outside);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_classify_broken_link_fails_closed() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);
        tokio::fs::symlink(chroot.root().join("gone"), chroot.root().join("dangling"))
            .await
            .unwrap();

        let dangling = chroot.resolve("dangling");
        assert_eq!(chroot.classify(&dangling).await, LinkClass::Outside);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_real_path_follows_inside_links_only() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);

        tokio::fs::create_dir(chroot.root().join("sub")).await.unwrap();
        tokio::fs::write(chroot.root().join("sub").join("target"), b"x")
            .await
            .unwrap();
        tokio::fs::symlink(
            chroot.root().join("sub").join("target"),
            chroot.root().join("alias"),
        )
        .await
        .unwrap();
        tokio::fs::symlink(outside.path(), chroot.root().join("leak"))
            .await
            .unwrap();

        assert_eq!(chroot.real_path("alias").await.unwrap(), "/sub/target");
        // Opaque links answer with their own path, not the target's
        assert_eq!(chroot.real_path("leak").await.unwrap(), "/leak");
        assert_eq!(chroot.real_path("sub/target").await.unwrap(), "/sub/target");
        assert_eq!(chroot.real_path("..").await.unwrap(), "/");
    }

    #[tokio::test]
    async fn test_restat_cache_is_explicit() {
        let dir = TempDir::new().unwrap();
        let chroot = chroot_in(&dir);
        tokio::fs::write(chroot.root().join("f"), b"12345")
            .await
            .unwrap();

        let mut file = chroot.resolve("f");
        assert!(file.cached_attrs().is_none());

        let attrs = file.restat(true).await.unwrap();
        assert_eq!(attrs.size, Some(5));
        assert_eq!(file.cached_attrs(), Some(attrs));
        assert!(file.stat_followed_link());

        // Growing the file is not observed until the next restat
        tokio::fs::write(chroot.root().join("f"), b"1234567890")
            .await
            .unwrap();
        assert_eq!(file.cached_attrs().unwrap().size, Some(5));
        let attrs = file.restat(false).await.unwrap();
        assert_eq!(attrs.size, Some(10));
        assert!(!file.stat_followed_link());
    }
}
