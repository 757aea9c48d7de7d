//! Content fingerprints for files and directories.
//!
//! Files are hashed with MD5 over their raw bytes. A directory is hashed by
//! MD5 over a compact JSON object mapping each contained regular file's
//! relative path to its MD5, keys in byte order. Fingerprints recorded by
//! earlier runs are compared by string equality, so this scheme is fixed.
//!
//! Symlinks inside a directory: a link to a regular file is followed once
//! and hashed under the link's own relative path. Links to directories are
//! not descended, and broken links and special files are skipped.

mod json;

use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use json::encode_listing;

/// Read buffer size for streaming file contents into the digest.
const CHUNK_SIZE: usize = 64 * 1024;

/// Errors that can occur while fingerprinting a path.
#[derive(Debug, Error)]
pub enum HashError {
    /// The path does not exist.
    #[error("{0} not found")]
    NotFound(PathBuf),

    /// Reading the path failed.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file inside a directory has a name that is not valid UTF-8.
    #[error("{0} has a non UTF-8 path")]
    NonUtf8Path(PathBuf),

    /// The path is neither a regular file nor a directory.
    #[error("{0} is neither file nor directory")]
    Unsupported(PathBuf),
}

impl HashError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// A content digest and byte size for a file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Lowercase hex MD5.
    pub md5: String,
    /// File length, or the summed length of all hashed files in a directory.
    pub size: u64,
}

/// Fingerprints a file or directory.
///
/// # Errors
///
/// Returns `NotFound` if the path does not exist, and an error if it cannot
/// be read or is neither a file nor a directory.
pub fn fingerprint(path: &Path) -> Result<Fingerprint, HashError> {
    let meta = std::fs::metadata(path).map_err(|e| HashError::io(path, e))?;
    if meta.is_file() {
        hash_file(path)
    } else if meta.is_dir() {
        hash_directory(path)
    } else {
        Err(HashError::Unsupported(path.to_path_buf()))
    }
}

/// Hashes the contents of a single file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<Fingerprint, HashError> {
    let mut file = File::open(path).map_err(|e| HashError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::io(path, e)),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(Fingerprint {
        md5: hex::encode(hasher.finalize()),
        size,
    })
}

/// Hashes a directory tree.
///
/// # Errors
///
/// Returns an error if the tree cannot be listed, a file cannot be read, or a
/// contained path is not valid UTF-8.
pub fn hash_directory(path: &Path) -> Result<Fingerprint, HashError> {
    let mut files = BTreeMap::new();
    collect_files(path, path, &mut files)?;

    let mut listing = BTreeMap::new();
    let mut size = 0u64;
    for (rel, abs) in files {
        let file = hash_file(&abs)?;
        size += file.size;
        listing.insert(rel, file.md5);
    }

    let encoded = encode_listing(&listing);
    let md5 = hex::encode(Md5::digest(encoded.as_bytes()));
    debug!(path = %path.display(), files = listing.len(), size, md5 = %md5, "Hashed directory");

    Ok(Fingerprint { md5, size })
}

/// Collects `relative path -> absolute path` for every regular file under `dir`.
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, PathBuf>,
) -> Result<(), HashError> {
    let entries = std::fs::read_dir(dir).map_err(|e| HashError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HashError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| HashError::io(&path, e))?;

        let is_file = if file_type.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        } else if file_type.is_symlink() {
            std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false)
        } else {
            file_type.is_file()
        };

        if is_file {
            out.insert(relative_key(root, &path)?, path);
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> Result<String, HashError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| HashError::NonUtf8Path(path.to_path_buf()))?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| HashError::NonUtf8Path(path.to_path_buf()))?;
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "sub/b.txt", b"world\n");
        let bytes: Vec<u8> = (0..=255).collect();
        write(dir.path(), "sub/deeper/c.bin", &bytes);
        dir
    }

    #[test]
    fn test_hash_file_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "hello.txt", b"hello");

        let fp = fingerprint(&dir.path().join("hello.txt")).unwrap();
        assert_eq!(fp.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(fp.size, 5);
    }

    #[test]
    fn test_hash_file_spanning_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        write(dir.path(), "big.bin", &data);

        let fp = hash_file(&dir.path().join("big.bin")).unwrap();
        assert_eq!(fp.md5, hex::encode(Md5::digest(&data)));
        assert_eq!(fp.size, data.len() as u64);
    }

    /// Digests produced by the reference engine for the same tree.
    #[test]
    fn test_directory_digest_conformance() {
        let dir = fixture_tree();
        let fp = fingerprint(dir.path()).unwrap();
        assert_eq!(fp.md5, "209b106933b43e23defa26d17ed3bc37");
        assert_eq!(fp.size, 5 + 6 + 256);
    }

    #[test]
    fn test_directory_digest_non_ascii_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "caf\u{e9}.txt", b"x");
        write(dir.path(), "z\u{1F600}.txt", b"y");

        let fp = fingerprint(dir.path()).unwrap();
        assert_eq!(fp.md5, "9b9cd93982ac11eebe48f6e296ae5936");
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fp = fingerprint(dir.path()).unwrap();
        assert_eq!(fp.md5, "99914b932bd37a50b983c5e7c90ae93b");
        assert_eq!(fp.size, 0);
    }

    #[test]
    fn test_directory_hash_deterministic_and_sensitive() {
        let dir = fixture_tree();
        let first = fingerprint(dir.path()).unwrap();

        // Rewriting identical content is a no-op for the digest.
        write(dir.path(), "sub/b.txt", b"world\n");
        assert_eq!(fingerprint(dir.path()).unwrap(), first);

        write(dir.path(), "sub/b.txt", b"world!");
        assert_ne!(fingerprint(dir.path()).unwrap().md5, first.md5);
    }

    #[test]
    fn test_directory_hash_sees_renames() {
        let dir = fixture_tree();
        let before = fingerprint(dir.path()).unwrap();
        fs::rename(dir.path().join("a.txt"), dir.path().join("a2.txt")).unwrap();
        assert_ne!(fingerprint(dir.path()).unwrap().md5, before.md5);
    }

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = fingerprint(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, HashError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_policy() {
        let dir = fixture_tree();
        let plain = fingerprint(dir.path()).unwrap();

        // A dangling link and a link to a directory contribute nothing.
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("sub-link")).unwrap();
        assert_eq!(fingerprint(dir.path()).unwrap(), plain);

        // A link to a file is hashed like a copy under the link's name.
        std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("a-link.txt")).unwrap();
        let linked = fingerprint(dir.path()).unwrap();

        let copy = fixture_tree();
        write(copy.path(), "a-link.txt", b"hello");
        assert_eq!(linked, fingerprint(copy.path()).unwrap());
    }
}
