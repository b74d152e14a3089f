//! Content-addressed extraction of prebuilds and assets.
//!
//! Native binaries (prebuilds) and non-code assets referenced by the module
//! graph are materialized onto a real filesystem. Prebuilds are stored under
//! a name derived from their content hash, so two builds referencing
//! identical bytes converge to one cached file and re-extracting unchanged
//! native code is a no-op. Assets mirror their drive key under an assets
//! root.
//!
//! # Atomic writes
//!
//! All writes go through a temp-file-then-rename protocol. Temp names embed
//! the process id and a per-extractor counter, so they are unique across
//! processes sharing one output directory; a single in-process lock
//! serializes the write critical section within one extractor. A lost rename
//! race against another process is resolved by re-checking the destination,
//! which is correct because content-addressed naming makes any winner's
//! result equivalent.

use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::drive::{ByteStream, Drive};
use crate::keys;

/// Default output subdirectory for extracted prebuilds.
pub const PREBUILDS_DIR: &str = "prebuilds";

/// Default output subdirectory for extracted assets.
pub const ASSETS_DIR: &str = "assets";

/// Literal token standing in for the host in portable prebuild references.
pub const HOST_TEMPLATE: &str = "{host}";

/// Errors raised by extraction writes.
///
/// Not-found and malformed-key conditions never surface here; they degrade
/// to "no mapping" before an error is constructed.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Filesystem or drive I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A rename failed and the destination still does not exist, so the
    /// extracted file was lost.
    #[error("destination missing after failed rename to {}: {source}", path.display())]
    RenameLost {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings for an [`Extractor`], derived from the bundle configuration.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Directory prebuilds are written under (host subdirectory appended).
    pub prebuilds_dir: PathBuf,
    /// Directory assets are mirrored under.
    pub assets_dir: PathBuf,
    /// Target platform-architecture identifier.
    pub host: String,
    /// Emit the `{host}` template token instead of the concrete host.
    pub portable: bool,
    /// Emit `file://` references for prebuilds instead of portable placeholders.
    pub absolute_prebuilds: bool,
    /// Emit `file://` references for assets instead of portable placeholders.
    pub absolute_files: bool,
}

/// Materializes binary content referenced by the graph onto disk,
/// deduplicated by content.
pub struct Extractor {
    drive: Arc<dyn Drive>,
    options: ExtractOptions,
    /// Serializes the write-and-rename critical section for this instance.
    write_lock: Mutex<()>,
    /// Monotonic suffix for temp file names.
    tmp_seq: AtomicU64,
}

impl Extractor {
    /// Create an extractor reading from `drive` and writing per `options`.
    pub fn new(drive: Arc<dyn Drive>, options: ExtractOptions) -> Self {
        Self {
            drive,
            options,
            write_lock: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Hex-encoded SHA-256 digest of `buf`.
    pub fn hash(buf: &[u8]) -> String {
        hex::encode(Sha256::digest(buf))
    }

    /// Extract the prebuild stored under `key`.
    ///
    /// Returns `Ok(None)` when the key does not match the expected binary
    /// naming pattern or the drive has no entry for it; both mean "no
    /// mapping produced" rather than failure. The returned reference is
    /// either a `file://` URL (absolute mode) or the portable placeholder
    /// `/../prebuilds/<host>/<hash><ext>`.
    pub async fn extract_prebuild(&self, key: &str) -> Result<Option<String>, ExtractError> {
        let Some(ext) = prebuild_extension(key) else {
            tracing::debug!(key, "prebuild key does not match /{{name}}.(node|bare), skipping");
            return Ok(None);
        };

        let Some(buf) = self.drive.get(key).await? else {
            tracing::debug!(key, "prebuild not found in drive, skipping");
            return Ok(None);
        };

        let name = format!("{}{}", Self::hash(&buf), ext);
        let dest = self.options.prebuilds_dir.join(&self.options.host).join(&name);

        let reference = if self.options.absolute_prebuilds {
            keys::file_url(&dest)
        } else {
            let host = if self.options.portable {
                HOST_TEMPLATE
            } else {
                self.options.host.as_str()
            };
            format!("/../{}/{}/{}", PREBUILDS_DIR, host, name)
        };

        self.write_buffer(&dest, &buf).await?;

        tracing::debug!(key, reference = %reference, "extracted prebuild");
        Ok(Some(reference))
    }

    /// Extract the asset stored under `key`, mirroring its path under the
    /// assets root.
    ///
    /// Any failure (missing entry, I/O error, key escaping the assets root)
    /// degrades to `None`; asset extraction is never fatal to the
    /// surrounding bundle.
    pub async fn extract_asset(&self, key: &str) -> Option<String> {
        match self.try_extract_asset(key).await {
            Ok(reference) => reference,
            Err(err) => {
                tracing::warn!(key, error = %err, "asset extraction failed, leaving specifier unresolved");
                None
            }
        }
    }

    async fn try_extract_asset(&self, key: &str) -> Result<Option<String>, ExtractError> {
        // A mirrored path must stay inside the assets root.
        if key.split('/').any(|segment| segment == "..") {
            tracing::debug!(key, "asset key escapes the assets root, skipping");
            return Ok(None);
        }

        let Some(entry) = self.drive.entry(key).await? else {
            tracing::debug!(key, "asset not found in drive, skipping");
            return Ok(None);
        };

        let stream = self.drive.create_read_stream(&entry).await?;
        let dest = self.options.assets_dir.join(key.trim_start_matches('/'));

        let reference = if self.options.absolute_files {
            keys::file_url(&dest)
        } else if key.starts_with('/') {
            format!("/../{}{}", ASSETS_DIR, key)
        } else {
            format!("/../{}/{}", ASSETS_DIR, key)
        };

        self.write_stream(&dest, stream).await?;

        tracing::debug!(key, reference = %reference, "extracted asset");
        Ok(Some(reference))
    }

    /// Write `buf` to `dest` atomically, skipping the write entirely when the
    /// destination already exists (content-addressed names guarantee the
    /// existing file is identical).
    async fn write_buffer(&self, dest: &Path, buf: &[u8]) -> Result<(), ExtractError> {
        // Racy against other processes, which is fine: any winner wrote the
        // same bytes under the same name.
        if fs::metadata(dest).await.is_ok() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(parent_of(dest)).await?;
        let tmp = self.tmp_path(dest);

        let filled: Result<(), ExtractError> = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(buf).await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = filled {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }

        self.commit(&tmp, dest).await
    }

    /// Stream `source` into `dest` atomically. Unlike prebuilds, asset names
    /// are not content-derived, so an existing destination is rewritten
    /// rather than trusted.
    async fn write_stream(&self, dest: &Path, mut source: ByteStream) -> Result<(), ExtractError> {
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(parent_of(dest)).await?;
        let tmp = self.tmp_path(dest);

        let filled: Result<(), ExtractError> = async {
            let mut file = fs::File::create(&tmp).await?;
            while let Some(chunk) = source.try_next().await? {
                file.write_all(&chunk).await?;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = filled {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }

        self.commit(&tmp, dest).await
    }

    /// Rename `tmp` onto `dest`, tolerating a lost race against another
    /// process: if the rename fails but the destination now exists, the
    /// other writer's identical file stands and the temp file is discarded.
    async fn commit(&self, tmp: &Path, dest: &Path) -> Result<(), ExtractError> {
        match fs::rename(tmp, dest).await {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                let exists = fs::metadata(dest).await.is_ok();
                let _ = fs::remove_file(tmp).await;

                if exists {
                    Ok(())
                } else {
                    Err(ExtractError::RenameLost {
                        path: dest.to_path_buf(),
                        source: rename_err,
                    })
                }
            }
        }
    }

    /// Sibling temp path for `dest`, unique across processes and across
    /// tasks within this extractor.
    fn tmp_path(&self, dest: &Path) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        dest.with_file_name(format!("{}.{}.{}.tmp", name, process::id(), seq))
    }
}

/// Recognized binary suffix of a prebuild key, or `None` when the key does
/// not match the `/{name}[@version].(node|bare)` pattern.
fn prebuild_extension(key: &str) -> Option<&'static str> {
    let ext = if key.ends_with(".node") {
        ".node"
    } else if key.ends_with(".bare") {
        ".bare"
    } else {
        return None;
    };

    let stem = &key[..key.len() - ext.len()];
    let (_, segment) = stem.rsplit_once('/')?;
    let name = segment.split('@').next().unwrap_or("");

    if name.is_empty() {
        return None;
    }

    Some(ext)
}

fn parent_of(dest: &Path) -> &Path {
    dest.parent().unwrap_or_else(|| Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::MemoryDrive;
    use tempfile::TempDir;

    fn extractor_at(temp: &TempDir, drive: MemoryDrive) -> Extractor {
        extractor_with(temp, drive, false, false, false)
    }

    fn extractor_with(
        temp: &TempDir,
        drive: MemoryDrive,
        portable: bool,
        absolute_prebuilds: bool,
        absolute_files: bool,
    ) -> Extractor {
        Extractor::new(
            Arc::new(drive),
            ExtractOptions {
                prebuilds_dir: temp.path().join(PREBUILDS_DIR),
                assets_dir: temp.path().join(ASSETS_DIR),
                host: "linux-x86_64".to_string(),
                portable,
                absolute_prebuilds,
                absolute_files,
            },
        )
    }

    fn prebuild_files(temp: &TempDir) -> Vec<String> {
        let dir = temp.path().join(PREBUILDS_DIR).join("linux-x86_64");
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn test_prebuild_extension_matches_binary_keys() {
        assert_eq!(prebuild_extension("/pkg/native.node"), Some(".node"));
        assert_eq!(prebuild_extension("/pkg/native@1.2.3.bare"), Some(".bare"));
    }

    #[test]
    fn test_prebuild_extension_rejects_malformed_keys() {
        assert_eq!(prebuild_extension("/pkg/native.so"), None);
        assert_eq!(prebuild_extension("native.node"), None);
        assert_eq!(prebuild_extension("/pkg/@1.0.node"), None);
        assert_eq!(prebuild_extension("/pkg/.node"), None);
    }

    #[test]
    fn test_hash_is_stable_and_byte_sensitive() {
        let a = Extractor::hash(b"native code");
        let b = Extractor::hash(b"native code");
        let c = Extractor::hash(b"native codf");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // 32 bytes, hex
    }

    #[tokio::test]
    async fn test_extract_prebuild_writes_content_addressed_file() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/native.node", &b"\x7fELF addon"[..]);

        let extractor = extractor_at(&temp, drive);
        let reference = extractor.extract_prebuild("/pkg/native.node").await.unwrap().unwrap();

        let name = format!("{}.node", Extractor::hash(b"\x7fELF addon"));
        assert_eq!(reference, format!("/../prebuilds/linux-x86_64/{}", name));
        assert_eq!(prebuild_files(&temp), vec![name.clone()]);

        let on_disk = std::fs::read(temp.path().join(PREBUILDS_DIR).join("linux-x86_64").join(&name)).unwrap();
        assert_eq!(on_disk, b"\x7fELF addon");
    }

    #[tokio::test]
    async fn test_extract_prebuild_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/a/one.node", &b"same bytes"[..]);
        drive.insert("/b/two.node", &b"same bytes"[..]);

        let extractor = extractor_at(&temp, drive);
        let first = extractor.extract_prebuild("/a/one.node").await.unwrap().unwrap();
        let second = extractor.extract_prebuild("/b/two.node").await.unwrap().unwrap();

        // Different original names, identical bytes: one file on disk.
        assert_eq!(first, second);
        assert_eq!(prebuild_files(&temp).len(), 1);
    }

    #[tokio::test]
    async fn test_extract_prebuild_missing_and_malformed_are_not_errors() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/readme.txt", &b"not a binary"[..]);

        let extractor = extractor_at(&temp, drive);
        assert!(extractor.extract_prebuild("/pkg/missing.node").await.unwrap().is_none());
        assert!(extractor.extract_prebuild("/pkg/readme.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extract_prebuild_portable_uses_host_template() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/native.bare", &b"bytes"[..]);

        let extractor = extractor_with(&temp, drive, true, false, false);
        let reference = extractor.extract_prebuild("/pkg/native.bare").await.unwrap().unwrap();

        assert!(reference.starts_with("/../prebuilds/{host}/"));
        assert!(reference.ends_with(".bare"));
        // The file itself still lands under the concrete host directory.
        assert_eq!(prebuild_files(&temp).len(), 1);
    }

    #[tokio::test]
    async fn test_extract_prebuild_absolute_emits_file_url() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/native.node", &b"bytes"[..]);

        let extractor = extractor_with(&temp, drive, false, true, false);
        let reference = extractor.extract_prebuild("/pkg/native.node").await.unwrap().unwrap();

        assert!(reference.starts_with("file://"));
        assert!(reference.contains("linux-x86_64"));
    }

    #[tokio::test]
    async fn test_extract_prebuild_concurrent_same_content_converges() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/native.node", &b"racy bytes"[..]);

        let extractor = extractor_at(&temp, drive);
        let tasks: Vec<_> = (0..8).map(|_| extractor.extract_prebuild("/pkg/native.node")).collect();
        let results = futures::future::join_all(tasks).await;

        let references: Vec<String> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        assert!(references.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(prebuild_files(&temp).len(), 1);
    }

    #[tokio::test]
    async fn test_extract_asset_mirrors_key_path() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/data/asset.txt", &b"payload"[..]);

        let extractor = extractor_at(&temp, drive);
        let reference = extractor.extract_asset("/pkg/data/asset.txt").await.unwrap();

        assert_eq!(reference, "/../assets/pkg/data/asset.txt");
        let on_disk = std::fs::read(temp.path().join(ASSETS_DIR).join("pkg/data/asset.txt")).unwrap();
        assert_eq!(on_disk, b"payload");
    }

    #[tokio::test]
    async fn test_extract_asset_absolute_emits_file_url() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/asset.bin", &b"payload"[..]);

        let extractor = extractor_with(&temp, drive, false, false, true);
        let reference = extractor.extract_asset("/asset.bin").await.unwrap();

        assert!(reference.starts_with("file://"));
        assert!(reference.ends_with("/assets/asset.bin"));
    }

    #[tokio::test]
    async fn test_extract_asset_failures_degrade_to_none() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor_at(&temp, MemoryDrive::new());

        assert!(extractor.extract_asset("/missing.txt").await.is_none());
        assert!(extractor.extract_asset("/pkg/../../etc/passwd").await.is_none());
    }

    #[tokio::test]
    async fn test_extract_asset_rewrites_changed_content() {
        let temp = TempDir::new().unwrap();

        let mut drive = MemoryDrive::new();
        drive.insert("/asset.txt", &b"old"[..]);
        let extractor = extractor_at(&temp, drive);
        extractor.extract_asset("/asset.txt").await.unwrap();

        let mut drive = MemoryDrive::new();
        drive.insert("/asset.txt", &b"new"[..]);
        let extractor = extractor_at(&temp, drive);
        extractor.extract_asset("/asset.txt").await.unwrap();

        let on_disk = std::fs::read(temp.path().join(ASSETS_DIR).join("asset.txt")).unwrap();
        assert_eq!(on_disk, b"new");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let mut drive = MemoryDrive::new();
        drive.insert("/pkg/native.node", &b"bytes"[..]);
        drive.insert("/asset.txt", &b"payload"[..]);

        let extractor = extractor_at(&temp, drive);
        extractor.extract_prebuild("/pkg/native.node").await.unwrap();
        extractor.extract_asset("/asset.txt").await.unwrap();

        let mut stack = vec![temp.path().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    assert!(!path.to_string_lossy().ends_with(".tmp"), "leftover temp file: {:?}", path);
                }
            }
        }
    }
}
