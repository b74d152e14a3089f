//! In-memory drive backed by a `HashMap`.
//!
//! Useful for tests and for embedders that assemble a source tree
//! programmatically before bundling. Entries are inserted up front and the
//! drive is read-only afterwards, matching how the bundler consumes drives.

use std::collections::HashMap;
use std::io;

use bytes::Bytes;
use futures::stream;

use super::{BoxFuture, ByteStream, Drive, DriveEntry};

/// Chunk size used when streaming an entry's content.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// A `HashMap`-backed [`Drive`].
#[derive(Debug, Default)]
pub struct MemoryDrive {
    entries: HashMap<String, Bytes>,
}

impl MemoryDrive {
    /// Create an empty drive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under `key`, replacing any existing entry.
    pub fn insert(&mut self, key: impl Into<String>, content: impl Into<Bytes>) {
        self.entries.insert(key.into(), content.into());
    }

    /// Number of entries in the drive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the drive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drive for MemoryDrive {
    fn get(&self, key: &str) -> BoxFuture<'_, io::Result<Option<Bytes>>> {
        let found = self.entries.get(key).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn entry(&self, key: &str) -> BoxFuture<'_, io::Result<Option<DriveEntry>>> {
        let found = self.entries.get(key).map(|content| DriveEntry {
            key: key.to_string(),
            length: content.len() as u64,
        });
        Box::pin(async move { Ok(found) })
    }

    fn create_read_stream(&self, entry: &DriveEntry) -> BoxFuture<'_, io::Result<ByteStream>> {
        let found = self.entries.get(&entry.key).cloned();
        Box::pin(async move {
            let content = found.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "entry no longer present in drive")
            })?;

            let chunks: Vec<io::Result<Bytes>> = (0..content.len())
                .step_by(READ_CHUNK_BYTES)
                .map(|offset| {
                    let end = (offset + READ_CHUNK_BYTES).min(content.len());
                    Ok(content.slice(offset..end))
                })
                .collect();

            Ok(Box::pin(stream::iter(chunks)) as ByteStream)
        })
    }
}
