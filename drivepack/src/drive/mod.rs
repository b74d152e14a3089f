//! Virtual drive interface.
//!
//! A drive stores byte content under hierarchical string keys resembling
//! filesystem paths. The bundler only reads from drives: raw buffers for
//! prebuilds, entry metadata and byte streams for assets.
//!
//! # Dyn Compatibility
//!
//! The trait uses `Pin<Box<dyn Future>>` returns so callers can hold an
//! `Arc<dyn Drive>` and share one drive between the graph walker and the
//! extractor.

mod memory;

pub use memory::MemoryDrive;

use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::BoxStream;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte stream returned by [`Drive::create_read_stream`].
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata for a single drive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEntry {
    /// The entry's key within the drive.
    pub key: String,
    /// Content length in bytes.
    pub length: u64,
}

/// Read-only access to a virtual source tree.
///
/// Missing keys are reported as `Ok(None)`, never as errors; `Err` is
/// reserved for genuine I/O faults in the backing store.
pub trait Drive: Send + Sync {
    /// Fetch the full content stored under `key`.
    fn get(&self, key: &str) -> BoxFuture<'_, io::Result<Option<Bytes>>>;

    /// Look up entry metadata for `key`.
    fn entry(&self, key: &str) -> BoxFuture<'_, io::Result<Option<DriveEntry>>>;

    /// Open a byte stream over the content of `entry`.
    fn create_read_stream(&self, entry: &DriveEntry) -> BoxFuture<'_, io::Result<ByteStream>>;
}
