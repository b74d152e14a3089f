//! Drivepack - module-graph bundling for virtual drives
//!
//! Given a virtual source tree (a [`Drive`]) and an entrypoint, drivepack
//! consumes the dependency-graph stream produced by a [`Walker`], assembles
//! resolution and source maps under a stable key scheme, extracts native
//! prebuilds and assets into content-addressed locations on disk, and can
//! emit a single self-contained loader program that replays the bundle with
//! no graph discovery at load time.
//!
//! ```ignore
//! use std::sync::Arc;
//! use drivepack::{bundle, generate_loader, BundleConfig};
//!
//! let result = bundle(drive, &walker, BundleConfig::default()).await?;
//! let program = generate_loader(&result)?;
//! ```

pub mod bundle;
pub mod drive;
pub mod extract;
pub mod graph;
pub mod keys;
pub mod loader;

pub use bundle::{
    bundle, default_host, BundleConfig, BundleError, BundleResult, ConfigError, ExtractDir,
    ResolutionMap, ResolutionTarget, SpecifierTable, ADDON_SLOT,
};
pub use drive::{BoxFuture, ByteStream, Drive, DriveEntry, MemoryDrive};
pub use extract::{ExtractError, ExtractOptions, Extractor};
pub use graph::{ModuleRecord, SpecifierMapping, WalkOptions, Walker};
pub use loader::{generate_loader, LoaderError};

/// Crate version, for embedders that persist bundles alongside it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
