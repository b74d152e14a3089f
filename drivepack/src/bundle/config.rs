//! Bundle configuration.
//!
//! [`BundleConfig`] is an explicit, immutable description of one bundling
//! run. Call sites fill in the fields they care about on top of
//! `BundleConfig::default()`; the orchestrator normalizes and validates the
//! struct once, up front, via [`BundleConfig::validated`].

use std::collections::HashSet;
use std::env;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default entrypoint key the walk is seeded from.
pub const DEFAULT_ENTRYPOINT: &str = ".";

/// Default mount prefix. A bare `/` means keys stay rooted as-is.
pub const DEFAULT_MOUNT: &str = "/";

/// Errors raised while validating a [`BundleConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The entrypoint key is empty.
    #[error("entrypoint must not be empty")]
    EmptyEntrypoint,

    /// The host identifier is empty.
    #[error("host must not be empty")]
    EmptyHost,

    /// A relative `cwd` could not be resolved against the working directory.
    #[error("could not resolve working directory: {0}")]
    Cwd(#[from] io::Error),
}

/// Where one class of extraction output goes, if anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExtractDir {
    /// Extraction disabled entirely.
    Off,
    /// Extract under the standard subdirectory of `cwd`.
    #[default]
    Default,
    /// Extract under an explicit directory.
    At(PathBuf),
}

impl ExtractDir {
    /// Resolve to a concrete output directory, or `None` when disabled.
    pub fn resolve(&self, cwd: &Path, default_name: &str) -> Option<PathBuf> {
        match self {
            ExtractDir::Off => None,
            ExtractDir::Default => Some(cwd.join(default_name)),
            ExtractDir::At(path) => Some(path.clone()),
        }
    }

    /// Whether extraction is enabled at all.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ExtractDir::Off)
    }

    /// Resolve a relative override against `cwd`, so `file://` references
    /// built from the output directory are always fully qualified.
    fn absolutized(self, cwd: &Path) -> Self {
        match self {
            ExtractDir::At(path) if path.is_relative() => ExtractDir::At(cwd.join(path)),
            other => other,
        }
    }
}

/// Platform-architecture identifier of the running environment.
pub fn default_host() -> String {
    format!("{}-{}", env::consts::OS, env::consts::ARCH)
}

/// Configuration for one `bundle()` call.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Base directory for extraction output. Made absolute during
    /// validation. Default: `.`.
    pub cwd: PathBuf,

    /// Prefix applied to every output key, string or URL-like. A trailing
    /// slash is stripped during validation. Default: `/`.
    pub mount: String,

    /// Resolution keys already present in a prior bundle. Read-only: keys in
    /// this set contribute no sources or resolutions, but their addon/asset
    /// extraction side effects still run.
    pub cache: Option<HashSet<String>>,

    /// Target platform-architecture identifier. Default: the running
    /// environment's, per [`default_host`].
    pub host: String,

    /// Defer host selection to load time: prebuild references carry a
    /// literal `{host}` token instead of the concrete host. Default: false.
    pub portable: bool,

    /// Addon extraction: disabled, default directory, or an override.
    pub prebuilds: ExtractDir,

    /// Asset extraction: disabled, default directory, or an override.
    pub assets: ExtractDir,

    /// Emit `file://` references for extracted assets instead of portable
    /// relative placeholders. Default: false.
    pub absolute_files: bool,

    /// Emit `file://` references for extracted prebuilds. `None` infers the
    /// value from the mount, matching the convention that `.bundle` mounts
    /// are local and want absolute paths.
    pub absolute_prebuilds: Option<bool>,

    /// Enable package-boundary-aware resolution in the graph walk.
    /// Default: true.
    pub packages: bool,

    /// Module key to start the walk from. Default: `.`.
    pub entrypoint: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            mount: DEFAULT_MOUNT.to_string(),
            cache: None,
            host: default_host(),
            portable: false,
            prebuilds: ExtractDir::Default,
            assets: ExtractDir::Default,
            absolute_files: false,
            absolute_prebuilds: None,
            packages: true,
            entrypoint: DEFAULT_ENTRYPOINT.to_string(),
        }
    }
}

impl BundleConfig {
    /// Normalize and validate the configuration.
    ///
    /// Strips the mount's trailing slash, makes `cwd` absolute and settles
    /// the `absolute_prebuilds` inference. Returns the normalized config.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.entrypoint.is_empty() {
            return Err(ConfigError::EmptyEntrypoint);
        }
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.cwd.is_relative() {
            self.cwd = env::current_dir()?.join(&self.cwd);
        }

        self.prebuilds = self.prebuilds.absolutized(&self.cwd);
        self.assets = self.assets.absolutized(&self.cwd);

        self.mount = self.mount.trim_end_matches('/').to_string();

        if self.absolute_prebuilds.is_none() {
            self.absolute_prebuilds = Some(self.mount.contains(".bundle"));
        }

        Ok(self)
    }

    /// Whether `key` is marked as already bundled by the caller's cache.
    pub(crate) fn is_cached(&self, key: &str) -> bool {
        self.cache.as_ref().is_some_and(|cache| cache.contains(key))
    }

    /// Effective `absolute_prebuilds` flag after validation.
    pub(crate) fn absolute_prebuilds(&self) -> bool {
        self.absolute_prebuilds.unwrap_or(false)
    }
}
