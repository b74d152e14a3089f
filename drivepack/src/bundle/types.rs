//! Bundle result types and errors.

use std::io;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::ConfigError;
use crate::extract::ExtractError;

/// Reserved pseudo-specifier for a directory's addon resolution.
///
/// One directory hosts at most one addon; this slot must never collide with
/// a real import specifier, which is guaranteed because real specifiers are
/// paths or bare package names, never `bare:`-prefixed.
pub const ADDON_SLOT: &str = "bare:addon";

/// Per-module specifier table: literal specifier → resolution target.
pub type SpecifierTable = IndexMap<String, ResolutionTarget>;

/// All resolution tables, keyed by module (or addon-directory) key.
pub type ResolutionMap = IndexMap<String, SpecifierTable>;

/// What a specifier resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionTarget {
    /// A plain resolved module key (or extracted prebuild path for the
    /// [`ADDON_SLOT`]).
    Key(String),

    /// An extracted asset, optionally carrying the non-asset resolution the
    /// specifier had before extraction so consumers can fall back to it.
    Asset {
        asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
}

impl ResolutionTarget {
    /// The plain resolved key, if this target is one.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            ResolutionTarget::Key(key) => Some(key),
            ResolutionTarget::Asset { .. } => None,
        }
    }

    /// The extracted asset path, if this target is an asset.
    pub fn as_asset(&self) -> Option<&str> {
        match self {
            ResolutionTarget::Key(_) => None,
            ResolutionTarget::Asset { asset, .. } => Some(asset),
        }
    }
}

/// Output of one `bundle()` call.
///
/// `entrypoint` is the key of the first module yielded by the graph walk and
/// is always present in `sources` (unless the walk yielded nothing at all).
/// `resolutions` is sparse: modules with no resolvable specifiers are
/// omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleResult {
    pub entrypoint: Option<String>,
    pub resolutions: ResolutionMap,
    pub sources: IndexMap<String, String>,
}

/// Errors raised by the bundling orchestrator.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The dependency-graph stream failed.
    #[error("dependency walk failed: {0}")]
    Walk(#[source] io::Error),

    /// An extraction task hit a filesystem fault.
    #[error(transparent)]
    Extract(#[from] ExtractError),
}
