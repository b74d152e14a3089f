//! Dependency-graph walker interface.
//!
//! The walker is an external collaborator: it parses source, discovers
//! imports and yields one [`ModuleRecord`] per reachable module as an
//! asynchronous stream. The bundler consumes that stream without ever
//! re-discovering the graph itself.

use std::io;

use futures::stream::BoxStream;

/// Options passed to [`Walker::walk`] when the orchestrator opens a walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Module key to seed the walk from.
    pub entrypoint: String,
    /// Target platform-architecture identifier for host-specific specifiers.
    pub host: String,
    /// Enable package-boundary-aware resolution.
    pub packages: bool,
    /// Include full source text in yielded records.
    pub source: bool,
    /// Defer host selection to load time when resolving host-specific keys.
    pub portable: bool,
}

/// A specifier → resolved-key pair declared by a module.
///
/// An empty `input` or `output` means "no mapping for this entry" and is
/// skipped by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierMapping {
    /// The literal specifier string as written in the module.
    pub input: String,
    /// The resolved canonical key of the target.
    pub output: String,
}

impl SpecifierMapping {
    /// Create a mapping from a specifier to a resolved key.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Whether both sides of the mapping are present.
    pub fn is_complete(&self) -> bool {
        !self.input.is_empty() && !self.output.is_empty()
    }
}

/// One module discovered by the graph walk.
///
/// Immutable after creation; the walker yields each reachable module exactly
/// once, entrypoint first.
#[derive(Debug, Clone, Default)]
pub struct ModuleRecord {
    /// Canonical source identifier, unique within a drive.
    pub key: String,
    /// Source text (or JSON-literal text for data modules).
    pub source: String,
    /// Import resolutions declared by this module.
    pub resolutions: Vec<SpecifierMapping>,
    /// Native addon references: addon directory → prebuild binary key.
    pub addons: Vec<SpecifierMapping>,
    /// Asset references: specifier → resolved asset key.
    pub assets: Vec<SpecifierMapping>,
}

/// Produces the dependency-graph stream consumed by the orchestrator.
pub trait Walker: Send + Sync {
    /// Open an asynchronous sequence of module records seeded at
    /// `options.entrypoint`.
    fn walk(&self, options: WalkOptions) -> BoxStream<'_, io::Result<ModuleRecord>>;
}
