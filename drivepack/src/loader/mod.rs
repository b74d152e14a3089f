//! Runtime loader generation.
//!
//! Serializes a [`BundleResult`] into a single self-contained JavaScript
//! program implementing synchronous CommonJS-style module loading with zero
//! runtime graph discovery. The emitted text is a function expression taking
//! one argument, the host capability object
//! `{ nativeRequire, nativeAddonLoader }`; evaluating the expression and
//! calling it loads the entrypoint and returns its exports.
//!
//! The program is a fixed shim plus four injected literal tables
//! (entrypoint key, sources, resolutions, addon directory map). Every table
//! is emitted through JSON serialization, so escaping is correct for
//! arbitrary source text and arbitrary key strings.

use indexmap::IndexMap;
use thiserror::Error;

use crate::bundle::{BundleResult, ResolutionTarget, ADDON_SLOT};

/// Errors raised while generating a loader program.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The bundle has no entrypoint, so there is nothing to load.
    #[error("bundle has no entrypoint")]
    MissingEntrypoint,

    /// A bundle table could not be serialized.
    #[error("failed to serialize bundle tables: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Opening of the shim, up to the injected tables.
const SHIM_HEAD: &str = "\
(function (runtime) {
  'use strict'

  runtime = runtime || {}

";

/// Loader body. Module records are cached before their initializer runs,
/// which is what makes circular requires observe a partial exports object
/// instead of re-entering initialization.
const SHIM_BODY: &str = "
  const cache = Object.create(null)

  function load (filename) {
    const cached = cache[filename]
    if (cached) return cached

    const source = SOURCES[filename]
    if (source === undefined) {
      throw new Error('Module not found: \\'' + filename + '\\'')
    }

    const i = filename.lastIndexOf('/')
    const dirname = i <= 0 ? '/' : filename.slice(0, i)

    const module = cache[filename] = {
      filename,
      dirname,
      exports: {},
      require: null
    }

    const require = createRequire(module)
    module.require = require

    const init = new Function('module', 'exports', '__filename', '__dirname', 'require', source)
    init(module, module.exports, filename, dirname, require)

    return module
  }

  function createRequire (module) {
    const table = RESOLUTIONS[module.filename] || {}

    function require (specifier) {
      return load(require.resolve(specifier)).exports
    }

    require.resolve = function (specifier) {
      const resolved = table[specifier]
      if (resolved !== undefined) {
        if (typeof resolved === 'string') return resolved
        if (resolved.default !== undefined) return resolved.default
      }
      throw new Error('Cannot resolve \\'' + specifier + '\\' from \\'' + module.filename + '\\'')
    }

    require.asset = function (specifier) {
      const resolved = table[specifier]
      if (resolved === undefined || typeof resolved === 'string' || resolved.asset === undefined) {
        throw new Error('Cannot resolve asset \\'' + specifier + '\\' from \\'' + module.filename + '\\'')
      }
      return resolved.asset
    }

    require.addon = function (dir) {
      if (dir === undefined) dir = '.'

      const mapped = ADDONS[canonicalDir(module.dirname, dir)]

      if (mapped !== undefined) {
        if (typeof runtime.nativeRequire !== 'function') {
          throw new Error('Native addon loading is not supported on this host')
        }
        return runtime.nativeRequire(mapped)
      }

      if (typeof runtime.nativeAddonLoader !== 'function') {
        throw new Error('Native addon loading is not supported on this host')
      }
      return runtime.nativeAddonLoader(dir, module.filename)
    }

    return require
  }

  function canonicalDir (base, dir) {
    const parts = (base + '/' + dir).split('/')
    const stack = []

    for (const part of parts) {
      if (part === '' || part === '.') continue
      if (part === '..') {
        stack.pop()
        continue
      }
      stack.push(part)
    }

    if (stack.length === 0) return '/'
    return '/' + stack.join('/') + '/'
  }

  return load(ENTRYPOINT).exports
})
";

/// Generate the self-contained loader program for `result`.
///
/// The addon table injected into the program is the flat directory-key →
/// extracted-path map precomputed from the reserved addon slots in
/// `result.resolutions`.
///
/// The emitted `require.addon` canonicalizes directories with `/` as the
/// only separator, so addon keys from a mounted bundle (`pear://dev/...`)
/// can never match a canonicalized lookup; such addons fall through to the
/// host's own addon loader at load time. Generate loaders from unmounted
/// bundles when pre-extracted addons must resolve from the table.
pub fn generate_loader(result: &BundleResult) -> Result<String, LoaderError> {
    let entrypoint = result
        .entrypoint
        .as_deref()
        .ok_or(LoaderError::MissingEntrypoint)?;

    let mut addons: IndexMap<&str, &str> = IndexMap::new();
    for (key, table) in &result.resolutions {
        if !key.ends_with('/') {
            continue;
        }
        if let Some(ResolutionTarget::Key(path)) = table.get(ADDON_SLOT) {
            addons.insert(key.as_str(), path.as_str());
        }
    }

    if addons.keys().any(|key| !key.starts_with('/')) {
        tracing::warn!(
            "addon directory keys carry a mount prefix; require.addon lookups will fall back to the host loader"
        );
    }

    let entrypoint_json = serde_json::to_string(entrypoint)?;
    let sources_json = serde_json::to_string(&result.sources)?;
    let resolutions_json = serde_json::to_string(&result.resolutions)?;
    let addons_json = serde_json::to_string(&addons)?;

    let mut program = String::with_capacity(
        SHIM_HEAD.len()
            + SHIM_BODY.len()
            + entrypoint_json.len()
            + sources_json.len()
            + resolutions_json.len()
            + addons_json.len()
            + 128,
    );

    program.push_str(SHIM_HEAD);
    push_table(&mut program, "ENTRYPOINT", &entrypoint_json);
    push_table(&mut program, "SOURCES", &sources_json);
    push_table(&mut program, "RESOLUTIONS", &resolutions_json);
    push_table(&mut program, "ADDONS", &addons_json);
    program.push_str(SHIM_BODY);

    Ok(program)
}

fn push_table(program: &mut String, name: &str, literal: &str) {
    program.push_str("  const ");
    program.push_str(name);
    program.push_str(" = ");
    program.push_str(literal);
    program.push('\n');
}
