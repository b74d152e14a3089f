//! Bundling orchestrator.
//!
//! Consumes the dependency-graph stream, assembles the `sources` and
//! `resolutions` maps under the resolution key scheme, dispatches addon and
//! asset extraction in parallel and reconciles extraction results back into
//! the maps. Sources and resolutions are recorded in stream-yield order;
//! extraction tasks complete in any order and are reconciled only after the
//! stream ends.

mod config;
mod types;

pub use config::{default_host, BundleConfig, ConfigError, ExtractDir, DEFAULT_ENTRYPOINT, DEFAULT_MOUNT};
pub use types::{
    BundleError, BundleResult, ResolutionMap, ResolutionTarget, SpecifierTable, ADDON_SLOT,
};

use std::sync::Arc;

use futures::future;
use futures::TryStreamExt;
use indexmap::IndexMap;

use crate::drive::{BoxFuture, Drive};
use crate::extract::{ExtractError, ExtractOptions, Extractor, ASSETS_DIR, PREBUILDS_DIR};
use crate::graph::{WalkOptions, Walker};
use crate::keys;

/// A completed extraction, waiting to be written back into the resolution
/// maps.
enum Extracted {
    /// An addon prebuild for the given raw directory key.
    Addon { dir: String, path: String },
    /// An asset referenced by `referrer` under the literal specifier `input`.
    Asset {
        referrer: String,
        input: String,
        path: String,
    },
}

/// Bundle the module graph reachable from the configured entrypoint.
///
/// Walks the graph once, records each module's source and import resolution
/// table, extracts referenced prebuilds and assets to disk and returns the
/// assembled [`BundleResult`]. Modules marked in the caller's cache are
/// skipped in the output maps but their extraction side effects still run,
/// which is what makes incremental re-bundles to the same output directory
/// work.
pub async fn bundle(
    drive: Arc<dyn Drive>,
    walker: &dyn Walker,
    config: BundleConfig,
) -> Result<BundleResult, BundleError> {
    let config = config.validated()?;

    let extractor = Extractor::new(
        Arc::clone(&drive),
        ExtractOptions {
            prebuilds_dir: config
                .prebuilds
                .resolve(&config.cwd, PREBUILDS_DIR)
                .unwrap_or_else(|| config.cwd.join(PREBUILDS_DIR)),
            assets_dir: config
                .assets
                .resolve(&config.cwd, ASSETS_DIR)
                .unwrap_or_else(|| config.cwd.join(ASSETS_DIR)),
            host: config.host.clone(),
            portable: config.portable,
            absolute_prebuilds: config.absolute_prebuilds(),
            absolute_files: config.absolute_files,
        },
    );

    let mut stream = walker.walk(WalkOptions {
        entrypoint: config.entrypoint.clone(),
        host: config.host.clone(),
        packages: config.packages,
        source: true,
        portable: config.portable,
    });

    let mut entrypoint: Option<String> = None;
    let mut sources: IndexMap<String, String> = IndexMap::new();
    let mut resolutions = ResolutionMap::new();
    let mut pending: Vec<BoxFuture<'_, Result<Option<Extracted>, ExtractError>>> = Vec::new();

    while let Some(record) = stream.try_next().await.map_err(BundleError::Walk)? {
        let key = keys::resolution_key(&config.mount, &record.key, false);

        if entrypoint.is_none() {
            entrypoint = Some(key.clone());
        }

        let cached = config.is_cached(&key);

        if cached {
            tracing::debug!(key = %key, "module already bundled, skipping source and resolutions");
        } else {
            let mut table = SpecifierTable::new();
            for mapping in &record.resolutions {
                if !mapping.is_complete() {
                    continue;
                }
                table.insert(
                    mapping.input.clone(),
                    ResolutionTarget::Key(keys::resolution_key(&config.mount, &mapping.output, false)),
                );
            }
            if !table.is_empty() {
                resolutions.insert(key.clone(), table);
            }

            sources.insert(key, record.source);
        }

        if config.prebuilds.is_enabled() {
            for mapping in &record.addons {
                if !mapping.is_complete() {
                    continue;
                }
                let dir = mapping.input.clone();
                let binary = mapping.output.clone();
                let extractor = &extractor;
                pending.push(Box::pin(async move {
                    let path = extractor.extract_prebuild(&binary).await?;
                    Ok(path.map(|path| Extracted::Addon { dir, path }))
                }));
            }
        }

        if config.assets.is_enabled() {
            for mapping in &record.assets {
                if !mapping.is_complete() {
                    continue;
                }
                let referrer = record.key.clone();
                let input = mapping.input.clone();
                let asset_key = mapping.output.clone();
                let extractor = &extractor;
                pending.push(Box::pin(async move {
                    let path = extractor.extract_asset(&asset_key).await;
                    // A cache-skipped referrer contributes nothing to the
                    // output maps; the file on disk is the side effect that
                    // matters for incremental re-bundles.
                    Ok(match path {
                        Some(path) if !cached => Some(Extracted::Asset { referrer, input, path }),
                        _ => None,
                    })
                }));
            }
        }
    }

    // Every queued task runs to completion before the first error (if any)
    // propagates; sibling extractions are never aborted mid-write.
    let mut first_err: Option<ExtractError> = None;
    for outcome in future::join_all(pending).await {
        match outcome {
            Ok(Some(extracted)) => reconcile(&mut resolutions, &config.mount, extracted),
            Ok(None) => {}
            Err(err) => {
                if first_err.is_some() {
                    tracing::warn!(error = %err, "additional extraction failure");
                } else {
                    first_err = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err.into());
    }

    tracing::debug!(
        modules = sources.len(),
        resolutions = resolutions.len(),
        "bundle complete"
    );

    Ok(BundleResult {
        entrypoint,
        resolutions,
        sources,
    })
}

/// Write one extraction result back into the resolution maps.
fn reconcile(resolutions: &mut ResolutionMap, mount: &str, extracted: Extracted) {
    match extracted {
        Extracted::Addon { dir, path } => {
            let dir_key = keys::resolution_key(mount, &dir, true);
            resolutions
                .entry(dir_key)
                .or_default()
                .insert(ADDON_SLOT.to_string(), ResolutionTarget::Key(path));
        }
        Extracted::Asset {
            referrer,
            input,
            path,
        } => {
            let referrer_key = keys::resolution_key(mount, &referrer, false);
            let table = resolutions.entry(referrer_key).or_default();

            // A specifier may already resolve to a plain module (a fallback
            // implementation); that resolution survives as `default`.
            let default = match table.get(&input) {
                Some(ResolutionTarget::Key(prior)) => Some(prior.clone()),
                Some(ResolutionTarget::Asset { default, .. }) => default.clone(),
                None => None,
            };

            table.insert(input, ResolutionTarget::Asset { asset: path, default });
        }
    }
}
