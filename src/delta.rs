//! Delta chains: choosing them from a feed and applying them.
//!
//! A delta asset at version V patches the full release immediately before V
//! into V. Patching itself is opaque to this crate; [`DeltaPatcher`] is the
//! seam, and [`UpdaterPatcher`] hands the work to the platform updater.

use crate::asset::Asset;
use crate::error::{Result, UpdateError};
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Applies one binary delta to a base package, producing the next package.
pub trait DeltaPatcher: Send + Sync {
    /// Write `base` patched with `delta` to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ApplyFailed`] if the patch cannot be applied.
    fn apply(&self, base: &Path, delta: &Path, output: &Path) -> Result<()>;
}

/// Runs `{updater} patch --old <base> --delta <delta> --output <out>`.
#[derive(Debug, Clone)]
pub struct UpdaterPatcher {
    update_exe: PathBuf,
}

impl UpdaterPatcher {
    /// Patch through the updater executable at `update_exe`.
    pub fn new(update_exe: impl Into<PathBuf>) -> Self {
        Self {
            update_exe: update_exe.into(),
        }
    }
}

impl DeltaPatcher for UpdaterPatcher {
    fn apply(&self, base: &Path, delta: &Path, output: &Path) -> Result<()> {
        tracing::debug!(
            base = %base.display(),
            delta = %delta.display(),
            "applying delta through updater"
        );
        let out = std::process::Command::new(&self.update_exe)
            .arg("patch")
            .arg("--old")
            .arg(base)
            .arg("--delta")
            .arg(delta)
            .arg("--output")
            .arg(output)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .output()
            .map_err(|e| {
                UpdateError::ApplyFailed(format!(
                    "cannot run {}: {e}",
                    self.update_exe.display()
                ))
            })?;
        if !out.status.success() {
            return Err(UpdateError::ApplyFailed(format!(
                "patch exited with {:?}: {}",
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Pick the delta chain from `current` to `target` out of `assets`.
///
/// Returns an empty chain unless every full release in `(current, target]`
/// has a delta, the chain is no longer than `max_deltas`, and the deltas
/// together are no larger than `target_full_size` (when known). When several
/// deltas share a version, the smallest wins, then the lowest file name.
pub fn select_chain(
    assets: &[Asset],
    current: &Version,
    target: &Version,
    target_full_size: u64,
    max_deltas: usize,
) -> Vec<Asset> {
    if target <= current || max_deltas == 0 {
        return Vec::new();
    }
    let in_range = |v: &Version| v > current && v <= target;

    let mut fulls: Vec<Version> = assets
        .iter()
        .filter(|a| a.is_full())
        .filter_map(|a| a.semver().ok())
        .filter(in_range)
        .collect();
    fulls.sort();
    fulls.dedup();

    let mut best: BTreeMap<Version, &Asset> = BTreeMap::new();
    for asset in assets.iter().filter(|a| a.is_delta()) {
        let Ok(version) = asset.semver() else {
            continue;
        };
        if !in_range(&version) {
            continue;
        }
        best.entry(version)
            .and_modify(|cur| {
                if (asset.size, &asset.file_name) < (cur.size, &cur.file_name) {
                    *cur = asset;
                }
            })
            .or_insert(asset);
    }

    let contiguous = fulls.iter().all(|v| best.contains_key(v));
    if !contiguous || best.is_empty() || !best.contains_key(target) {
        tracing::debug!(%current, %target, "delta chain is not contiguous");
        return Vec::new();
    }
    if best.len() > max_deltas {
        tracing::debug!(len = best.len(), max_deltas, "delta chain too long");
        return Vec::new();
    }
    let total: u64 = best.values().map(|a| a.size).sum();
    if target_full_size > 0 && total > target_full_size {
        tracing::debug!(total, target_full_size, "delta chain larger than full package");
        return Vec::new();
    }
    best.into_values().cloned().collect()
}
