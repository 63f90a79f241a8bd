//! On-disk layout of an installed application.
//!
//! A [`LocatorConfig`] names the paths; a [`Locator`] pairs them with the
//! manifest read from `manifest_path`. Locator paths are read-only shared
//! configuration once an [`crate::UpdateManager`] has been built from them.
//!
//! # Layout by platform
//!
//! | Platform | Root | Updater | Packages |
//! |----------|------|---------|----------|
//! | Windows | `%LocalAppData%\{id}\` | `Update.exe` | `{root}\packages` |
//! | macOS | `{App}.app/` | `Contents/MacOS/UpdateMac` | `~/Library/Caches/updraft/{id}/packages` |
//! | Linux | AppImage mount | `usr/bin/UpdateNix` | `/var/tmp/updraft/{id}/packages` |

use crate::error::{Result, UpdateError};
use crate::manifest::Manifest;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the cross-process update lock inside the packages directory.
pub const LOCK_FILE_NAME: &str = ".updraft_lock";

/// Paths describing where the app, its packages, and its manifest live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Root install directory.
    pub root_app_dir: PathBuf,
    /// Path to the platform updater executable.
    pub update_exe_path: PathBuf,
    /// Directory holding downloaded full/delta packages.
    pub packages_dir: PathBuf,
    /// Path to the installed manifest (`.nuspec`).
    pub manifest_path: PathBuf,
    /// Directory containing the running binaries.
    pub current_binary_dir: PathBuf,
    /// Portable (non-installed) layout.
    pub is_portable: bool,
}

impl LocatorConfig {
    /// Load the manifest this config points at and build a [`Locator`].
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotInstalled`] if the manifest is missing, or a
    /// parse error if it is malformed.
    pub fn load(self) -> Result<Locator> {
        let manifest = Manifest::from_file(&self.manifest_path)?;
        Ok(Locator::new(self, manifest))
    }
}

/// Resolved layout plus the installed manifest.
#[derive(Debug, Clone)]
pub struct Locator {
    paths: LocatorConfig,
    manifest: Manifest,
}

impl Locator {
    /// Pair a layout with an already-parsed manifest.
    pub fn new(paths: LocatorConfig, manifest: Manifest) -> Self {
        Self { paths, manifest }
    }

    /// The path configuration.
    pub fn paths(&self) -> &LocatorConfig {
        &self.paths
    }

    /// The installed manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Installed version.
    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    /// Installed package id.
    pub fn app_id(&self) -> &str {
        &self.manifest.id
    }

    /// Channel recorded in the installed manifest (may be empty).
    pub fn manifest_channel(&self) -> &str {
        &self.manifest.channel
    }

    /// Root install directory.
    pub fn root_dir(&self) -> &Path {
        &self.paths.root_app_dir
    }

    /// Packages directory.
    pub fn packages_dir(&self) -> &Path {
        &self.paths.packages_dir
    }

    /// Updater executable.
    pub fn update_exe_path(&self) -> &Path {
        &self.paths.update_exe_path
    }

    /// Whether the install is portable.
    pub fn is_portable(&self) -> bool {
        self.paths.is_portable
    }

    /// Where a given asset lives once downloaded.
    pub fn package_path(&self, file_name: &str) -> PathBuf {
        self.paths.packages_dir.join(file_name)
    }

    /// Path of the cross-process update lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.paths.packages_dir.join(LOCK_FILE_NAME)
    }
}

/// Channel used when neither the caller nor the manifest names one.
#[must_use]
pub fn default_channel_name() -> String {
    if cfg!(target_os = "windows") {
        "win".to_owned()
    } else if cfg!(target_os = "macos") {
        "osx".to_owned()
    } else {
        "linux".to_owned()
    }
}

/// Every readable full package (a zip carrying a `.nuspec`) in
/// `packages_dir`. Unreadable packages and delta packages are skipped.
pub fn list_full_packages(packages_dir: &Path) -> Vec<(PathBuf, Manifest)> {
    let Ok(entries) = std::fs::read_dir(packages_dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_package = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("nupkg"));
        let is_delta = path
            .file_stem()
            .is_some_and(|s| s.to_string_lossy().to_ascii_lowercase().ends_with("-delta"));
        if !is_package || is_delta {
            continue;
        }
        match Manifest::from_package(&path) {
            Ok(manifest) => found.push((path, manifest)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable package");
            }
        }
    }
    found
}

/// Find the newest full package in `packages_dir`, returning its path and
/// embedded manifest.
pub fn find_latest_full_package(packages_dir: &Path) -> Option<(PathBuf, Manifest)> {
    list_full_packages(packages_dir)
        .into_iter()
        .max_by(|a, b| a.1.version.cmp(&b.1.version))
}

/// Find the full package for exactly `version` in `packages_dir`.
pub fn find_full_package(packages_dir: &Path, version: &Version) -> Option<PathBuf> {
    list_full_packages(packages_dir)
        .into_iter()
        .find(|(_, m)| &m.version == version)
        .map(|(path, _)| path)
}

/// Locate the running application from the current executable's path.
///
/// # Errors
///
/// Returns [`UpdateError::NotInstalled`] if the executable is not inside a
/// recognised install layout or the updater/manifest is missing.
pub fn auto_locate() -> Result<Locator> {
    let exe = std::env::current_exe()
        .map_err(|e| UpdateError::NotInstalled(format!("cannot resolve current exe: {e}")))?;
    let config = locate_from_exe(&exe)?;
    if !config.update_exe_path.exists() {
        return Err(UpdateError::NotInstalled(format!(
            "updater not found at {}",
            config.update_exe_path.display()
        )));
    }
    let manifest = Manifest::from_file(&config.manifest_path)?;
    let config = with_packages_dir(config, &manifest.id);
    tracing::info!(root = %config.root_app_dir.display(), "located installed application");
    Ok(Locator::new(config, manifest))
}

#[cfg(target_os = "windows")]
fn locate_from_exe(exe: &Path) -> Result<LocatorConfig> {
    // {root}\current\app.exe, possibly nested deeper inside current\
    let text = exe.to_string_lossy();
    let idx = text.rfind("\\current\\").ok_or_else(|| {
        UpdateError::NotInstalled(format!("'{text}' is not inside a current\\ directory"))
    })?;
    let root = PathBuf::from(&text[..idx]);
    let current = root.join("current");
    Ok(LocatorConfig {
        update_exe_path: root.join("Update.exe"),
        packages_dir: root.join("packages"),
        manifest_path: current.join("sq.version"),
        current_binary_dir: current,
        is_portable: root.join(".portable").exists(),
        root_app_dir: root,
    })
}

#[cfg(target_os = "macos")]
fn locate_from_exe(exe: &Path) -> Result<LocatorConfig> {
    let text = exe.to_string_lossy();
    let idx = text.rfind(".app/").ok_or_else(|| {
        UpdateError::NotInstalled(format!("'{text}' is not inside an .app bundle"))
    })?;
    let root = PathBuf::from(&text[..idx + 4]);
    let contents = root.join("Contents").join("MacOS");
    Ok(LocatorConfig {
        update_exe_path: contents.join("UpdateMac"),
        packages_dir: PathBuf::new(),
        manifest_path: contents.join("sq.version"),
        current_binary_dir: contents,
        is_portable: true,
        root_app_dir: root,
    })
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn locate_from_exe(exe: &Path) -> Result<LocatorConfig> {
    let text = exe.to_string_lossy();
    let idx = text.rfind("/usr/bin/").ok_or_else(|| {
        UpdateError::NotInstalled(format!("'{text}' is not inside a usr/bin/ directory"))
    })?;
    let root = PathBuf::from(&text[..idx]);
    let contents = root.join("usr").join("bin");
    Ok(LocatorConfig {
        update_exe_path: contents.join("UpdateNix"),
        packages_dir: PathBuf::new(),
        manifest_path: contents.join("sq.version"),
        current_binary_dir: contents,
        is_portable: true,
        root_app_dir: root,
    })
}

fn with_packages_dir(mut config: LocatorConfig, app_id: &str) -> LocatorConfig {
    if !config.packages_dir.as_os_str().is_empty() {
        return config;
    }
    config.packages_dir = if cfg!(target_os = "macos") {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("updraft")
            .join(app_id)
            .join("packages")
    } else {
        PathBuf::from("/var/tmp/updraft").join(app_id).join("packages")
    };
    config
}
