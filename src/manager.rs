//! The update manager: check, download and hand off to the updater.
//!
//! ```text
//! Idle ──check──► Checked ──download──► Downloaded ──apply──► (caller exits)
//!   ▲               │  ▲                     │
//!   └─ no update ───┘  └── download failed ──┘ (retryable)
//! ```
//!
//! Downloads hold the cross-process [`UpdateLock`] for their whole duration.
//! A delta chain is tried first when the check produced one; any failure in
//! the chain discards the staged work and falls back to the full package.

use crate::asset::{Asset, AssetFeed, AssetKind, UpdateCheck, UpdateInfo};
use crate::config::UpdateOptions;
use crate::delta::{self, DeltaPatcher, UpdaterPatcher};
use crate::download::{self, PartialFile};
use crate::error::{Result, UpdateError};
use crate::lock::UpdateLock;
use crate::locator::{self, Locator, LocatorConfig};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::sources::UpdateSource;
use semver::Version;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Share of the overall progress range given to the delta chain.
const DELTA_PROGRESS_END: u8 = 90;

/// Checks for, downloads and applies updates for one installed application.
///
/// Cheap to clone; clones share the source, patcher and locator.
#[derive(Clone)]
pub struct UpdateManager {
    locator: Arc<Locator>,
    options: UpdateOptions,
    source: Arc<dyn UpdateSource>,
    patcher: Arc<dyn DeltaPatcher>,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("app_id", &self.locator.app_id())
            .field("version", &self.locator.version())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl UpdateManager {
    /// Create a manager for `source`.
    ///
    /// With `locator` unset the running application is located from the
    /// current executable.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotInstalled`] if the application layout or
    /// manifest cannot be found.
    pub fn new<S: UpdateSource + 'static>(
        source: S,
        options: Option<UpdateOptions>,
        locator: Option<LocatorConfig>,
    ) -> Result<Self> {
        let locator = match locator {
            Some(config) => config.load()?,
            None => locator::auto_locate()?,
        };
        Ok(Self::with_locator(
            Arc::new(source),
            options.unwrap_or_default(),
            locator,
        ))
    }

    /// Create a manager from already-resolved parts.
    pub fn with_locator(
        source: Arc<dyn UpdateSource>,
        options: UpdateOptions,
        locator: Locator,
    ) -> Self {
        let patcher = Arc::new(UpdaterPatcher::new(locator.update_exe_path()));
        tracing::debug!(
            app_id = locator.app_id(),
            version = %locator.version(),
            "update manager created"
        );
        Self {
            locator: Arc::new(locator),
            options,
            source,
            patcher,
        }
    }

    /// Replace the delta patcher.
    #[must_use]
    pub fn with_patcher(mut self, patcher: Arc<dyn DeltaPatcher>) -> Self {
        self.patcher = patcher;
        self
    }

    /// Installed version string.
    pub fn current_version(&self) -> String {
        self.locator.version().to_string()
    }

    /// Installed package id.
    pub fn app_id(&self) -> String {
        self.locator.app_id().to_owned()
    }

    /// Whether the install is portable. Always `true` outside Windows.
    pub fn is_portable(&self) -> bool {
        self.locator.is_portable()
    }

    /// The layout this manager operates on.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Options the manager was constructed with.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Channel that will be checked.
    pub fn channel(&self) -> String {
        self.options.resolve_channel(self.locator.manifest_channel())
    }

    /// Fetch the release feed for [`UpdateManager::channel`].
    ///
    /// # Errors
    ///
    /// Propagates source errors.
    pub fn get_release_feed(&self) -> Result<AssetFeed> {
        self.source
            .get_release_feed(&self.channel(), self.locator.manifest())
    }

    /// A downloaded full package newer than the installed version, if any.
    pub fn get_update_pending_restart(&self) -> Option<Asset> {
        let (path, manifest) = locator::find_latest_full_package(self.locator.packages_dir())?;
        if manifest.version <= *self.locator.version() {
            return None;
        }
        Some(Asset {
            package_id: manifest.id,
            version: manifest.version.to_string(),
            kind: AssetKind::Full,
            file_name: path.file_name()?.to_string_lossy().into_owned(),
            sha1: String::new(),
            sha256: download::sha256_file(&path).unwrap_or_default(),
            size: path.metadata().map(|m| m.len()).unwrap_or(0),
            notes_markdown: manifest.release_notes,
            notes_html: manifest.release_notes_html,
        })
    }

    /// Check the feed for an eligible release.
    ///
    /// The newest full release is offered when it is newer than the installed
    /// version; when downgrades are allowed an older release, or the same
    /// version on a different channel, is offered as a downgrade.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::FeedUnavailable`] or [`UpdateError::Parse`]
    /// from the source.
    pub fn check_for_updates(&self) -> Result<UpdateCheck> {
        let channel = self.channel();
        let current = self.locator.version().clone();
        let feed = self.get_release_feed()?;
        if feed.assets.is_empty() {
            tracing::info!(channel, "release feed is empty");
            return Ok(UpdateCheck::RemoteIsEmpty);
        }

        let mut latest: Option<(&Asset, Version)> = None;
        for asset in feed.assets.iter().filter(|a| a.is_full()) {
            let Ok(version) = asset.semver() else {
                tracing::warn!(file = %asset.file_name, version = %asset.version, "skipping release with invalid version");
                continue;
            };
            if latest.as_ref().is_none_or(|(_, best)| version > *best) {
                latest = Some((asset, version));
            }
        }
        let Some((remote, remote_version)) = latest else {
            return Ok(UpdateCheck::RemoteIsEmpty);
        };
        tracing::debug!(file = %remote.file_name, version = %remote_version, "latest remote release");

        let allow_downgrade = self.options.allow_version_downgrade;
        let switching_channel = channel != self.locator.manifest_channel();

        if remote_version > current {
            let deltas = delta::select_chain(
                &feed.assets,
                &current,
                &remote_version,
                remote.size,
                self.options.maximum_deltas_before_fallback,
            );
            tracing::info!(
                from = %current,
                to = %remote_version,
                deltas = deltas.len(),
                "update available"
            );
            Ok(UpdateCheck::UpdateAvailable(UpdateInfo {
                target_full_release: remote.clone(),
                is_downgrade: false,
                deltas_to_target: deltas,
            }))
        } else if remote_version < current && allow_downgrade {
            tracing::info!(from = %current, to = %remote_version, "older release available, downgrade allowed");
            Ok(UpdateCheck::UpdateAvailable(UpdateInfo::full_only(
                remote.clone(),
                true,
            )))
        } else if remote_version == current && allow_downgrade && switching_channel {
            tracing::info!(version = %current, channel, "same version on another channel");
            Ok(UpdateCheck::UpdateAvailable(UpdateInfo::full_only(
                remote.clone(),
                true,
            )))
        } else {
            tracing::info!(version = %current, "no update available");
            Ok(UpdateCheck::NoUpdateAvailable)
        }
    }

    /// Download `info` into the packages directory.
    ///
    /// # Errors
    ///
    /// See [`UpdateManager::download_updates_with_cancel`].
    pub fn download_updates(&self, info: &UpdateInfo, progress: Option<ProgressSink>) -> Result<()> {
        self.download_updates_with_cancel(info, progress, &CancellationToken::new())
    }

    /// Download `info` into the packages directory, honouring `cancel`.
    ///
    /// Progress is non-decreasing across the whole call and ends at 100 on
    /// success. Nothing partial is left in the packages directory on any
    /// exit path.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::InvalidArgument`] for empty or stale update info, or
    ///   an asset whose file name is not a plain file name.
    /// - [`UpdateError::LockContention`] if another update holds the lock.
    /// - [`UpdateError::DownloadFailed`] if the full package cannot be fetched
    ///   or fails verification.
    /// - [`UpdateError::Cancelled`] if `cancel` fires.
    pub fn download_updates_with_cancel(
        &self,
        info: &UpdateInfo,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.validate(info)?;
        let packages_dir = self.locator.packages_dir();
        std::fs::create_dir_all(packages_dir)?;
        let _lock = UpdateLock::try_acquire(&self.locator.lock_path())?;

        download::remove_stale_downloads(packages_dir);
        let tracker = ProgressTracker::new(progress);
        tracker.report(0);

        let target = &info.target_full_release;
        let target_path = self.locator.package_path(&target.file_name);
        if target_path.exists() && download::verify_package(&target_path, target).is_ok() {
            tracing::info!(path = %target_path.display(), "package already downloaded");
            tracker.complete();
            return Ok(());
        }

        let mut done = false;
        if !info.deltas_to_target.is_empty() {
            match self.download_via_deltas(info, &target_path, &tracker, cancel) {
                Ok(()) => done = true,
                Err(UpdateError::Cancelled) => return Err(UpdateError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "delta update failed, falling back to full package");
                }
            }
        }

        if !done {
            check_cancel(cancel)?;
            let segment = tracker.segment(tracker.current(), 100);
            let partial = PartialFile::new(&target_path);
            self.source
                .download_release_entry(target, partial.path(), &segment, cancel)?;
            download::verify_package(partial.path(), target)?;
            partial.persist()?;
        }

        tracing::info!(path = %target_path.display(), "package ready");
        tracker.complete();
        self.remove_other_packages(&target_path);
        Ok(())
    }

    fn validate(&self, info: &UpdateInfo) -> Result<()> {
        let target = &info.target_full_release;
        if target.file_name.is_empty() || !target.is_full() {
            return Err(UpdateError::InvalidArgument(
                "update info has no full target release".to_owned(),
            ));
        }
        target.check_file_name()?;
        for delta in &info.deltas_to_target {
            delta.check_file_name()?;
        }
        let version = target.semver()?;
        let current = self.locator.version();
        if !info.is_downgrade && version <= *current {
            return Err(UpdateError::InvalidArgument(format!(
                "update info is stale: {version} is not newer than installed {current}"
            )));
        }
        if !target.package_id.is_empty() && !target.package_id.eq_ignore_ascii_case(self.locator.app_id()) {
            return Err(UpdateError::InvalidArgument(format!(
                "update info is for '{}', not '{}'",
                target.package_id,
                self.locator.app_id()
            )));
        }
        Ok(())
    }

    fn download_via_deltas(
        &self,
        info: &UpdateInfo,
        target_path: &Path,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let packages_dir = self.locator.packages_dir();
        let mut base = locator::find_full_package(packages_dir, self.locator.version())
            .ok_or_else(|| {
                UpdateError::DownloadFailed(format!(
                    "no local base package for {}",
                    self.locator.version()
                ))
            })?;

        // Removed on drop, including on early return.
        let staging = tempfile::Builder::new()
            .prefix(download::STAGING_PREFIX)
            .tempdir_in(packages_dir)?;
        let steps = info.deltas_to_target.len();

        for (i, delta_asset) in info.deltas_to_target.iter().enumerate() {
            check_cancel(cancel)?;
            let (lo, hi) = ProgressTracker::split(0, DELTA_PROGRESS_END, steps, i);
            let mid = lo + (hi - lo) / 4 * 3;

            tracing::info!(file = %delta_asset.file_name, step = i + 1, steps, "downloading delta");
            let delta_path = staging.path().join(&delta_asset.file_name);
            self.source.download_release_entry(
                delta_asset,
                &delta_path,
                &tracker.segment(lo, mid),
                cancel,
            )?;
            download::verify_package(&delta_path, delta_asset)?;

            check_cancel(cancel)?;
            let output = staging.path().join(format!("step-{i}.nupkg"));
            self.patcher.apply(&base, &delta_path, &output)?;
            tracker.report(hi);
            base = output;
        }

        download::verify_package(&base, &info.target_full_release)?;
        std::fs::rename(&base, target_path)?;
        Ok(())
    }

    fn remove_other_packages(&self, keep: &Path) {
        let Ok(entries) = std::fs::read_dir(self.locator.packages_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_package = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("nupkg"));
            if is_package && path != keep {
                tracing::info!(path = %path.display(), "removing old package");
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove old package");
                }
            }
        }
    }

    /// Launch the updater to apply `asset` once this process exits, then
    /// restart the app with `restart_args`. The caller is expected to exit.
    ///
    /// # Errors
    ///
    /// See [`UpdateManager::wait_exit_then_apply_updates`].
    pub fn apply_updates_and_restart<A, I, S>(&self, asset: A, restart_args: I) -> Result<()>
    where
        A: AsRef<Asset>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.wait_exit_then_apply_updates(asset, false, true, restart_args)
    }

    /// Launch the updater to apply `asset` once this process exits, without
    /// restarting. The caller is expected to exit.
    ///
    /// # Errors
    ///
    /// See [`UpdateManager::wait_exit_then_apply_updates`].
    pub fn apply_updates_and_exit<A: AsRef<Asset>>(&self, asset: A) -> Result<()> {
        self.wait_exit_then_apply_updates(asset, false, false, std::iter::empty::<&str>())
    }

    /// Launch the updater, which waits for this process to exit, applies
    /// `asset`, and optionally restarts the app.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::InvalidArgument`] if the asset's file name is not a
    ///   plain file name.
    /// - [`UpdateError::ApplyFailed`] if the package is missing or the updater
    ///   cannot be launched.
    pub fn wait_exit_then_apply_updates<A, I, S>(
        &self,
        asset: A,
        silent: bool,
        restart: bool,
        restart_args: I,
    ) -> Result<()>
    where
        A: AsRef<Asset>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let asset = asset.as_ref();
        asset.check_file_name()?;
        let package = self.locator.package_path(&asset.file_name);
        if asset.file_name.is_empty() || !package.is_file() {
            return Err(UpdateError::ApplyFailed(format!(
                "package {} is not downloaded",
                package.display()
            )));
        }
        let args = apply_args(std::process::id(), &package, silent, restart, restart_args);
        let updater = self.locator.update_exe_path();
        tracing::info!(updater = %updater.display(), ?args, "launching updater");

        let mut cmd = std::process::Command::new(updater);
        cmd.args(&args).current_dir(self.locator.root_dir());
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd.spawn().map_err(|e| {
            UpdateError::ApplyFailed(format!("cannot launch {}: {e}", updater.display()))
        })?;
        Ok(())
    }

    /// [`UpdateManager::check_for_updates`] on a blocking worker.
    ///
    /// # Errors
    ///
    /// As the blocking variant.
    pub async fn check_for_updates_async(&self) -> Result<UpdateCheck> {
        let this = self.clone();
        join_blocking(tokio::task::spawn_blocking(move || this.check_for_updates()).await)
    }

    /// [`UpdateManager::download_updates_with_cancel`] on a blocking worker.
    /// Progress is forwarded over `progress` so the caller can consume it on
    /// its own task.
    ///
    /// # Errors
    ///
    /// As the blocking variant.
    pub async fn download_updates_async(
        &self,
        info: UpdateInfo,
        progress: Option<tokio::sync::mpsc::UnboundedSender<u8>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let this = self.clone();
        let sink = progress.map(|tx| -> ProgressSink {
            Arc::new(move |p| {
                // Receiver gone means nobody is watching; keep downloading.
                let _ = tx.send(p);
            })
        });
        join_blocking(
            tokio::task::spawn_blocking(move || {
                this.download_updates_with_cancel(&info, sink, &cancel)
            })
            .await,
        )
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }
    Ok(())
}

fn join_blocking<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(UpdateError::Cancelled),
    }
}

/// Updater command line:
/// `apply --waitPid <pid> --package <path> [--silent] [--norestart] [-- args...]`.
pub fn apply_args<I, S>(
    pid: u32,
    package: &Path,
    silent: bool,
    restart: bool,
    restart_args: I,
) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = vec![
        "apply".to_owned(),
        "--waitPid".to_owned(),
        pid.to_string(),
        "--package".to_owned(),
        package.to_string_lossy().into_owned(),
    ];
    if silent {
        args.push("--silent".to_owned());
    }
    if !restart {
        args.push("--norestart".to_owned());
    }
    let extra: Vec<String> = restart_args
        .into_iter()
        .map(|a| a.as_ref().to_owned())
        .collect();
    if !extra.is_empty() {
        args.push("--".to_owned());
        args.extend(extra);
    }
    args
}
