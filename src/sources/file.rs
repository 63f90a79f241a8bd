//! Local directory source.

use super::{UpdateSource, releases_file_name};
use crate::asset::{Asset, AssetFeed};
use crate::download;
use crate::error::{Result, UpdateError};
use crate::manifest::Manifest;
use crate::progress::ProgressSink;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Reads a releases directory on a local or network-attached disk. The
/// directory holds `releases.{channel}.json` next to the packages it lists.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    /// Create a source rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The releases directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl UpdateSource for FileSource {
    fn get_release_feed(&self, channel: &str, _app: &Manifest) -> Result<AssetFeed> {
        let path = self.dir.join(releases_file_name(channel));
        tracing::info!(channel, path = %path.display(), "reading release feed");
        let bytes = std::fs::read(&path).map_err(|e| {
            UpdateError::FeedUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        AssetFeed::from_slice(&bytes)
    }

    fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        asset.check_file_name()?;
        let src = self.dir.join(&asset.file_name);
        tracing::info!(src = %src.display(), dest = %dest.display(), "copying package");
        let mut reader = std::fs::File::open(&src).map_err(|e| {
            UpdateError::DownloadFailed(format!("cannot open {}: {e}", src.display()))
        })?;
        let total = reader.metadata().map(|m| m.len()).ok();
        let mut writer = std::fs::File::create(dest).map_err(|e| {
            UpdateError::DownloadFailed(format!("cannot create {}: {e}", dest.display()))
        })?;
        download::copy_with_progress(&mut reader, &mut writer, total, progress, cancel)?;
        Ok(())
    }
}
