//! Pluggable release sources.
//!
//! An [`UpdateSource`] answers two questions for the update manager: which
//! assets are published on a channel, and what the bytes of one asset are.
//! Built-in sources read a static web host ([`HttpSource`]) or a local
//! directory ([`FileSource`]); [`CallbackSource`] defers both to
//! caller-supplied closures registered through the callback bridge.

pub mod callback;
pub mod file;
pub mod http;

pub use callback::CallbackSource;
pub use file::FileSource;
pub use http::HttpSource;

use crate::asset::{Asset, AssetFeed};
use crate::error::{Result, UpdateError};
use crate::manifest::Manifest;
use crate::progress::ProgressSink;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Provider of release feeds and asset bytes.
pub trait UpdateSource: Send + Sync {
    /// Retrieve the assets published on `channel`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::FeedUnavailable`] on transport failure,
    /// [`UpdateError::Parse`] on a malformed feed.
    fn get_release_feed(&self, channel: &str, app: &Manifest) -> Result<AssetFeed>;

    /// Write the bytes of `asset` to `dest`, reporting 0..100 through
    /// `progress`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::DownloadFailed`] if the bytes cannot be retrieved or
    /// written, [`UpdateError::Cancelled`] if `cancel` fires.
    fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Feed file name for a channel, e.g. `releases.win.json`.
pub fn releases_file_name(channel: &str) -> String {
    format!("releases.{channel}.json")
}

/// Picks [`HttpSource`] for `http(s)://` locations and [`FileSource`]
/// for everything else.
#[derive(Debug, Clone)]
pub enum AutoSource {
    /// Remote static host.
    Http(HttpSource),
    /// Local or network directory.
    File(FileSource),
}

impl AutoSource {
    /// Choose a source from a URL or directory path.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] for an empty location or an
    /// unparseable URL.
    pub fn new(url_or_path: &str) -> Result<Self> {
        let trimmed = url_or_path.trim();
        if trimmed.is_empty() {
            return Err(UpdateError::InvalidArgument(
                "update source location is empty".to_owned(),
            ));
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Http(HttpSource::new(trimmed)?))
        } else {
            Ok(Self::File(FileSource::new(trimmed)))
        }
    }
}

impl UpdateSource for AutoSource {
    fn get_release_feed(&self, channel: &str, app: &Manifest) -> Result<AssetFeed> {
        match self {
            Self::Http(s) => s.get_release_feed(channel, app),
            Self::File(s) => s.get_release_feed(channel, app),
        }
    }

    fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            Self::Http(s) => s.download_release_entry(asset, dest, progress, cancel),
            Self::File(s) => s.download_release_entry(asset, dest, progress, cancel),
        }
    }
}

/// A source with nothing behind it. Useful for managers that only inspect
/// local state such as a pending downloaded update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneSource;

impl UpdateSource for NoneSource {
    fn get_release_feed(&self, _channel: &str, _app: &Manifest) -> Result<AssetFeed> {
        Err(UpdateError::FeedUnavailable(
            "no update source is configured".to_owned(),
        ))
    }

    fn download_release_entry(
        &self,
        asset: &Asset,
        _dest: &Path,
        _progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(UpdateError::DownloadFailed(format!(
            "no update source is configured to fetch {}",
            asset.file_name
        )))
    }
}
