//! Source backed by caller-supplied closures.
//!
//! Both closures are registered with the callback bridge for the lifetime of
//! the source. Each download registers a progress token for exactly the
//! duration of the downloader call, so a downloader relays progress with
//! [`crate::bridge::report_progress`] while it runs and must not use the
//! token after returning.

use super::{UpdateSource, releases_file_name};
use crate::asset::{Asset, AssetFeed};
use crate::bridge::{self, AssetDownloaderFn, Callback, FeedFetcherFn, Registration};
use crate::error::{Result, UpdateError};
use crate::manifest::Manifest;
use crate::progress::ProgressSink;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Defers feed retrieval and asset transfer to registered closures.
#[derive(Debug)]
pub struct CallbackSource {
    feed: Registration,
    download: Registration,
}

impl CallbackSource {
    /// Build a source from a feed fetcher and an asset downloader.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if either closure is missing.
    pub fn new(feed: Option<FeedFetcherFn>, download: Option<AssetDownloaderFn>) -> Result<Self> {
        let feed = feed.ok_or_else(|| {
            UpdateError::InvalidArgument("custom source requires a feed function".to_owned())
        })?;
        let download = download.ok_or_else(|| {
            UpdateError::InvalidArgument("custom source requires a download function".to_owned())
        })?;
        Ok(Self {
            feed: Registration::new(Callback::FeedFetcher(feed)),
            download: Registration::new(Callback::AssetDownloader(download)),
        })
    }
}

impl UpdateSource for CallbackSource {
    fn get_release_feed(&self, channel: &str, _app: &Manifest) -> Result<AssetFeed> {
        let name = releases_file_name(channel);
        tracing::info!(channel, "requesting release feed from custom source");
        let json = bridge::invoke_feed_fetcher(self.feed.handle(), &name).ok_or_else(|| {
            UpdateError::FeedUnavailable(format!("custom feed function returned nothing for {name}"))
        })?;
        AssetFeed::from_slice(json.as_bytes())
    }

    fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let token = Registration::new(Callback::ProgressReporter(progress.clone()));
        let ok = bridge::invoke_asset_downloader(self.download.handle(), asset, dest, token.handle());
        drop(token);

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        if !ok {
            return Err(UpdateError::DownloadFailed(format!(
                "custom download function failed for {}",
                asset.file_name
            )));
        }
        Ok(())
    }
}
