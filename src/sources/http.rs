//! Static web host source.

use super::{UpdateSource, releases_file_name};
use crate::asset::{Asset, AssetFeed};
use crate::download;
use crate::error::{Result, UpdateError};
use crate::manifest::Manifest;
use crate::progress::ProgressSink;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Reads `{base}/releases.{channel}.json` and `{base}/{FileName}` over HTTP.
///
/// The feed request carries `localVersion` and `id` query parameters so a
/// server can tailor its answer to the requesting install.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base: Url,
    agent: ureq::Agent,
}

impl HttpSource {
    /// Create a source rooted at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `url` is not a valid URL.
    pub fn new(url: &str) -> Result<Self> {
        // join() replaces the last segment unless the base ends with '/'.
        let normalized = format!("{}/", url.trim().trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| UpdateError::InvalidArgument(format!("invalid source URL '{url}': {e}")))?;
        Ok(Self {
            base,
            agent: download::http_agent(),
        })
    }

    /// Base URL all requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn feed_url(&self, channel: &str, app: &Manifest) -> Result<Url> {
        let mut url = self
            .base
            .join(&releases_file_name(channel))
            .map_err(|e| UpdateError::FeedUnavailable(format!("feed URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("localVersion", &app.version.to_string())
            .append_pair("id", &app.id);
        Ok(url)
    }

    fn asset_url(&self, asset: &Asset) -> Result<Url> {
        asset.check_file_name()?;
        self.base
            .join(&asset.file_name)
            .map_err(|e| UpdateError::DownloadFailed(format!("asset URL: {e}")))
    }
}

impl UpdateSource for HttpSource {
    fn get_release_feed(&self, channel: &str, app: &Manifest) -> Result<AssetFeed> {
        let url = self.feed_url(channel, app)?;
        tracing::info!(channel, url = %url, "downloading release feed");
        let body = download::fetch_bytes(&self.agent, url.as_str())?;
        tracing::debug!(bytes = body.len(), "release feed received");
        AssetFeed::from_slice(&body)
    }

    fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = self.asset_url(asset)?;
        download::download_to_file(&self.agent, url.as_str(), dest, progress, cancel)
    }
}
