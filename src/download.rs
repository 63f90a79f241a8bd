//! Blocking HTTP transfer, package verification and partial-file handling.
//!
//! Bytes are always written to `<name>.partial` first and only renamed into
//! place once complete. A [`PartialFile`] guard removes the partial file on
//! every exit path that does not reach [`PartialFile::persist`].

use crate::asset::Asset;
use crate::error::{Result, UpdateError};
use crate::progress::ProgressSink;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const USER_AGENT: &str = concat!("updraft/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;
/// Progress is only forwarded on multiples of this step.
const PROGRESS_STEP: u8 = 5;
/// Extension of in-flight downloads.
pub const PARTIAL_EXTENSION: &str = "partial";

/// Name prefix of the scratch directories delta downloads are staged in.
pub const STAGING_PREFIX: &str = ".updraft-staging-";

/// Shared agent settings for feed and package requests.
pub fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(300))
        .build()
}

/// GET `url` and return the whole body. Feeds carrying release notes for
/// every version can be large, so the body is read without a size cap.
///
/// # Errors
///
/// Returns [`UpdateError::FeedUnavailable`] on transport errors and non-2xx
/// responses.
pub fn fetch_bytes(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    tracing::debug!(url, "fetching");
    let resp = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                UpdateError::FeedUnavailable(format!("{url} returned HTTP {code}"))
            }
            ureq::Error::Transport(t) => UpdateError::FeedUnavailable(format!("{url}: {t}")),
        })?;
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| UpdateError::FeedUnavailable(format!("reading {url}: {e}")))?;
    Ok(body)
}

/// Stream `url` into `dest`, reporting progress in 5% steps.
///
/// # Errors
///
/// Returns [`UpdateError::DownloadFailed`] on transport or write errors, or
/// [`UpdateError::Cancelled`] if `cancel` fires mid-transfer.
pub fn download_to_file(
    agent: &ureq::Agent,
    url: &str,
    dest: &Path,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::info!(url, dest = %dest.display(), "downloading");
    let resp = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| UpdateError::DownloadFailed(format!("{url}: {e}")))?;

    let total = resp
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok());
    let mut reader = resp.into_reader();
    let mut file = std::fs::File::create(dest).map_err(|e| {
        UpdateError::DownloadFailed(format!("cannot create {}: {e}", dest.display()))
    })?;

    copy_with_progress(&mut reader, &mut file, total, progress, cancel)?;
    file.sync_all()
        .map_err(|e| UpdateError::DownloadFailed(format!("flush {}: {e}", dest.display())))?;
    Ok(())
}

/// Copy `reader` to `writer` in chunks, checking `cancel` between chunks.
///
/// # Errors
///
/// Returns [`UpdateError::DownloadFailed`] on read/write errors or
/// [`UpdateError::Cancelled`].
pub fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: Option<u64>,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied: u64 = 0;
    let mut last_step: u8 = 0;
    progress(0);

    loop {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(UpdateError::DownloadFailed(format!("read: {e}"))),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| UpdateError::DownloadFailed(format!("write: {e}")))?;
        copied += n as u64;

        if let Some(total) = total.filter(|t| *t > 0) {
            let pct = u8::try_from((copied.min(total) * 100) / total).unwrap_or(100);
            let step = pct - pct % PROGRESS_STEP;
            if step > last_step {
                last_step = step;
                progress(step);
            }
        }
    }
    progress(100);
    Ok(copied)
}

/// Lowercase hex SHA-256 of a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Check a downloaded package against the asset's `Size` (when non-zero)
/// and `SHA256` (when present).
///
/// # Errors
///
/// Returns [`UpdateError::DownloadFailed`] on mismatch.
pub fn verify_package(path: &Path, asset: &Asset) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| {
        UpdateError::DownloadFailed(format!("{} missing after download: {e}", path.display()))
    })?;
    if asset.size > 0 && meta.len() != asset.size {
        return Err(UpdateError::DownloadFailed(format!(
            "{}: size {} does not match expected {}",
            asset.file_name,
            meta.len(),
            asset.size
        )));
    }
    if !asset.sha256.is_empty() {
        let actual = sha256_file(path)?;
        if !actual.eq_ignore_ascii_case(&asset.sha256) {
            return Err(UpdateError::DownloadFailed(format!(
                "{}: SHA256 mismatch (expected {}, got {actual})",
                asset.file_name, asset.sha256
            )));
        }
    }
    Ok(())
}

/// In-flight download target. Removed on drop unless persisted.
#[derive(Debug)]
pub struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
    persisted: bool,
}

impl PartialFile {
    /// Reserve `<target>.partial` for writing.
    pub fn new(target: &Path) -> Self {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(PARTIAL_EXTENSION);
        Self {
            partial: target.with_file_name(name),
            target: target.to_path_buf(),
            persisted: false,
        }
    }

    /// Path bytes should be written to.
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// Rename the partial file onto its final name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the rename fails; the partial file is still
    /// removed on drop.
    pub fn persist(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.partial, &self.target)?;
        self.persisted = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.persisted && self.partial.exists() {
            if let Err(e) = std::fs::remove_file(&self.partial) {
                tracing::warn!(path = %self.partial.display(), error = %e, "could not remove partial download");
            }
        }
    }
}

/// Delete leftover `*.partial` files and delta staging directories from an
/// interrupted run. Callers hold the update lock so no live download is hit.
pub fn remove_stale_downloads(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let result = if file_type.is_dir() {
            if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            tracing::info!(path = %path.display(), "removing stale staging directory");
            std::fs::remove_dir_all(&path)
        } else {
            let partial = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(PARTIAL_EXTENSION));
            if !partial {
                continue;
            }
            tracing::info!(path = %path.display(), "removing stale partial download");
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "could not remove stale download");
        }
    }
}
