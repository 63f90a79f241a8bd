//! Release assets, feeds and update check results.
//!
//! The wire format mirrors the `releases.{channel}.json` feed published next
//! to the packages: a single `Assets` array of PascalCase records.

use crate::error::{Result, UpdateError};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Whether a package holds a complete release or a patch against the
/// previous release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Complete package.
    #[default]
    Full,
    /// Binary delta from the immediately preceding release.
    Delta,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "Full"),
            Self::Delta => write!(f, "Delta"),
        }
    }
}

impl Serialize for AssetKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// Feeds in the wild use "Full", "full" and "FULL" interchangeably.
impl<'de> Deserialize<'de> for AssetKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.eq_ignore_ascii_case("full") {
            Ok(Self::Full)
        } else if raw.eq_ignore_ascii_case("delta") {
            Ok(Self::Delta)
        } else {
            Err(serde::de::Error::custom(format!("unknown asset type '{raw}'")))
        }
    }
}

/// One downloadable package listed in a release feed.
///
/// Immutable once received from a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    /// Package id of the application this release belongs to.
    #[serde(rename = "PackageId")]
    pub package_id: String,
    /// Semantic version string of the release.
    #[serde(rename = "Version")]
    pub version: String,
    /// Full package or delta.
    #[serde(rename = "Type")]
    pub kind: AssetKind,
    /// File name of the package, relative to the feed location.
    #[serde(rename = "FileName")]
    pub file_name: String,
    /// SHA-1 checksum as published by the packager (informational).
    #[serde(rename = "SHA1")]
    pub sha1: String,
    /// SHA-256 checksum; verified after download when present.
    #[serde(rename = "SHA256")]
    pub sha256: String,
    /// Package size in bytes; verified after download when non-zero.
    #[serde(rename = "Size")]
    pub size: u64,
    /// Release notes in markdown.
    #[serde(rename = "NotesMarkdown")]
    pub notes_markdown: String,
    /// Release notes rendered to HTML.
    #[serde(rename = "NotesHtml")]
    pub notes_html: String,
}

impl Asset {
    /// Parse the version string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::UpdateError::Parse`] if the version is not valid semver.
    pub fn semver(&self) -> Result<Version> {
        Ok(Version::parse(self.version.trim_start_matches('v'))?)
    }

    /// Returns `true` for full packages.
    pub fn is_full(&self) -> bool {
        self.kind == AssetKind::Full
    }

    /// Returns `true` for delta packages.
    pub fn is_delta(&self) -> bool {
        self.kind == AssetKind::Delta
    }

    /// Ensure `file_name` resolves to an entry directly inside the packages
    /// directory or feed location.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if it is not a plain file name.
    pub fn check_file_name(&self) -> Result<()> {
        if is_plain_file_name(&self.file_name) {
            Ok(())
        } else {
            Err(UpdateError::InvalidArgument(format!(
                "asset file name '{}' is not a plain file name",
                self.file_name
            )))
        }
    }
}

/// A single path component with no separators, drive, query or fragment
/// characters, and not `.` or `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '?' | '#' | '%') || c.is_control())
}

impl AsRef<Asset> for Asset {
    fn as_ref(&self) -> &Asset {
        self
    }
}

/// A release feed for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFeed {
    /// Every asset published on the channel, full and delta.
    #[serde(rename = "Assets")]
    pub assets: Vec<Asset>,
}

impl AssetFeed {
    /// Parse a feed from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::UpdateError::Parse`] on malformed JSON or when an
    /// asset's file name is not a plain file name.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let feed: Self = serde_json::from_slice(bytes)?;
        if let Some(bad) = feed.assets.iter().find(|a| !is_plain_file_name(&a.file_name)) {
            return Err(UpdateError::Parse(format!(
                "feed lists unsafe file name '{}'",
                bad.file_name
            )));
        }
        Ok(feed)
    }

    /// Find an asset by file name (case-insensitive).
    pub fn find(&self, file_name: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.file_name.eq_ignore_ascii_case(file_name))
    }
}

/// The outcome of a successful check: what to download and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateInfo {
    /// The full release being updated to.
    #[serde(rename = "TargetFullRelease")]
    pub target_full_release: Asset,
    /// `true` when moving to an older (or same, cross-channel) version.
    #[serde(rename = "IsDowngrade")]
    pub is_downgrade: bool,
    /// Ordered delta chain from the installed version to the target.
    /// Empty when only a full download is possible.
    #[serde(rename = "DeltasToTarget")]
    pub deltas_to_target: Vec<Asset>,
}

impl UpdateInfo {
    /// An update that can only be satisfied by the full package.
    pub fn full_only(target: Asset, is_downgrade: bool) -> Self {
        Self {
            target_full_release: target,
            is_downgrade,
            deltas_to_target: Vec::new(),
        }
    }
}

impl AsRef<Asset> for UpdateInfo {
    fn as_ref(&self) -> &Asset {
        &self.target_full_release
    }
}

/// Result of [`crate::UpdateManager::check_for_updates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// The feed contained no usable full releases.
    RemoteIsEmpty,
    /// The feed had releases, none of them eligible.
    NoUpdateAvailable,
    /// An eligible release was found.
    UpdateAvailable(UpdateInfo),
}

impl UpdateCheck {
    /// Collapse to `Some(info)` when an update is available.
    pub fn into_update(self) -> Option<UpdateInfo> {
        match self {
            Self::UpdateAvailable(info) => Some(info),
            Self::RemoteIsEmpty | Self::NoUpdateAvailable => None,
        }
    }
}
