//! Updraft: self-update client for installed desktop applications.
//!
//! An application asks an [`UpdateManager`] whether a newer release exists
//! in its feed, downloads it (reconstructing it from delta packages when
//! possible), and hands off to the external updater binary to apply it.
//!
//! # Architecture
//!
//! - **Sources** ([`sources`]): where feeds and packages come from, over
//!   HTTP, a local directory, or host-supplied callbacks
//! - **Manager** ([`manager`]): update policy, download orchestration, the
//!   cross-process lock ([`lock`]) and updater hand-off
//! - **App** ([`app`]): startup hooks for install, update, uninstall and
//!   first-run activations
//! - **Bridge** ([`bridge`]): handle registry that lets foreign callers
//!   supply callbacks, used by the C ABI in [`ffi`]
//!
//! ```no_run
//! use updraft::{App, UpdateManager, sources::AutoSource};
//!
//! # fn main() -> updraft::Result<()> {
//! App::build().run()?;
//! let manager = UpdateManager::new(AutoSource::new("https://example.com/releases")?, None, None)?;
//! if let Some(info) = manager.check_for_updates()?.into_update() {
//!     manager.download_updates(&info, None)?;
//!     manager.apply_updates_and_restart(&info, std::iter::empty::<&str>())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod asset;
pub mod bridge;
pub mod config;
pub mod delta;
pub mod download;
pub mod error;
pub mod ffi;
pub mod locator;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod progress;
pub mod sources;

pub use app::{App, HookKind};
pub use asset::{Asset, AssetFeed, AssetKind, UpdateCheck, UpdateInfo};
pub use config::{UpdateOptions, UpdaterConfig};
pub use error::{Result, UpdateError};
pub use locator::{Locator, LocatorConfig};
pub use manager::UpdateManager;
pub use manifest::Manifest;
pub use progress::ProgressSink;
pub use sources::{CallbackSource, FileSource, HttpSource, UpdateSource};
