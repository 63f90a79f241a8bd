//! Process-wide callback registry.
//!
//! Native code (the C ABI, the custom-callback source) never holds closures
//! directly. It holds a [`Handle`], an opaque integer that maps to a tagged
//! [`Callback`] in a global table:
//!
//! ```text
//! register(cb) ──► Handle ──► invoke_*(handle, ..) ──► release(handle)
//!                   │                                     exactly once
//!                   └── Registration guard releases on drop
//! ```
//!
//! Misuse is a lifetime bug in the caller, not a runtime condition, so it
//! panics: invoking an unknown or released handle, invoking a handle as the
//! wrong kind, and releasing a handle twice.

use crate::asset::Asset;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Opaque handle to a registered callback.
pub type Handle = usize;

/// Fetches the raw feed for a releases file name (e.g. `releases.win.json`).
/// `None` means the feed is unavailable.
pub type FeedFetcherFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Downloads `asset` to the given path, reporting through the progress
/// handle. Returns `false` on failure.
pub type AssetDownloaderFn = Arc<dyn Fn(&Asset, &Path, Handle) -> bool + Send + Sync>;

/// Receives a progress percentage in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Receives the installed application version.
pub type HookFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives `(level, message)` log pairs.
pub type LoggerFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A registered closure, tagged by the role it plays.
#[derive(Clone)]
pub enum Callback {
    /// Release feed retrieval.
    FeedFetcher(FeedFetcherFn),
    /// Asset byte transfer.
    AssetDownloader(AssetDownloaderFn),
    /// Progress sink.
    ProgressReporter(ProgressFn),
    /// Lifecycle hook.
    LifecycleHook(HookFn),
    /// Log sink.
    Logger(LoggerFn),
}

impl Callback {
    fn kind(&self) -> &'static str {
        match self {
            Self::FeedFetcher(_) => "FeedFetcher",
            Self::AssetDownloader(_) => "AssetDownloader",
            Self::ProgressReporter(_) => "ProgressReporter",
            Self::LifecycleHook(_) => "LifecycleHook",
            Self::Logger(_) => "Logger",
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback::{}", self.kind())
    }
}

static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);
static REGISTRY: LazyLock<Mutex<HashMap<Handle, Callback>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<Handle, Callback>> {
    // A panic while holding the lock cannot leave the map half-updated.
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store a callback and return its handle. Handles are never reused.
pub fn register(callback: Callback) -> Handle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    registry().insert(handle, callback);
    handle
}

/// Remove a callback.
///
/// # Panics
///
/// Panics if the handle is unknown or was already released.
pub fn release(handle: Handle) {
    let removed = registry().remove(&handle);
    if removed.is_none() {
        panic!("callback handle {handle} released twice or never registered");
    }
}

/// Whether `handle` is currently registered.
pub fn is_registered(handle: Handle) -> bool {
    registry().contains_key(&handle)
}

/// Number of live registrations.
pub fn live_count() -> usize {
    registry().len()
}

// The entry is cloned out so the table lock is not held while user code
// runs; a downloader may call back into `report_progress` re-entrantly.
fn lookup(handle: Handle) -> Callback {
    let found = registry().get(&handle).cloned();
    match found {
        Some(cb) => cb,
        None => panic!("callback handle {handle} invoked after release or never registered"),
    }
}

fn wrong_kind(handle: Handle, expected: &str, found: &Callback) -> ! {
    panic!(
        "callback handle {handle} is a {}, expected {expected}",
        found.kind()
    )
}

/// Invoke a [`Callback::FeedFetcher`].
///
/// # Panics
///
/// Panics on an unknown handle or a handle of another kind.
pub fn invoke_feed_fetcher(handle: Handle, releases_name: &str) -> Option<String> {
    match lookup(handle) {
        Callback::FeedFetcher(f) => f(releases_name),
        other => wrong_kind(handle, "FeedFetcher", &other),
    }
}

/// Invoke a [`Callback::AssetDownloader`].
///
/// # Panics
///
/// Panics on an unknown handle or a handle of another kind.
pub fn invoke_asset_downloader(
    handle: Handle,
    asset: &Asset,
    dest: &Path,
    progress: Handle,
) -> bool {
    match lookup(handle) {
        Callback::AssetDownloader(f) => f(asset, dest, progress),
        other => wrong_kind(handle, "AssetDownloader", &other),
    }
}

/// Invoke a [`Callback::ProgressReporter`].
///
/// # Panics
///
/// Panics on an unknown handle or a handle of another kind.
pub fn invoke_progress(handle: Handle, percent: u8) {
    match lookup(handle) {
        Callback::ProgressReporter(f) => f(percent),
        other => wrong_kind(handle, "ProgressReporter", &other),
    }
}

/// Invoke a [`Callback::LifecycleHook`].
///
/// # Panics
///
/// Panics on an unknown handle or a handle of another kind.
pub fn invoke_hook(handle: Handle, version: &str) {
    match lookup(handle) {
        Callback::LifecycleHook(f) => f(version),
        other => wrong_kind(handle, "LifecycleHook", &other),
    }
}

/// Invoke a [`Callback::Logger`].
///
/// # Panics
///
/// Panics on an unknown handle or a handle of another kind.
pub fn invoke_logger(handle: Handle, level: &str, message: &str) {
    match lookup(handle) {
        Callback::Logger(f) => f(level, message),
        other => wrong_kind(handle, "Logger", &other),
    }
}

/// Relay progress through a progress token. Out-of-range values are clamped.
pub fn report_progress(token: Handle, percent: i64) {
    invoke_progress(token, clamp_percent(percent));
}

/// Clamp an arbitrary integer into `0..=100`.
pub fn clamp_percent(percent: i64) -> u8 {
    // Clamped to 0..=100, so the cast cannot truncate.
    percent.clamp(0, 100) as u8
}

/// Scoped registration: the handle is released when the guard drops.
#[derive(Debug)]
pub struct Registration {
    handle: Handle,
}

impl Registration {
    /// Register `callback` for the lifetime of the guard.
    pub fn new(callback: Callback) -> Self {
        Self {
            handle: register(callback),
        }
    }

    /// The registered handle. Valid until the guard drops.
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        release(self.handle);
    }
}
