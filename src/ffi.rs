//! C ABI surface for embedding the update client in native hosts.
//!
//! Three opaque handle kinds cross the boundary: update sources, update
//! managers and update infos. Each is created by one `updraft_new_*` (or
//! `updraft_check_for_updates`) call and must be released exactly once with
//! the matching `updraft_free_*`.
//!
//! # Lifecycle
//!
//! ```text
//! updraft_app_set_hook_*(cb, user_data)       (optional, before app_run)
//! updraft_app_run()
//! updraft_new_update_manager(url, options, locator, &mgr)
//! updraft_check_for_updates(mgr, &info) → 0 update | 1 none | 2 empty | -1 error
//! updraft_download_updates(mgr, info, progress_cb, user_data)
//! updraft_wait_exit_then_apply_update(mgr, info, silent, restart, args, n)
//! updraft_free_update_info(info)
//! updraft_free_update_manager(mgr)
//! ```
//!
//! Failing calls return null/false/-1 and leave a message retrievable with
//! `updraft_get_last_error` on the same thread. Strings returned to the
//! caller are freed with `updraft_string_free`.
//!
//! # Threads
//!
//! `updraft_download_updates` runs the transfer on a worker and delivers
//! progress callbacks on the calling thread before it returns.

use std::ffi::{CStr, CString, c_char, c_void};
use std::cell::RefCell;
use std::sync::{Arc, LazyLock, Mutex};

use crate::app::{App, HookKind};
use crate::asset::{Asset, UpdateCheck, UpdateInfo};
use crate::bridge::{self, AssetDownloaderFn, FeedFetcherFn, Handle};
use crate::config::{LogConfig, UpdateOptions};
use crate::error::{Result, UpdateError};
use crate::locator::LocatorConfig;
use crate::manager::UpdateManager;
use crate::sources::{AutoSource, CallbackSource, FileSource, HttpSource, UpdateSource};
use tokio_util::sync::CancellationToken;

// ── Types ──────────────────────────────────────────────────────────────────

/// Progress notification, `progress` in `0..=100`.
pub type UpdraftProgressCallback = unsafe extern "C" fn(user_data: *mut c_void, progress: i16);

/// Lifecycle hook receiving the application version.
pub type UpdraftHookCallback = unsafe extern "C" fn(user_data: *mut c_void, app_version: *const c_char);

/// Log sink receiving a lowercase level and a message.
pub type UpdraftLogCallback =
    unsafe extern "C" fn(user_data: *mut c_void, level: *const c_char, message: *const c_char);

/// Custom source: return the feed JSON for `releases_name`, or null.
pub type UpdraftFeedCallback =
    unsafe extern "C" fn(user_data: *mut c_void, releases_name: *const c_char) -> *mut c_char;

/// Custom source: release a string returned by [`UpdraftFeedCallback`].
pub type UpdraftFreeFeedCallback = unsafe extern "C" fn(user_data: *mut c_void, feed: *mut c_char);

/// Custom source: download the asset (JSON) to `local_path`, relaying
/// progress with `updraft_source_report_progress(progress_token, ..)`.
pub type UpdraftDownloadCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    asset_json: *const c_char,
    local_path: *const c_char,
    progress_token: usize,
) -> bool;

/// Caller-owned context pointer carried into closures.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: the pointer is opaque to Rust and only handed back to the
// caller's own callbacks; the caller guarantees it is usable from any thread
// the callbacks run on.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

struct SourceHandle {
    source: Arc<dyn UpdateSource>,
}

struct ManagerHandle {
    manager: UpdateManager,
    tokio_rt: tokio::runtime::Runtime,
}

// ── Last error ─────────────────────────────────────────────────────────────

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    tracing::error!(%message, "ffi call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.borrow_mut().clear());
}

fn fail<T>(err: &UpdateError, value: T) -> T {
    set_last_error(err.to_string());
    value
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Convert a nullable C string pointer to a `&str`.
///
/// Returns `None` if `ptr` is null or if the bytes are not valid UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a valid null-terminated C string.
unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is null or a valid C string.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Convert a Rust `String` to a C-owned `*mut c_char`.
///
/// The caller must free the returned pointer via `updraft_string_free`.
/// Returns null if the string contains an interior NUL byte.
fn string_to_c(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Parse an optional JSON argument; null or empty means `None`.
///
/// # Safety
///
/// `ptr` must be null or a valid C string.
unsafe fn parse_json_arg<T: serde::de::DeserializeOwned>(
    ptr: *const c_char,
    what: &str,
) -> Result<Option<T>> {
    if ptr.is_null() {
        return Ok(None);
    }
    // SAFETY: caller guarantees ptr is a valid C string.
    let text = unsafe { cstr_to_str(ptr) }
        .ok_or_else(|| UpdateError::InvalidArgument(format!("{what} is not valid UTF-8")))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| UpdateError::InvalidArgument(format!("{what}: {e}")))
}

/// # Safety
///
/// `handle` must be null or a live pointer from an `updraft_new_source_*` call.
unsafe fn borrow_source<'a>(handle: *mut c_void) -> Option<&'a SourceHandle> {
    if handle.is_null() {
        return None;
    }
    // SAFETY: handle was created by Box::into_raw in new_source_handle.
    Some(unsafe { &*(handle as *const SourceHandle) })
}

/// # Safety
///
/// `handle` must be null or a live pointer from `updraft_new_update_manager*`.
unsafe fn borrow_manager<'a>(handle: *mut c_void) -> Option<&'a ManagerHandle> {
    if handle.is_null() {
        return None;
    }
    // SAFETY: handle was created by Box::into_raw in new_manager_handle.
    Some(unsafe { &*(handle as *const ManagerHandle) })
}

/// # Safety
///
/// `handle` must be null or a live pointer from `updraft_check_for_updates`.
unsafe fn borrow_info<'a>(handle: *mut c_void) -> Option<&'a UpdateInfo> {
    if handle.is_null() {
        return None;
    }
    // SAFETY: handle was created by Box::into_raw in updraft_check_for_updates.
    Some(unsafe { &*(handle as *const UpdateInfo) })
}

fn new_source_handle(source: Arc<dyn UpdateSource>) -> *mut c_void {
    clear_last_error();
    Box::into_raw(Box::new(SourceHandle { source })) as *mut c_void
}

fn new_manager_handle(
    source: Arc<dyn UpdateSource>,
    options: Option<UpdateOptions>,
    locator: Option<LocatorConfig>,
) -> Result<*mut c_void> {
    let locator = match locator {
        Some(config) => config.load()?,
        None => crate::locator::auto_locate()?,
    };
    let manager = UpdateManager::with_locator(source, options.unwrap_or_default(), locator);
    let tokio_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(Box::into_raw(Box::new(ManagerHandle { manager, tokio_rt })) as *mut c_void)
}

// ── Sources ────────────────────────────────────────────────────────────────

/// Create an HTTP source rooted at `url`. Returns null on failure.
///
/// # Safety
///
/// `url` must be null or a valid C string. The handle must be released with
/// `updraft_free_source`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_new_source_http(url: *const c_char) -> *mut c_void {
    // SAFETY: caller guarantees url is null or a valid C string.
    let Some(url) = (unsafe { cstr_to_str(url) }) else {
        set_last_error("url is null or not UTF-8");
        return std::ptr::null_mut();
    };
    match HttpSource::new(url) {
        Ok(source) => new_source_handle(Arc::new(source)),
        Err(e) => fail(&e, std::ptr::null_mut()),
    }
}

/// Create a source reading a local releases directory. Returns null on
/// failure.
///
/// # Safety
///
/// `path` must be null or a valid C string. The handle must be released with
/// `updraft_free_source`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_new_source_file(path: *const c_char) -> *mut c_void {
    // SAFETY: caller guarantees path is null or a valid C string.
    match unsafe { cstr_to_str(path) } {
        Some(p) if !p.is_empty() => new_source_handle(Arc::new(FileSource::new(p))),
        _ => {
            set_last_error("path is null, empty or not UTF-8");
            std::ptr::null_mut()
        }
    }
}

/// Create a source that defers to caller callbacks. `feed_fn` and
/// `download_fn` are required; `free_feed_fn` releases strings returned by
/// `feed_fn` and may be null if the caller manages them. Returns null on
/// failure.
///
/// # Safety
///
/// The callbacks and `user_data` must stay valid until the handle is passed
/// to `updraft_free_source` and every manager built from it is freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_new_source_custom_callback(
    feed_fn: Option<UpdraftFeedCallback>,
    free_feed_fn: Option<UpdraftFreeFeedCallback>,
    download_fn: Option<UpdraftDownloadCallback>,
    user_data: *mut c_void,
) -> *mut c_void {
    let ud = UserData(user_data);

    let feed: Option<FeedFetcherFn> = feed_fn.map(|cb| -> FeedFetcherFn {
        Arc::new(move |name: &str| {
            let name = CString::new(name).ok()?;
            // SAFETY: cb and user_data come from the caller, who keeps them
            // valid for the lifetime of the source.
            let raw = unsafe { cb(ud.get(), name.as_ptr()) };
            if raw.is_null() {
                return None;
            }
            // SAFETY: the callback returned a valid C string.
            let json = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
            if let Some(free) = free_feed_fn {
                // SAFETY: raw came from feed_fn and is released exactly once.
                unsafe { free(ud.get(), raw) };
            }
            Some(json)
        })
    });

    let download: Option<AssetDownloaderFn> = download_fn.map(|cb| -> AssetDownloaderFn {
        Arc::new(move |asset: &Asset, dest: &std::path::Path, token: Handle| {
            let Ok(json) = serde_json::to_string(asset) else {
                return false;
            };
            let (Ok(json), Ok(path)) = (
                CString::new(json),
                CString::new(dest.to_string_lossy().into_owned()),
            ) else {
                return false;
            };
            // SAFETY: cb and user_data come from the caller; both strings
            // outlive the call.
            unsafe { cb(ud.get(), json.as_ptr(), path.as_ptr(), token) }
        })
    });

    match CallbackSource::new(feed, download) {
        Ok(source) => new_source_handle(Arc::new(source)),
        Err(e) => fail(&e, std::ptr::null_mut()),
    }
}

/// Relay download progress from a custom download callback. Values outside
/// `0..=100` are clamped. Aborts if `progress_token` is not live.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_source_report_progress(progress_token: usize, progress: i16) {
    bridge::report_progress(progress_token, i64::from(progress));
}

/// Release a source handle. Managers built from it keep their own reference.
///
/// # Safety
///
/// `source` must be null or a handle from `updraft_new_source_*` that has
/// not been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_free_source(source: *mut c_void) {
    if source.is_null() {
        return;
    }
    // SAFETY: source was created by Box::into_raw in new_source_handle.
    drop(unsafe { Box::from_raw(source as *mut SourceHandle) });
}

// ── Update manager ─────────────────────────────────────────────────────────

/// Create a manager for an `http(s)://` URL or a local directory.
///
/// `options_json` (`UpdateOptions`) and `locator_json` (`LocatorConfig`) may
/// be null; a null locator locates the running application. Writes the
/// handle to `out_manager` and returns `true` on success.
///
/// # Safety
///
/// String arguments must be null or valid C strings; `out_manager` must be
/// a valid pointer. The handle must be released with
/// `updraft_free_update_manager`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_new_update_manager(
    url_or_path: *const c_char,
    options_json: *const c_char,
    locator_json: *const c_char,
    out_manager: *mut *mut c_void,
) -> bool {
    if out_manager.is_null() {
        set_last_error("out_manager is null");
        return false;
    }
    // SAFETY: caller guarantees url_or_path is null or a valid C string.
    let Some(location) = (unsafe { cstr_to_str(url_or_path) }) else {
        set_last_error("url_or_path is null or not UTF-8");
        return false;
    };
    let source = match AutoSource::new(location) {
        Ok(s) => Arc::new(s) as Arc<dyn UpdateSource>,
        Err(e) => return fail(&e, false),
    };
    // SAFETY: out_manager was checked for null; strings per caller contract.
    unsafe { finish_new_manager(source, options_json, locator_json, out_manager) }
}

/// Create a manager around an existing source handle. The source handle
/// stays owned by the caller.
///
/// # Safety
///
/// As `updraft_new_update_manager`; `source` must be a live source handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_new_update_manager_with_source(
    source: *mut c_void,
    options_json: *const c_char,
    locator_json: *const c_char,
    out_manager: *mut *mut c_void,
) -> bool {
    if out_manager.is_null() {
        set_last_error("out_manager is null");
        return false;
    }
    // SAFETY: caller guarantees source is a live handle.
    let Some(src) = (unsafe { borrow_source(source) }) else {
        set_last_error("source is null");
        return false;
    };
    let source = Arc::clone(&src.source);
    // SAFETY: out_manager was checked for null; strings per caller contract.
    unsafe { finish_new_manager(source, options_json, locator_json, out_manager) }
}

/// # Safety
///
/// `out_manager` must be non-null and writable; JSON pointers null or valid.
unsafe fn finish_new_manager(
    source: Arc<dyn UpdateSource>,
    options_json: *const c_char,
    locator_json: *const c_char,
    out_manager: *mut *mut c_void,
) -> bool {
    let built = (|| {
        // SAFETY: forwarded caller contract for the JSON pointers.
        let options = unsafe { parse_json_arg::<UpdateOptions>(options_json, "options_json") }?;
        // SAFETY: as above.
        let locator = unsafe { parse_json_arg::<LocatorConfig>(locator_json, "locator_json") }?;
        new_manager_handle(source, options, locator)
    })();
    match built {
        Ok(handle) => {
            clear_last_error();
            // SAFETY: out_manager is non-null and writable per caller contract.
            unsafe { *out_manager = handle };
            true
        }
        Err(e) => fail(&e, false),
    }
}

/// Installed version. Free the result with `updraft_string_free`.
///
/// # Safety
///
/// `manager` must be null or a live manager handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_get_current_version(manager: *mut c_void) -> *mut c_char {
    // SAFETY: caller guarantees manager is null or live.
    match unsafe { borrow_manager(manager) } {
        Some(m) => {
            clear_last_error();
            string_to_c(m.manager.current_version())
        }
        None => {
            set_last_error("manager is null");
            std::ptr::null_mut()
        }
    }
}

/// Installed package id. Free the result with `updraft_string_free`.
///
/// # Safety
///
/// `manager` must be null or a live manager handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_get_app_id(manager: *mut c_void) -> *mut c_char {
    // SAFETY: caller guarantees manager is null or live.
    match unsafe { borrow_manager(manager) } {
        Some(m) => {
            clear_last_error();
            string_to_c(m.manager.app_id())
        }
        None => {
            set_last_error("manager is null");
            std::ptr::null_mut()
        }
    }
}

/// Whether the install is portable.
///
/// # Safety
///
/// `manager` must be null or a live manager handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_is_portable(manager: *mut c_void) -> bool {
    // SAFETY: caller guarantees manager is null or live.
    match unsafe { borrow_manager(manager) } {
        Some(m) => {
            clear_last_error();
            m.manager.is_portable()
        }
        None => {
            set_last_error("manager is null");
            false
        }
    }
}

/// Check for updates.
///
/// Returns 0 and writes an info handle to `out_info` when an update is
/// available, 1 when there is none, 2 when the feed is empty, and -1 on
/// error.
///
/// # Safety
///
/// `manager` must be a live manager handle and `out_info` a valid pointer.
/// A returned info handle must be released with `updraft_free_update_info`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_check_for_updates(
    manager: *mut c_void,
    out_info: *mut *mut c_void,
) -> i32 {
    // SAFETY: caller guarantees manager is null or live.
    let Some(m) = (unsafe { borrow_manager(manager) }) else {
        set_last_error("manager is null");
        return -1;
    };
    if out_info.is_null() {
        set_last_error("out_info is null");
        return -1;
    }
    match m.manager.check_for_updates() {
        Ok(UpdateCheck::UpdateAvailable(info)) => {
            clear_last_error();
            // SAFETY: out_info is non-null and writable per caller contract.
            unsafe { *out_info = Box::into_raw(Box::new(info)) as *mut c_void };
            0
        }
        Ok(UpdateCheck::NoUpdateAvailable) => {
            clear_last_error();
            1
        }
        Ok(UpdateCheck::RemoteIsEmpty) => {
            clear_last_error();
            2
        }
        Err(e) => fail(&e, -1),
    }
}

/// Serialize an update info to JSON. Free the result with
/// `updraft_string_free`.
///
/// # Safety
///
/// `info` must be null or a live info handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_update_info_to_json(info: *mut c_void) -> *mut c_char {
    // SAFETY: caller guarantees info is null or live.
    let Some(info) = (unsafe { borrow_info(info) }) else {
        set_last_error("update info is null");
        return std::ptr::null_mut();
    };
    match serde_json::to_string(info) {
        Ok(json) => {
            clear_last_error();
            string_to_c(json)
        }
        Err(e) => fail(&UpdateError::from(e), std::ptr::null_mut()),
    }
}

/// Download an update. Blocks until done; `progress_cb` (nullable) is
/// invoked on this thread with non-decreasing values ending at 100.
///
/// # Safety
///
/// `manager` and `info` must be live handles; `progress_cb` and `user_data`
/// must be valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_download_updates(
    manager: *mut c_void,
    info: *mut c_void,
    progress_cb: Option<UpdraftProgressCallback>,
    user_data: *mut c_void,
) -> bool {
    // SAFETY: caller guarantees manager is null or live.
    let Some(m) = (unsafe { borrow_manager(manager) }) else {
        set_last_error("manager is null");
        return false;
    };
    // SAFETY: caller guarantees info is null or live.
    let Some(info) = (unsafe { borrow_info(info) }) else {
        let err = UpdateError::InvalidArgument("update info is null".to_owned());
        return fail(&err, false);
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
    let deliver = |p: u8| {
        if let Some(cb) = progress_cb {
            // SAFETY: cb and user_data are valid for this call per contract.
            unsafe { cb(user_data, i16::from(p)) };
        }
    };

    let result = m.tokio_rt.block_on(async {
        let task = m
            .manager
            .download_updates_async(info.clone(), Some(tx), CancellationToken::new());
        tokio::pin!(task);
        let result = loop {
            tokio::select! {
                res = &mut task => break res,
                Some(p) = rx.recv() => deliver(p),
            }
        };
        while let Ok(p) = rx.try_recv() {
            deliver(p);
        }
        result
    });

    match result {
        Ok(()) => {
            clear_last_error();
            true
        }
        Err(e) => fail(&e, false),
    }
}

/// Launch the updater to apply `info` after this process exits. Does not
/// exit the process.
///
/// # Safety
///
/// `manager` and `info` must be live handles; `restart_args` must point to
/// `restart_args_count` valid C strings (or be null with a count of 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_wait_exit_then_apply_update(
    manager: *mut c_void,
    info: *mut c_void,
    silent: bool,
    restart: bool,
    restart_args: *const *const c_char,
    restart_args_count: usize,
) -> bool {
    // SAFETY: caller guarantees manager is null or live.
    let Some(m) = (unsafe { borrow_manager(manager) }) else {
        set_last_error("manager is null");
        return false;
    };
    // SAFETY: caller guarantees info is null or live.
    let Some(info) = (unsafe { borrow_info(info) }) else {
        set_last_error("update info is null");
        return false;
    };
    // SAFETY: forwarded caller contract for the argument array.
    let args = unsafe { c_string_array(restart_args, restart_args_count) };
    match m
        .manager
        .wait_exit_then_apply_updates(&info.target_full_release, silent, restart, &args)
    {
        Ok(()) => {
            clear_last_error();
            true
        }
        Err(e) => fail(&e, false),
    }
}

/// # Safety
///
/// `items` must be null or point to `count` null-or-valid C strings.
unsafe fn c_string_array(items: *const *const c_char, count: usize) -> Vec<String> {
    if items.is_null() {
        return Vec::new();
    }
    // SAFETY: caller guarantees items points to count entries.
    let slice = unsafe { std::slice::from_raw_parts(items, count) };
    slice
        .iter()
        // SAFETY: each entry is null or a valid C string.
        .filter_map(|p| unsafe { cstr_to_str(*p) })
        .map(str::to_owned)
        .collect()
}

/// Release a manager handle.
///
/// # Safety
///
/// `manager` must be null or a live manager handle, freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_free_update_manager(manager: *mut c_void) {
    if manager.is_null() {
        return;
    }
    // SAFETY: manager was created by Box::into_raw in new_manager_handle.
    drop(unsafe { Box::from_raw(manager as *mut ManagerHandle) });
}

/// Release an update info handle.
///
/// # Safety
///
/// `info` must be null or a live info handle, freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_free_update_info(info: *mut c_void) {
    if info.is_null() {
        return;
    }
    // SAFETY: info was created by Box::into_raw in updraft_check_for_updates.
    drop(unsafe { Box::from_raw(info as *mut UpdateInfo) });
}

/// Free a string returned by any `updraft_*` function.
///
/// # Safety
///
/// `s` must be null or a pointer returned by this library, freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: s was created by CString::into_raw in string_to_c.
    drop(unsafe { CString::from_raw(s) });
}

/// Message of the most recent failure on this thread, or null if the last
/// call succeeded. Free the result with `updraft_string_free`.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_get_last_error() -> *mut c_char {
    let message = LAST_ERROR.with(|slot| slot.borrow().clone());
    if message.is_empty() {
        return std::ptr::null_mut();
    }
    string_to_c(message)
}

// ── App lifecycle ──────────────────────────────────────────────────────────

static APP_BUILDER: LazyLock<Mutex<App>> = LazyLock::new(|| Mutex::new(App::build()));

fn update_app(change: impl FnOnce(App) -> App) {
    if crate::app::is_initialized() {
        set_last_error("app hooks cannot change after updraft_app_run");
        return;
    }
    let Ok(mut guard) = APP_BUILDER.lock() else {
        return;
    };
    let app = std::mem::take(&mut *guard);
    *guard = change(app);
    clear_last_error();
}

fn hook_closure(cb: UpdraftHookCallback, user_data: *mut c_void) -> crate::bridge::HookFn {
    let ud = UserData(user_data);
    Arc::new(move |version: &str| {
        let Ok(version) = CString::new(version) else {
            return;
        };
        // SAFETY: cb and user_data were registered by the caller and stay
        // valid for the life of the process.
        unsafe { cb(ud.get(), version.as_ptr()) };
    })
}

fn set_hook(kind: HookKind, cb: Option<UpdraftHookCallback>, user_data: *mut c_void) {
    let Some(cb) = cb else {
        return;
    };
    update_app(|app| app.on_hook(kind, hook_closure(cb, user_data)));
}

/// Hook run right after install (process exits afterwards).
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_after_install(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::AfterInstall, cb, user_data);
}

/// Hook run right before uninstall (process exits afterwards).
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_before_uninstall(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::BeforeUninstall, cb, user_data);
}

/// Hook run in the outgoing version before an update (process exits afterwards).
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_before_update(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::BeforeUpdate, cb, user_data);
}

/// Hook run in the incoming version after an update (process exits afterwards).
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_after_update(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::AfterUpdate, cb, user_data);
}

/// Hook run on the first launch after install.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_first_run(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::FirstRun, cb, user_data);
}

/// Hook run on the first launch after an update restart.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_hook_restarted(
    cb: Option<UpdraftHookCallback>,
    user_data: *mut c_void,
) {
    set_hook(HookKind::Restarted, cb, user_data);
}

/// Receive every log line as `(level, message)`.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_logger(cb: Option<UpdraftLogCallback>, user_data: *mut c_void) {
    let Some(cb) = cb else {
        return;
    };
    let ud = UserData(user_data);
    update_app(|app| {
        app.set_logger(Arc::new(move |level: &str, message: &str| {
            let (Ok(level), Ok(message)) = (CString::new(level), CString::new(message)) else {
                return;
            };
            // SAFETY: cb and user_data were registered by the caller and stay
            // valid for the life of the process.
            unsafe { cb(ud.get(), level.as_ptr(), message.as_ptr()) };
        }))
    });
}

/// Override the arguments `updraft_app_run` inspects.
///
/// # Safety
///
/// `args` must be null or point to `args_count` null-or-valid C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_app_set_args(args: *const *const c_char, args_count: usize) {
    // SAFETY: forwarded caller contract.
    let args = unsafe { c_string_array(args, args_count) };
    update_app(|app| app.set_args(args));
}

/// Use an explicit `LocatorConfig` (JSON) instead of locating the app.
///
/// # Safety
///
/// `locator_json` must be null or a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn updraft_app_set_locator(locator_json: *const c_char) {
    // SAFETY: forwarded caller contract.
    match unsafe { parse_json_arg::<LocatorConfig>(locator_json, "locator_json") } {
        Ok(Some(locator)) => update_app(|app| app.set_locator(locator)),
        Ok(None) => {}
        Err(e) => set_last_error(e.to_string()),
    }
}

/// Apply a downloaded update on startup (default on).
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_set_auto_apply_on_startup(auto_apply: bool) {
    update_app(|app| app.set_auto_apply_on_startup(auto_apply));
}

/// Handle this activation. May exit the process (fast hooks, pending
/// update). Returns `false` if it was already called.
#[unsafe(no_mangle)]
pub extern "C" fn updraft_app_run() -> bool {
    // Best effort: the host may already own the global subscriber.
    if let Err(e) = crate::logging::init_tracing(&LogConfig::default()) {
        tracing::debug!(error = %e, "tracing already initialized");
    }
    let app = match APP_BUILDER.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(_) => return false,
    };
    match app.run() {
        Ok(()) => {
            clear_last_error();
            true
        }
        Err(e) => fail(&e, false),
    }
}
