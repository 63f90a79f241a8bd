//! ABI-level FFI tests: call through the `extern "C"` function signatures.
//!
//! These exercise the same calling convention a C host would use, including
//! caller-owned `user_data` pointers and library-owned strings.

use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::sync::Mutex;

use updraft::ffi::{
    updraft_check_for_updates, updraft_download_updates, updraft_free_source,
    updraft_free_update_info, updraft_free_update_manager, updraft_get_app_id,
    updraft_get_current_version, updraft_get_last_error, updraft_is_portable,
    updraft_new_source_custom_callback, updraft_new_source_file, updraft_new_source_http,
    updraft_new_update_manager, updraft_new_update_manager_with_source,
    updraft_source_report_progress, updraft_string_free, updraft_update_info_to_json,
    updraft_wait_exit_then_apply_update,
};

use crate::helpers::{Fixture, publish_full, write_feed};

const APP: &str = "AvaloniaCrossPlat";

/// Take a library-owned string, free it, and return its contents.
///
/// # Safety
///
/// `s` must be null or a string returned by the library.
unsafe fn take_string(s: *mut c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    // SAFETY: s is a valid C string owned by the library.
    let out = unsafe { CStr::from_ptr(s) }.to_str().unwrap().to_owned();
    // SAFETY: s came from the library and is freed once.
    unsafe { updraft_string_free(s) };
    Some(out)
}

fn last_error() -> Option<String> {
    // SAFETY: updraft_get_last_error returns null or a library-owned string.
    unsafe { take_string(updraft_get_last_error()) }
}

fn fixture_json(fx: &Fixture) -> (CString, CString) {
    let locator = CString::new(serde_json::to_string(&fx.locator).unwrap()).unwrap();
    let options = CString::new(r#"{"ExplicitChannel":"stable"}"#).unwrap();
    (locator, options)
}

unsafe extern "C" fn record_progress(user_data: *mut c_void, progress: i16) {
    // SAFETY: user_data points at the Mutex<Vec<i16>> owned by the test.
    let seen = unsafe { &*(user_data as *const Mutex<Vec<i16>>) };
    seen.lock().unwrap().push(progress);
}

/// Null arguments fail cleanly with a message instead of crashing.
#[test]
fn ffi_abi_null_arguments_are_rejected() {
    // SAFETY: null is an accepted input for every call below.
    unsafe {
        assert!(updraft_new_source_http(ptr::null()).is_null());
        assert!(last_error().is_some(), "null url must set last error");

        assert!(updraft_new_source_file(ptr::null()).is_null());

        let mut mgr: *mut c_void = ptr::null_mut();
        assert!(!updraft_new_update_manager(
            ptr::null(),
            ptr::null(),
            ptr::null(),
            &mut mgr
        ));
        assert!(mgr.is_null());

        assert!(updraft_get_current_version(ptr::null_mut()).is_null());
        assert!(!updraft_is_portable(ptr::null_mut()));

        let mut info: *mut c_void = ptr::null_mut();
        assert_eq!(updraft_check_for_updates(ptr::null_mut(), &mut info), -1);

        // Freeing null is a no-op.
        updraft_free_update_manager(ptr::null_mut());
        updraft_free_update_info(ptr::null_mut());
        updraft_free_source(ptr::null_mut());
        updraft_string_free(ptr::null_mut());
    }
}

/// An invalid URL never produces a source.
#[test]
fn ffi_abi_invalid_http_url() {
    let url = CString::new("not a url").unwrap();
    // SAFETY: url is a valid C string.
    let source = unsafe { updraft_new_source_http(url.as_ptr()) };
    assert!(source.is_null());
    assert!(last_error().unwrap().contains("not a url"));
}

/// Full flow through the C ABI: create, check, download, apply, free.
#[test]
fn ffi_abi_check_download_apply() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.0.11");
    write_feed(&fx.releases, "stable", &[target]);

    let releases = CString::new(fx.releases.to_string_lossy().into_owned()).unwrap();
    let (locator, options) = fixture_json(&fx);
    let seen: Mutex<Vec<i16>> = Mutex::new(Vec::new());

    // SAFETY: every pointer is a valid C string, a handle returned by the
    // library, or user_data that outlives the call using it.
    unsafe {
        let mut mgr: *mut c_void = ptr::null_mut();
        assert!(
            updraft_new_update_manager(releases.as_ptr(), options.as_ptr(), locator.as_ptr(), &mut mgr),
            "manager creation failed: {:?}",
            last_error()
        );
        assert!(!mgr.is_null());

        assert_eq!(take_string(updraft_get_current_version(mgr)).as_deref(), Some("1.0.0"));
        assert_eq!(take_string(updraft_get_app_id(mgr)).as_deref(), Some(APP));
        assert!(!updraft_is_portable(mgr));

        let mut info: *mut c_void = ptr::null_mut();
        assert_eq!(updraft_check_for_updates(mgr, &mut info), 0);
        assert!(!info.is_null());

        let json = take_string(updraft_update_info_to_json(info)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["TargetFullRelease"]["Version"], "1.0.11");

        let user_data = &seen as *const Mutex<Vec<i16>> as *mut c_void;
        assert!(
            updraft_download_updates(mgr, info, Some(record_progress), user_data),
            "download failed: {:?}",
            last_error()
        );

        // No updater binary in the fixture, so the hand-off fails.
        let args = [c"--restarted".as_ptr()];
        assert!(!updraft_wait_exit_then_apply_update(
            mgr,
            info,
            true,
            true,
            args.as_ptr(),
            args.len()
        ));
        assert!(last_error().is_some());

        updraft_free_update_info(info);
        updraft_free_update_manager(mgr);
    }

    let seen = seen.into_inner().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
    assert!(fx.packages().join("AvaloniaCrossPlat-1.0.11-full.nupkg").is_file());
}

/// Up-to-date installs report 1 and leave `out_info` untouched.
#[test]
fn ffi_abi_no_update_available() {
    let fx = Fixture::new(APP, "2.0.0");
    let target = publish_full(&fx.releases, APP, "1.0.0");
    write_feed(&fx.releases, "stable", &[target]);

    let path = CString::new(fx.releases.to_string_lossy().into_owned()).unwrap();
    let (locator, options) = fixture_json(&fx);

    // SAFETY: valid C strings and library-owned handles only.
    unsafe {
        let source = updraft_new_source_file(path.as_ptr());
        assert!(!source.is_null());

        let mut mgr: *mut c_void = ptr::null_mut();
        assert!(updraft_new_update_manager_with_source(
            source,
            options.as_ptr(),
            locator.as_ptr(),
            &mut mgr
        ));
        // The manager keeps its own reference to the source.
        updraft_free_source(source);

        // A failure on this thread is cleared by the next successful call.
        let bad = CString::new("not a url").unwrap();
        assert!(updraft_new_source_http(bad.as_ptr()).is_null());
        assert!(last_error().is_some());

        let mut info: *mut c_void = ptr::null_mut();
        assert_eq!(updraft_check_for_updates(mgr, &mut info), 1);
        assert!(info.is_null());
        assert_eq!(last_error(), None, "successful check must clear last error");

        assert!(updraft_get_current_version(ptr::null_mut()).is_null());
        assert!(last_error().is_some());
        assert_eq!(take_string(updraft_get_current_version(mgr)).as_deref(), Some("2.0.0"));
        assert_eq!(last_error(), None);

        updraft_free_update_manager(mgr);
    }
}

// ── Custom callback source ─────────────────────────────────────────────────

struct HostFeed {
    releases: std::path::PathBuf,
    freed: Mutex<usize>,
}

unsafe extern "C" fn host_feed(user_data: *mut c_void, releases_name: *const c_char) -> *mut c_char {
    // SAFETY: user_data points at the HostFeed owned by the test and
    // releases_name is a valid C string for the duration of the call.
    let (host, name) = unsafe {
        (
            &*(user_data as *const HostFeed),
            CStr::from_ptr(releases_name).to_str().unwrap(),
        )
    };
    match std::fs::read_to_string(host.releases.join(name)) {
        Ok(json) => CString::new(json).unwrap().into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe extern "C" fn host_free_feed(user_data: *mut c_void, feed: *mut c_char) {
    // SAFETY: user_data points at the HostFeed; feed came from host_feed.
    unsafe {
        let host = &*(user_data as *const HostFeed);
        *host.freed.lock().unwrap() += 1;
        drop(CString::from_raw(feed));
    }
}

unsafe extern "C" fn host_download(
    user_data: *mut c_void,
    asset_json: *const c_char,
    local_path: *const c_char,
    progress_token: usize,
) -> bool {
    // SAFETY: pointers are valid for the duration of the call.
    let (host, asset, dest) = unsafe {
        (
            &*(user_data as *const HostFeed),
            CStr::from_ptr(asset_json).to_str().unwrap(),
            CStr::from_ptr(local_path).to_str().unwrap(),
        )
    };
    let asset: updraft::Asset = serde_json::from_str(asset).unwrap();
    updraft_source_report_progress(progress_token, 50);
    let ok = std::fs::copy(host.releases.join(&asset.file_name), dest).is_ok();
    updraft_source_report_progress(progress_token, 100);
    ok
}

/// Missing required callbacks are rejected.
#[test]
fn ffi_abi_custom_source_requires_callbacks() {
    // SAFETY: null callbacks are an accepted (failing) input.
    let source = unsafe {
        updraft_new_source_custom_callback(Some(host_feed), None, None, ptr::null_mut())
    };
    assert!(source.is_null());
    assert!(last_error().is_some());
}

/// Feed and package both come from host callbacks.
#[test]
fn ffi_abi_custom_source_round_trip() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.3.0");
    write_feed(&fx.releases, "stable", &[target]);

    let host = HostFeed {
        releases: fx.releases.clone(),
        freed: Mutex::new(0),
    };
    let (locator, options) = fixture_json(&fx);
    let seen: Mutex<Vec<i16>> = Mutex::new(Vec::new());

    // SAFETY: host and seen outlive every handle created here; all other
    // pointers are valid C strings or library-owned handles.
    unsafe {
        let source = updraft_new_source_custom_callback(
            Some(host_feed),
            Some(host_free_feed),
            Some(host_download),
            &host as *const HostFeed as *mut c_void,
        );
        assert!(!source.is_null(), "{:?}", last_error());

        let mut mgr: *mut c_void = ptr::null_mut();
        assert!(updraft_new_update_manager_with_source(
            source,
            options.as_ptr(),
            locator.as_ptr(),
            &mut mgr
        ));

        let mut info: *mut c_void = ptr::null_mut();
        assert_eq!(updraft_check_for_updates(mgr, &mut info), 0);
        assert!(updraft_download_updates(
            mgr,
            info,
            Some(record_progress),
            &seen as *const Mutex<Vec<i16>> as *mut c_void
        ));

        updraft_free_update_info(info);
        updraft_free_update_manager(mgr);
        updraft_free_source(source);
    }

    assert_eq!(*host.freed.lock().unwrap(), 1, "feed string freed once");
    let seen = seen.into_inner().unwrap();
    assert!(seen.contains(&50), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
    assert!(fx.packages().join("AvaloniaCrossPlat-1.3.0-full.nupkg").is_file());
}
