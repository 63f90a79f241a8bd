//! End-to-end update flows against a local releases directory.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use updraft::asset::AssetKind;
use updraft::bridge::{self, AssetDownloaderFn, FeedFetcherFn};
use updraft::delta::DeltaPatcher;
use updraft::lock::UpdateLock;
use updraft::progress::ProgressSink;
use updraft::sources::releases_file_name;
use updraft::{
    CallbackSource, FileSource, UpdateCheck, UpdateError, UpdateManager, UpdateOptions,
};

use crate::helpers::{Fixture, list_dir, publish_delta, publish_full, write_feed, write_package};

const APP: &str = "AvaloniaCrossPlat";

fn stable() -> UpdateOptions {
    UpdateOptions {
        explicit_channel: Some("stable".to_owned()),
        ..Default::default()
    }
}

fn manager(fx: &Fixture) -> UpdateManager {
    UpdateManager::new(
        FileSource::new(&fx.releases),
        Some(stable()),
        Some(fx.locator.clone()),
    )
    .expect("create manager")
}

fn recorder() -> (ProgressSink, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |p| sink.lock().unwrap().push(p)), seen)
}

fn assert_monotonic_to_100(seen: &[u8]) {
    assert!(!seen.is_empty(), "progress must be reported");
    assert!(
        seen.windows(2).all(|w| w[0] <= w[1]),
        "progress must not decrease: {seen:?}"
    );
    assert_eq!(seen.last(), Some(&100), "progress must end at 100: {seen:?}");
}

fn leftovers(dir: &Path) -> Vec<String> {
    list_dir(dir)
        .into_iter()
        .filter(|n| n.ends_with(".partial") || n.starts_with(".updraft-staging-"))
        .collect()
}

/// Patcher that "applies" a delta by copying a prepared package.
struct CopyPatcher(std::path::PathBuf);

impl DeltaPatcher for CopyPatcher {
    fn apply(&self, _base: &Path, _delta: &Path, output: &Path) -> updraft::Result<()> {
        std::fs::copy(&self.0, output)?;
        Ok(())
    }
}

struct FailingPatcher;

/// Patcher that succeeds for the first `ok_steps` calls, then fails.
struct FailAfterPatcher {
    prepared: std::path::PathBuf,
    ok_steps: usize,
    calls: Mutex<usize>,
}

impl DeltaPatcher for FailAfterPatcher {
    fn apply(&self, _base: &Path, _delta: &Path, output: &Path) -> updraft::Result<()> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls > self.ok_steps {
            return Err(UpdateError::ApplyFailed("corrupt delta".to_owned()));
        }
        std::fs::copy(&self.prepared, output)?;
        Ok(())
    }
}

impl DeltaPatcher for FailingPatcher {
    fn apply(&self, _base: &Path, _delta: &Path, _output: &Path) -> updraft::Result<()> {
        Err(UpdateError::ApplyFailed("corrupt delta".to_owned()))
    }
}

#[test]
fn check_download_and_find_pending_update() {
    let fx = Fixture::new(APP, "1.0.0");
    let old = publish_full(&fx.releases, APP, "1.0.0");
    let new = publish_full(&fx.releases, APP, "1.0.11");
    write_feed(&fx.releases, "stable", &[old, new.clone()]);

    let mgr = manager(&fx);
    assert_eq!(mgr.current_version(), "1.0.0");
    assert_eq!(mgr.app_id(), APP);
    assert!(mgr.get_update_pending_restart().is_none());

    let info = match mgr.check_for_updates().unwrap() {
        UpdateCheck::UpdateAvailable(info) => info,
        other => panic!("expected an update, got {other:?}"),
    };
    assert_eq!(info.target_full_release.version, "1.0.11");
    assert_eq!(info.target_full_release.file_name, "AvaloniaCrossPlat-1.0.11-full.nupkg");
    assert!(!info.is_downgrade);

    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    assert_monotonic_to_100(&seen.lock().unwrap());

    let downloaded = fx.packages().join("AvaloniaCrossPlat-1.0.11-full.nupkg");
    assert!(downloaded.is_file());
    assert!(leftovers(fx.packages()).is_empty());

    let pending = mgr.get_update_pending_restart().expect("pending update");
    assert_eq!(pending.version, "1.0.11");
    assert_eq!(pending.sha256, new.sha256);
    assert_eq!(pending.kind, AssetKind::Full);
}

#[test]
fn second_download_is_a_no_op() {
    let fx = Fixture::new(APP, "1.0.0");
    let new = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[new]);

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    mgr.download_updates(&info, None).unwrap();

    // Package source gone: the already-verified copy must be reused.
    std::fs::remove_file(fx.releases.join("AvaloniaCrossPlat-1.1.0-full.nupkg")).unwrap();
    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    assert_monotonic_to_100(&seen.lock().unwrap());
}

#[test]
fn concurrent_download_reports_lock_contention() {
    let fx = Fixture::new(APP, "1.0.0");
    let new = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[new]);

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();

    let lock_path = fx.packages().join(updraft::locator::LOCK_FILE_NAME);
    let held = UpdateLock::try_acquire(&lock_path).unwrap();
    assert!(matches!(
        mgr.download_updates(&info, None),
        Err(UpdateError::LockContention(_))
    ));

    drop(held);
    mgr.download_updates(&info, None).unwrap();
}

#[test]
fn delta_chain_is_used_when_available() {
    let fx = Fixture::new(APP, "1.0.0");
    std::fs::create_dir_all(fx.packages()).unwrap();
    write_package(&fx.packages().join("AvaloniaCrossPlat-1.0.0-full.nupkg"), APP, "1.0.0");

    let base = publish_full(&fx.releases, APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    let delta = publish_delta(&fx.releases, APP, "1.1.0", b"delta");
    write_feed(&fx.releases, "stable", &[base, target, delta]);

    // Only the patcher can produce the target now.
    let prepared = fx.dir.path().join("prepared.nupkg");
    std::fs::rename(fx.releases.join("AvaloniaCrossPlat-1.1.0-full.nupkg"), &prepared).unwrap();

    let mgr = manager(&fx).with_patcher(Arc::new(CopyPatcher(prepared)));
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert_eq!(info.deltas_to_target.len(), 1);

    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    assert_monotonic_to_100(&seen.lock().unwrap());

    let packages: Vec<_> = list_dir(fx.packages())
        .into_iter()
        .filter(|n| n.ends_with(".nupkg"))
        .collect();
    assert_eq!(packages, ["AvaloniaCrossPlat-1.1.0-full.nupkg"]);
    assert!(leftovers(fx.packages()).is_empty());
}

#[test]
fn failed_delta_falls_back_to_full_package() {
    let fx = Fixture::new(APP, "1.0.0");
    std::fs::create_dir_all(fx.packages()).unwrap();
    write_package(&fx.packages().join("AvaloniaCrossPlat-1.0.0-full.nupkg"), APP, "1.0.0");

    let base = publish_full(&fx.releases, APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    let delta = publish_delta(&fx.releases, APP, "1.1.0", b"delta");
    write_feed(&fx.releases, "stable", &[base, target, delta]);

    let mgr = manager(&fx).with_patcher(Arc::new(FailingPatcher));
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert_eq!(info.deltas_to_target.len(), 1);

    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    assert_monotonic_to_100(&seen.lock().unwrap());

    assert!(fx.packages().join("AvaloniaCrossPlat-1.1.0-full.nupkg").is_file());
    assert!(leftovers(fx.packages()).is_empty());
}

#[test]
fn failure_mid_chain_falls_back_to_full_package() {
    let fx = Fixture::new(APP, "1.0.0");
    std::fs::create_dir_all(fx.packages()).unwrap();
    write_package(&fx.packages().join("AvaloniaCrossPlat-1.0.0-full.nupkg"), APP, "1.0.0");

    let base = publish_full(&fx.releases, APP, "1.0.0");
    let middle = publish_full(&fx.releases, APP, "1.1.0");
    let target = publish_full(&fx.releases, APP, "1.2.0");
    let d1 = publish_delta(&fx.releases, APP, "1.1.0", b"delta-1");
    let d2 = publish_delta(&fx.releases, APP, "1.2.0", b"delta-2");
    write_feed(&fx.releases, "stable", &[base, middle, target, d1, d2]);

    let patcher = Arc::new(FailAfterPatcher {
        prepared: fx.releases.join("AvaloniaCrossPlat-1.1.0-full.nupkg"),
        ok_steps: 1,
        calls: Mutex::new(0),
    });
    let mgr = manager(&fx).with_patcher(patcher.clone());
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert_eq!(info.deltas_to_target.len(), 2);

    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    assert_eq!(*patcher.calls.lock().unwrap(), 2);
    assert_monotonic_to_100(&seen.lock().unwrap());

    let packages: Vec<_> = list_dir(fx.packages())
        .into_iter()
        .filter(|n| n.ends_with(".nupkg"))
        .collect();
    assert_eq!(packages, ["AvaloniaCrossPlat-1.2.0-full.nupkg"]);
    assert!(leftovers(fx.packages()).is_empty());
}

#[test]
fn leftovers_from_an_interrupted_run_are_removed() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[target]);

    let staging = fx.packages().join(".updraft-staging-crashed");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("AvaloniaCrossPlat-1.1.0-delta.nupkg"), vec![1u8; 128]).unwrap();
    std::fs::write(staging.join("step-0.nupkg"), vec![2u8; 128]).unwrap();
    std::fs::write(fx.packages().join("AvaloniaCrossPlat-1.1.0-full.nupkg.partial"), b"half").unwrap();

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    mgr.download_updates(&info, None).unwrap();

    assert!(!staging.exists());
    assert!(leftovers(fx.packages()).is_empty());
    assert!(fx.packages().join("AvaloniaCrossPlat-1.1.0-full.nupkg").is_file());
}

#[test]
fn corrupt_full_package_is_rejected_and_cleaned_up() {
    let fx = Fixture::new(APP, "1.0.0");
    let mut target = publish_full(&fx.releases, APP, "1.1.0");
    target.sha256 = "00".repeat(32);
    write_feed(&fx.releases, "stable", &[target]);

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert!(matches!(
        mgr.download_updates(&info, None),
        Err(UpdateError::DownloadFailed(_))
    ));
    assert!(!fx.packages().join("AvaloniaCrossPlat-1.1.0-full.nupkg").exists());
    assert!(leftovers(fx.packages()).is_empty());
}

#[test]
fn cancelled_download_leaves_nothing_behind() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[target]);

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let sink: ProgressSink = Arc::new(move |_| trigger.cancel());
    assert!(matches!(
        mgr.download_updates_with_cancel(&info, Some(sink), &cancel),
        Err(UpdateError::Cancelled)
    ));
    let packages: Vec<_> = list_dir(fx.packages())
        .into_iter()
        .filter(|n| n.contains(".nupkg"))
        .collect();
    assert!(packages.is_empty(), "unexpected files: {packages:?}");
}

#[test]
fn callback_source_drives_the_same_flow() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.2.0");
    write_feed(&fx.releases, "stable", &[target]);

    let releases = fx.releases.clone();
    let feed: FeedFetcherFn = Arc::new(move |name| {
        assert_eq!(name, releases_file_name("stable"));
        std::fs::read_to_string(releases.join(name)).ok()
    });
    let releases = fx.releases.clone();
    let download: AssetDownloaderFn = Arc::new(move |asset, dest, token| {
        bridge::report_progress(token, 40);
        let ok = std::fs::copy(releases.join(&asset.file_name), dest).is_ok();
        bridge::report_progress(token, 250);
        ok
    });
    let source = CallbackSource::new(Some(feed), Some(download)).unwrap();
    let mgr = UpdateManager::new(source, Some(stable()), Some(fx.locator.clone())).unwrap();

    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert_eq!(info.target_full_release.version, "1.2.0");

    let (sink, seen) = recorder();
    mgr.download_updates(&info, Some(sink)).unwrap();
    let seen = seen.lock().unwrap();
    assert_monotonic_to_100(&seen);
    assert!(seen.contains(&40));
    assert!(fx.packages().join("AvaloniaCrossPlat-1.2.0-full.nupkg").is_file());
}

#[test]
fn apply_without_updater_fails() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[target]);

    let mgr = manager(&fx);
    let info = mgr.check_for_updates().unwrap().into_update().unwrap();
    assert!(matches!(
        mgr.apply_updates_and_exit(&info.target_full_release),
        Err(UpdateError::ApplyFailed(_))
    ));

    mgr.download_updates(&info, None).unwrap();
    let pending = mgr.get_update_pending_restart().unwrap();
    assert!(matches!(
        mgr.apply_updates_and_restart(&pending, ["--flag"]),
        Err(UpdateError::ApplyFailed(_))
    ));
}

#[tokio::test]
async fn async_download_streams_progress() {
    let fx = Fixture::new(APP, "1.0.0");
    let target = publish_full(&fx.releases, APP, "1.1.0");
    write_feed(&fx.releases, "stable", &[target]);

    let mgr = manager(&fx);
    let info = match mgr.check_for_updates_async().await.unwrap() {
        UpdateCheck::UpdateAvailable(info) => info,
        other => panic!("expected an update, got {other:?}"),
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    mgr.download_updates_async(info, Some(tx), CancellationToken::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(p) = rx.recv().await {
        seen.push(p);
    }
    assert_monotonic_to_100(&seen);
}
