//! Sample host for the update client.
//!
//! Runs the startup hooks, then checks the configured feed and optionally
//! downloads and applies the newest release.
//!
//! ```text
//! updraft-sample [check|download|apply|pending]
//! ```
//!
//! The feed location comes from `source` in the config file, or from
//! `UPDRAFT_RELEASES_DIR`.

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use updraft::config::RELEASES_DIR_ENV;
use updraft::sources::AutoSource;
use updraft::{App, UpdateCheck, UpdateManager, UpdaterConfig, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = UpdaterConfig::default_config_path();
    let config = if config_path.is_file() {
        UpdaterConfig::from_file(&config_path)?
    } else {
        UpdaterConfig::default()
    };
    let _log_guard = logging::init_tracing(&config.log)?;

    App::build()
        .on_after_install(|v| tracing::info!(version = v, "installed"))
        .on_before_uninstall(|v| tracing::info!(version = v, "uninstalling"))
        .on_first_run(|v| tracing::info!(version = v, "first run"))
        .on_restarted(|v| tracing::info!(version = v, "restarted after update"))
        .run()?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "check".to_owned());
    let Some(location) = config.source_or_env() else {
        anyhow::bail!(
            "no update source: set `source` in {} or {RELEASES_DIR_ENV}",
            config_path.display()
        );
    };

    let manager = UpdateManager::new(AutoSource::new(&location)?, Some(config.options), None)?;
    println!(
        "{} {} (channel {})",
        manager.app_id(),
        manager.current_version(),
        manager.channel()
    );

    if command == "pending" {
        match manager.get_update_pending_restart() {
            Some(asset) => println!("pending: {} ({})", asset.version, asset.file_name),
            None => println!("no update pending"),
        }
        return Ok(());
    }

    let info = match manager.check_for_updates_async().await? {
        UpdateCheck::UpdateAvailable(info) => info,
        UpdateCheck::NoUpdateAvailable => {
            println!("up to date");
            return Ok(());
        }
        UpdateCheck::RemoteIsEmpty => {
            println!("feed at {location} lists no releases");
            return Ok(());
        }
    };
    let target = &info.target_full_release;
    println!(
        "update available: {}{} via {} delta(s)",
        target.version,
        if info.is_downgrade { " (downgrade)" } else { "" },
        info.deltas_to_target.len()
    );

    match command.as_str() {
        "check" => return Ok(()),
        "download" | "apply" => {}
        other => anyhow::bail!("unknown command: {other}"),
    }

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("  {msg} [{bar:30}] {pos}%") {
        pb.set_style(style);
    }
    pb.set_message(target.file_name.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let download = {
        let manager = manager.clone();
        let info = info.clone();
        tokio::spawn(async move { manager.download_updates_async(info, Some(tx), cancel).await })
    };
    while let Some(p) = rx.recv().await {
        pb.set_position(u64::from(p));
    }
    download.await??;
    pb.finish_with_message("downloaded");

    if command == "apply" {
        manager.apply_updates_and_restart(&info, std::env::args().skip(2))?;
        tracing::info!("exiting for updater");
        std::process::exit(0);
    }
    Ok(())
}
