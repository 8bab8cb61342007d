//! frame_collector - industrial camera frame collector daemon
//!
//! This daemon:
//! 1. Opens one acquisition loop per configured camera ordinal
//! 2. Publishes the latest JPEG of each camera to the shared store
//! 3. Polls the store for `save_dataset` and records archives on demand
//! 4. Hands finished recordings to a detached export worker
//!
//! Configuration is read from the JSON file named by `FRAME_COLLECTOR_CONFIG`
//! (optional) with `FRAME_COLLECTOR_*` environment overrides.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc;
use std::sync::Arc;

use frame_collector::config::CollectorConfig;
use frame_collector::{
    open_driver, AcquisitionLoop, CameraIdentity, DetachedExport, ExportHandoff, HttpUploader,
    LiveFrameCache, LoopCollaborators, LoopSettings, MediaLayout, SqliteTtlStore,
    StoreTriggerSource, SystemClock, TtlStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CollectorConfig::load()?;
    log::info!(
        "frame_collector {} starting: cameras={:?} device={} media={} store={}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.ordinals,
        cfg.camera.device_url,
        cfg.media_root.display(),
        cfg.store_path
    );

    let store = Arc::new(
        SqliteTtlStore::open(&cfg.store_path)
            .with_context(|| format!("open store {}", cfg.store_path))?,
    );
    let export: Arc<dyn ExportHandoff> = Arc::new(DetachedExport::new(Arc::new(
        HttpUploader::new(cfg.export.upload_timeout),
    )));
    if !cfg.camera.ordinals.contains(&cfg.export.owner_ordinal) {
        log::warn!(
            "export owner ordinal {} is not among the configured cameras; recordings will not be exported",
            cfg.export.owner_ordinal
        );
    }

    for staged in MediaLayout::new(cfg.media_root.clone()).pending_exports()? {
        log::warn!(
            "staged archive {} was never exported; run export_dataset to retry",
            staged.display()
        );
    }

    let settings = LoopSettings::from_config(&cfg);
    for &ordinal in &cfg.camera.ordinals {
        let identity = CameraIdentity::new(ordinal);
        let driver = open_driver(&cfg.camera.device_url, &cfg.camera.primary_name)?;
        let shared: Arc<dyn TtlStore> = store.clone();
        let collaborators = LoopCollaborators {
            live: LiveFrameCache::new(shared.clone(), identity, cfg.live.ttl),
            triggers: Box::new(StoreTriggerSource::new(shared)),
            export: export.clone(),
            layout: MediaLayout::new(cfg.media_root.clone()),
            clock: Box::new(SystemClock),
        };
        let acquisition = AcquisitionLoop::new(identity, settings.clone(), driver, collaborators);
        spawn_loop(acquisition)?;
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("frame_collector running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(cfg.health_log_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => match store.purge_expired() {
                Ok(0) => {}
                Ok(removed) => log::debug!("purged {} expired store entries", removed),
                Err(err) => log::warn!("store purge failed: {:#}", err),
            },
        }
    }
    log::info!("shutdown signal received, exiting");
    Ok(())
}

fn spawn_loop(acquisition: AcquisitionLoop) -> Result<()> {
    let identity = acquisition.identity();
    std::thread::Builder::new()
        .name(format!("camera-{}", identity.display_id()))
        .spawn(move || acquisition.run())
        .map_err(|e| anyhow!("failed to spawn loop for {}: {}", identity, e))?;
    Ok(())
}
