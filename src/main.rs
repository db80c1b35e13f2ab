//! Demo: synchronize a few synthetic camera streams and print packet
//! summaries. Pass a TOML config path to run against your own camera list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde::Deserialize;
use stream_sync::{
    CameraConfig, FrameStatus, NullCalibration, StreamSynchronizer, SyncOptions,
    SyntheticConnector,
};
use tracing::info;

#[derive(Debug, Deserialize)]
struct AppConfig {
    cameras: Vec<CameraConfig>,
    #[serde(default)]
    options: SyncOptions,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;
    Ok(settings.try_deserialize()?)
}

fn synthetic_config() -> AppConfig {
    let camera = |i: usize| CameraConfig {
        source: format!("synthetic://cam/{i}"),
        calibration: format!("calibration/{i}"),
        width: 320,
        height: 240,
        frame_rate: 15.0,
    };
    AppConfig {
        cameras: (0..3).map(camera).collect(),
        options: SyncOptions::default(),
    }
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_sync=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let app = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => synthetic_config(),
    };

    info!(cameras = app.cameras.len(), "stream-sync demo starting");

    let mut synchronizer = StreamSynchronizer::open(
        app.cameras,
        app.options,
        Arc::new(SyntheticConnector),
        &NullCalibration,
    )?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Relaxed))?;
    }

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
        let packet = synchronizer.get_frame_packet();

        let summary: Vec<String> = packet
            .iter()
            .map(|entry| match (entry.status, entry.timestamp) {
                (FrameStatus::Ok, Some(ts)) => format!("ok@{ts:.3}"),
                (status, _) => format!("{status:?}"),
            })
            .collect();
        info!(
            spread = packet.ok_spread().unwrap_or(0.0),
            "packet [{}]",
            summary.join(" | ")
        );
    }

    for (index, stats) in synchronizer.stats().iter().enumerate() {
        info!(
            channel = index,
            decoded = stats.frames_decoded,
            errors = stats.decode_errors,
            reconnects = stats.reconnects,
            dropped = stats.buffer.dropped,
            "channel totals"
        );
    }
    synchronizer.shutdown();

    info!("stream-sync demo shutting down");
    Ok(())
}
