//! Per-camera capture channel: decode loop, reconnect policy, link state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::atomic::AtomicCell;
use tracing::{debug, info, warn};

use crate::capture::clock::{unix_now, TimestampClock};
use crate::capture::frame::{DecodedFrame, FrameStatus};
use crate::capture::source::Connect;
use crate::error::SourceError;
use crate::pipeline::{BufferStats, FrameRingBuffer};
use crate::{CameraConfig, SyncOptions};

/// Connection state as last observed by the decode loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Disconnected,
}

/// State shared between the decode-loop thread (writer) and the
/// synchronizer (reader). One instance per channel; no cross-channel
/// sharing.
struct ChannelShared {
    buffer: FrameRingBuffer,
    link: AtomicCell<LinkState>,
    last_success: AtomicCell<Option<Instant>>,
    started: Instant,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Per-channel counters since construction.
#[derive(Debug, Clone, Copy)]
pub struct ChannelStats {
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub buffer: BufferStats,
}

/// Decode-loop tuning, cut down from [`SyncOptions`] to what the worker
/// thread needs.
struct ChannelTuning {
    drift_threshold: f64,
    max_read_errors: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// Owns one camera's decode loop. The thread connects with exponential
/// backoff, decodes frames, derives UNIX timestamps and publishes into the
/// channel's frame buffer; it never terminates for a single bad frame.
pub struct CaptureChannel {
    index: usize,
    shared: Arc<ChannelShared>,
    stop: Arc<AtomicBool>,
    done_rx: flume::Receiver<()>,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
    shutdown_timeout: Duration,
}

impl CaptureChannel {
    pub(crate) fn spawn(
        index: usize,
        camera: CameraConfig,
        connector: Arc<dyn Connect>,
        options: &SyncOptions,
    ) -> Self {
        let shared = Arc::new(ChannelShared {
            buffer: FrameRingBuffer::new(options.buffer_capacity),
            link: AtomicCell::new(LinkState::Disconnected),
            last_success: AtomicCell::new(None),
            started: Instant::now(),
            frames_decoded: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        });
        let tuning = ChannelTuning {
            drift_threshold: options.drift_threshold,
            max_read_errors: options.max_read_errors,
            initial_backoff: options.initial_backoff,
            max_backoff: options.max_backoff,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = flume::bounded(1);

        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let spawned = std::thread::Builder::new()
                .name(format!("capture-{index}"))
                .spawn(move || {
                    decode_loop(index, camera, connector, tuning, &shared, &stop);
                    let _ = done_tx.send(());
                });
            match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    // Channel stays empty and ages into OFFLINE.
                    warn!(channel = index, error = %err, "failed to spawn capture thread");
                    None
                }
            }
        };

        Self {
            index,
            shared,
            stop,
            done_rx,
            handle,
            grace: options.grace_period,
            shutdown_timeout: options.shutdown_timeout,
        }
    }

    /// Non-blocking pop of the oldest buffered frame.
    pub(crate) fn pop_frame(&self) -> Option<DecodedFrame> {
        self.shared.buffer.pop_oldest()
    }

    /// Status to report for this channel when it is down, or `None` while
    /// the link is healthy. OFFLINE (grace period exceeded with no
    /// successful decode) is derived here rather than in the decode loop so
    /// a thread stuck in a dead blocking read is still reported correctly.
    pub(crate) fn down_status(&self) -> Option<FrameStatus> {
        let since = self
            .shared
            .last_success
            .load()
            .unwrap_or(self.shared.started);
        if since.elapsed() > self.grace {
            return Some(FrameStatus::Offline);
        }
        if self.shared.link.load() == LinkState::Disconnected {
            return Some(FrameStatus::Disconnected);
        }
        None
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.shared.decode_errors.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            buffer: self.shared.buffer.stats(),
        }
    }

    /// Signal the decode loop to exit and wait up to the shutdown timeout.
    /// A thread stuck in a blocking read is detached instead of holding up
    /// the rest of teardown.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.done_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) => {
                let _ = handle.join();
                debug!(channel = self.index, "capture channel stopped");
            }
            Err(_) => {
                warn!(
                    channel = self.index,
                    "capture channel did not stop within timeout, detaching"
                );
                drop(handle);
            }
        }
    }
}

impl Drop for CaptureChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    index: usize,
    camera: CameraConfig,
    connector: Arc<dyn Connect>,
    tuning: ChannelTuning,
    shared: &ChannelShared,
    stop: &AtomicBool,
) {
    let mut clock = TimestampClock::new(tuning.drift_threshold);
    let mut backoff = tuning.initial_backoff;
    let mut connected_before = false;

    'connect: while !stop.load(Ordering::Relaxed) {
        let mut source = match connector.connect(&camera) {
            Ok(source) => {
                info!(channel = index, source = %camera.source, "stream connected");
                shared.link.store(LinkState::Up);
                backoff = tuning.initial_backoff;
                // New pts epoch after every handshake.
                clock.reset();
                if connected_before {
                    shared.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                connected_before = true;
                source
            }
            Err(err) => {
                warn!(channel = index, error = %err, backoff_ms = backoff.as_millis() as u64,
                    "connect failed, retrying");
                shared.link.store(LinkState::Disconnected);
                sleep_unless_stopped(stop, backoff);
                backoff = (backoff * 2).min(tuning.max_backoff);
                continue;
            }
        };

        let mut consecutive_errors = 0u32;
        while !stop.load(Ordering::Relaxed) {
            match source.read() {
                Ok(raw) => {
                    consecutive_errors = 0;
                    let arrival = unix_now();
                    let (pixels, pts, frame_type, motion_vectors) = raw.into_pixel_buffer();
                    let unix_ts = clock.to_unix(pts, arrival);
                    // Health bookkeeping strictly before the push, so a
                    // frame is never visible under a stale last_success.
                    shared.last_success.store(Some(Instant::now()));
                    shared.link.store(LinkState::Up);
                    shared.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    shared.buffer.push(DecodedFrame {
                        status: FrameStatus::Ok,
                        pts,
                        unix_ts,
                        frame_type,
                        motion_vectors,
                        pixels: Some(pixels),
                    });
                    debug!(
                        channel = index,
                        unix_ts,
                        depth = shared.buffer.len(),
                        "frame buffered"
                    );
                }
                Err(SourceError::Decode(reason)) => {
                    consecutive_errors += 1;
                    shared.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(channel = index, %reason, "decode error");
                    // Clock floor keeps buffered timestamps non-decreasing.
                    shared.buffer.push(DecodedFrame {
                        unix_ts: clock.floor(),
                        ..DecodedFrame::decode_error()
                    });
                    if consecutive_errors >= tuning.max_read_errors {
                        warn!(
                            channel = index,
                            errors = consecutive_errors,
                            "consecutive decode errors exceeded limit, reconnecting"
                        );
                        shared.link.store(LinkState::Disconnected);
                        continue 'connect;
                    }
                }
                Err(err) => {
                    warn!(channel = index, error = %err, "stream lost, reconnecting");
                    shared.link.store(LinkState::Disconnected);
                    continue 'connect;
                }
            }
        }
        break;
    }

    debug!(channel = index, "decode loop exiting");
}

/// Backoff sleep in short slices so a stop request stays responsive.
fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
