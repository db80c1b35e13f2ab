//! The synchronization core: assembles aligned frame packets across all
//! capture channels on demand.
//!
//! `get_frame_packet` is a pull-model call on the caller's thread: one
//! bounded, non-blocking scan over already-buffered frames. A stalled or
//! dead channel can never stall packet production for the others.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationProvider, CalibrationRef};
use crate::capture::channel::{CaptureChannel, ChannelStats};
use crate::capture::frame::{DecodedFrame, FrameStatus, FrameType, MotionVector, PixelBuffer};
use crate::capture::source::Connect;
use crate::error::SyncError;
use crate::{CameraConfig, SyncOptions};

/// Rule for choosing the packet's reference timestamp among this round's
/// valid frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Earliest valid timestamp of the round.
    #[default]
    Earliest,
    /// Lower median of the round's valid timestamps.
    Median,
    /// Timestamp of a designated channel; falls back to earliest when that
    /// channel produced no valid frame this round.
    Primary(usize),
}

impl ReferencePolicy {
    /// `valid` holds `(channel_index, unix_ts)` for this round's OK frames.
    fn reference(&self, valid: &[(usize, f64)]) -> Option<f64> {
        if valid.is_empty() {
            return None;
        }
        let earliest = valid
            .iter()
            .map(|&(_, ts)| ts)
            .fold(f64::INFINITY, f64::min);
        match *self {
            ReferencePolicy::Earliest => Some(earliest),
            ReferencePolicy::Median => {
                let mut stamps: Vec<f64> = valid.iter().map(|&(_, ts)| ts).collect();
                stamps.sort_by(|a, b| a.total_cmp(b));
                Some(stamps[(stamps.len() - 1) / 2])
            }
            ReferencePolicy::Primary(primary) => valid
                .iter()
                .find(|&&(index, _)| index == primary)
                .map(|&(_, ts)| ts)
                .or(Some(earliest)),
        }
    }
}

/// One channel's slot in a [`FramePacket`].
#[derive(Debug, Clone)]
pub struct PacketEntry {
    pub status: FrameStatus,
    /// UNIX seconds; present whenever a frame was decoded this round.
    pub timestamp: Option<f64>,
    pub frame_type: FrameType,
    pub motion_vectors: Vec<MotionVector>,
    /// Absent for every non-decoded entry; a copy owned by the caller
    /// otherwise.
    pub pixels: Option<PixelBuffer>,
}

impl PacketEntry {
    fn placeholder(status: FrameStatus) -> Self {
        Self {
            status,
            timestamp: None,
            frame_type: FrameType::Unknown,
            motion_vectors: Vec::new(),
            pixels: None,
        }
    }
}

/// The aligned per-step output: exactly one entry per configured channel,
/// in channel-index order, on every call.
#[derive(Debug)]
pub struct FramePacket {
    entries: Vec<PacketEntry>,
}

impl FramePacket {
    pub fn get(&self, channel: usize) -> Option<&PacketEntry> {
        self.entries.get(channel)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PacketEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp spread across this packet's OK entries, if at least one
    /// entry is OK.
    pub fn ok_spread(&self) -> Option<f64> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut seen = false;
        for entry in &self.entries {
            if entry.status == FrameStatus::Ok {
                if let Some(ts) = entry.timestamp {
                    min = min.min(ts);
                    max = max.max(ts);
                    seen = true;
                }
            }
        }
        seen.then_some(max - min)
    }
}

impl std::ops::Index<usize> for FramePacket {
    type Output = PacketEntry;

    fn index(&self, channel: usize) -> &PacketEntry {
        &self.entries[channel]
    }
}

impl<'a> IntoIterator for &'a FramePacket {
    type Item = &'a PacketEntry;
    type IntoIter = std::slice::Iter<'a, PacketEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// What one channel contributed to the current round.
pub(crate) enum ChannelRead {
    Frame(DecodedFrame),
    /// Nothing usable; carries NoData, Disconnected or Offline.
    Down(FrameStatus),
}

/// Pure packet-assembly step: reference timestamp, tolerance check, one
/// entry per channel in index order.
pub(crate) fn assemble_packet(
    reads: Vec<ChannelRead>,
    policy: ReferencePolicy,
    tolerance: f64,
) -> FramePacket {
    let valid: Vec<(usize, f64)> = reads
        .iter()
        .enumerate()
        .filter_map(|(index, read)| match read {
            ChannelRead::Frame(frame) if frame.is_ok() => Some((index, frame.unix_ts)),
            _ => None,
        })
        .collect();
    let reference = policy.reference(&valid);

    // OK entries must stay mutually within the tolerance window. The
    // earliest reference sits at the low edge of the window, so it can
    // spend the whole window on one side; the median and primary
    // references sit in the middle and get half the window on each side.
    let band = match policy {
        ReferencePolicy::Earliest => tolerance,
        ReferencePolicy::Median | ReferencePolicy::Primary(_) => tolerance / 2.0,
    };

    let entries = reads
        .into_iter()
        .map(|read| match read {
            ChannelRead::Down(status) => PacketEntry::placeholder(status),
            ChannelRead::Frame(frame) if !frame.is_ok() => PacketEntry::placeholder(frame.status),
            ChannelRead::Frame(frame) => {
                let status = match reference {
                    Some(reference) if (frame.unix_ts - reference).abs() > band => {
                        // Best effort: keep the data, let the caller decide.
                        FrameStatus::OutOfSync
                    }
                    _ => FrameStatus::Ok,
                };
                PacketEntry {
                    status,
                    timestamp: Some(frame.unix_ts),
                    frame_type: frame.frame_type,
                    motion_vectors: frame.motion_vectors,
                    pixels: frame.pixels,
                }
            }
        })
        .collect();

    FramePacket { entries }
}

/// Owns the N capture channels and assembles aligned packets on demand.
///
/// Construction validates every camera config and resolves every
/// calibration reference before any channel thread starts; dropping the
/// synchronizer stops every channel within the bounded shutdown timeout.
pub struct StreamSynchronizer {
    channels: Vec<CaptureChannel>,
    calibrations: Vec<CalibrationRef>,
    policy: ReferencePolicy,
    tolerance: f64,
    max_initial_offset: f64,
    startup_checked: bool,
}

impl StreamSynchronizer {
    pub fn open(
        cameras: Vec<CameraConfig>,
        options: SyncOptions,
        connector: Arc<dyn Connect>,
        calibration: &dyn CalibrationProvider,
    ) -> Result<Self, SyncError> {
        if cameras.is_empty() {
            return Err(SyncError::NoCameras);
        }
        for (index, camera) in cameras.iter().enumerate() {
            camera.validate(index)?;
        }
        let calibrations = cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| calibration.resolve(index, &camera.calibration))
            .collect::<Result<Vec<_>, _>>()?;

        // Default tolerance: one nominal inter-frame interval, taken from
        // the slowest camera.
        let tolerance = options.tolerance_window.unwrap_or_else(|| {
            cameras
                .iter()
                .map(CameraConfig::frame_interval)
                .fold(0.0, f64::max)
        });

        info!(
            channels = cameras.len(),
            tolerance, "starting stream synchronizer"
        );

        let policy = options.reference_policy;
        let max_initial_offset = options.max_initial_offset;
        let channels = cameras
            .into_iter()
            .enumerate()
            .map(|(index, camera)| {
                CaptureChannel::spawn(index, camera, Arc::clone(&connector), &options)
            })
            .collect();

        Ok(Self {
            channels,
            calibrations,
            policy,
            tolerance,
            max_initial_offset,
            startup_checked: false,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Calibration payload for one channel, as resolved at construction.
    pub fn calibration(&self, channel: usize) -> Option<&CalibrationRef> {
        self.calibrations.get(channel)
    }

    /// Assemble the next aligned packet. Non-blocking: inspects only
    /// already-decoded, already-buffered data, in one pass over the
    /// channels. Pops are destructive; a round with no new frames yields
    /// NoData entries rather than re-emitting consumed frames.
    pub fn get_frame_packet(&mut self) -> FramePacket {
        let reads: Vec<ChannelRead> = self
            .channels
            .iter()
            .map(|channel| match channel.down_status() {
                // Down channels contribute a placeholder, never a wait.
                // Anything still buffered stays put; the ring's drop-oldest
                // policy bounds how much staleness can survive a recovery.
                Some(status) => ChannelRead::Down(status),
                None => match channel.pop_frame() {
                    Some(frame) => ChannelRead::Frame(frame),
                    None => ChannelRead::Down(FrameStatus::NoData),
                },
            })
            .collect();

        let packet = assemble_packet(reads, self.policy, self.tolerance);
        debug!(
            entries = packet.len(),
            ok = packet
                .iter()
                .filter(|e| e.status == FrameStatus::Ok)
                .count(),
            "assembled frame packet"
        );

        if !self.startup_checked {
            if let Some(spread) = packet.ok_spread() {
                self.startup_checked = true;
                if spread > self.max_initial_offset {
                    warn!(
                        spread,
                        limit = self.max_initial_offset,
                        "initial stream offset exceeds limit; check that all \
                         cameras use the same NTP server"
                    );
                }
            }
        }

        packet
    }

    /// Per-channel decode and buffer counters, in channel-index order.
    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(CaptureChannel::stats).collect()
    }

    /// Stop every capture channel. Equivalent to dropping the synchronizer,
    /// but explicit about when the shutdown timeout is spent.
    pub fn shutdown(mut self) {
        for channel in &mut self.channels {
            channel.stop();
        }
    }
}
