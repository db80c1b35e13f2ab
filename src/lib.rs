pub mod calibration;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sync;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub use crate::calibration::{CalibrationProvider, FsCalibration, NullCalibration};
pub use crate::capture::channel::ChannelStats;
pub use crate::capture::frame::{
    DecodedFrame, FrameStatus, FrameType, MotionVector, PixelBuffer,
};
pub use crate::pipeline::BufferStats;
pub use crate::capture::source::{Connect, FrameSource, SourceFrame, SyntheticConnector};
pub use crate::sync::{FramePacket, PacketEntry, ReferencePolicy, StreamSynchronizer};

/// One camera's capture configuration. Position in the config slice defines
/// the channel index, fixed for the synchronizer's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Stream address, e.g. an RTSP URL. Opaque to the core; interpreted by
    /// the [`Connect`] collaborator.
    pub source: String,
    /// Calibration-parameter reference, opaque to the synchronization logic.
    pub calibration: String,
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate in frames per second.
    pub frame_rate: f64,
}

impl CameraConfig {
    pub fn validate(&self, index: usize) -> Result<(), SyncError> {
        if self.source.is_empty() {
            return Err(SyncError::InvalidConfig {
                index,
                reason: "empty source address".into(),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(SyncError::InvalidConfig {
                index,
                reason: format!("bad frame geometry {}x{}", self.width, self.height),
            });
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(SyncError::InvalidConfig {
                index,
                reason: format!("bad frame rate {}", self.frame_rate),
            });
        }
        Ok(())
    }

    /// Nominal inter-frame interval in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.frame_rate
    }
}

/// Tuning knobs for the synchronizer and its capture channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Per-channel frame buffer capacity (drop-oldest on overflow).
    pub buffer_capacity: usize,
    /// Maximum timestamp spread for entries to be marked OK within one
    /// packet, in seconds. `None` derives one nominal inter-frame interval
    /// from the slowest configured camera.
    pub tolerance_window: Option<f64>,
    pub reference_policy: ReferencePolicy,
    /// No successful decode for this long marks the channel OFFLINE.
    pub grace_period: Duration,
    /// Consecutive decode failures before the source is torn down and
    /// reconnected.
    pub max_read_errors: u32,
    /// Arrival-vs-pts divergence that forces a clock re-anchor, in seconds.
    pub drift_threshold: f64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub shutdown_timeout: Duration,
    /// First-packet spread above this logs a clock-misconfiguration warning.
    pub max_initial_offset: f64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 4,
            tolerance_window: None,
            reference_policy: ReferencePolicy::Earliest,
            grace_period: Duration::from_secs(2),
            max_read_errors: 3,
            drift_threshold: 0.5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(3),
            max_initial_offset: 30.0,
        }
    }
}
