//! Decode/demux collaborator boundary.
//!
//! The synchronizer core never touches the network or a codec itself; it
//! consumes this pair of traits. A real deployment implements them over an
//! RTSP/FFmpeg stack; tests and the demo binary use [`SyntheticConnector`].

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::{FrameType, MotionVector, PixelBuffer};
use crate::error::SourceError;
use crate::CameraConfig;

/// Raw output of one decode step, before timestamp derivation.
///
/// `pixels` points at decoder-owned memory semantics: the capture channel
/// copies it into an owned [`PixelBuffer`] before publishing.
pub struct SourceFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Codec-relative presentation timestamp, seconds.
    pub pts: f64,
    pub frame_type: FrameType,
    pub motion_vectors: Vec<MotionVector>,
}

impl SourceFrame {
    pub(crate) fn into_pixel_buffer(self) -> (PixelBuffer, f64, FrameType, Vec<MotionVector>) {
        let buf = PixelBuffer {
            data: Bytes::from(self.pixels),
            width: self.width,
            height: self.height,
            channels: self.channels,
        };
        (buf, self.pts, self.frame_type, self.motion_vectors)
    }
}

/// One open stream: demux + decode for a single camera.
///
/// `read` blocks until the next frame is available. Implementations should
/// return [`SourceError::Decode`] for a single bad frame and
/// [`SourceError::Stream`] when the connection itself is gone.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<SourceFrame, SourceError>;
}

/// Stream handshake factory, one per deployment. Shared by all channels.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Synthetic frame generator for tests and the demo binary.
///
/// Produces gradient frames paced at the camera's nominal rate, with pts
/// counting up from zero per connection.
pub struct SyntheticConnector;

impl Connect for SyntheticConnector {
    fn connect(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        info!(source = %camera.source, "opening synthetic stream");
        Ok(Box::new(SyntheticSource {
            width: camera.width,
            height: camera.height,
            interval: Duration::from_secs_f64(camera.frame_interval()),
            started: Instant::now(),
            frame_count: 0,
        }))
    }
}

struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    started: Instant,
    frame_count: u64,
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<SourceFrame, SourceError> {
        // Pace to the nominal rate, like a live stream would.
        let due = pacing_deadline(self.frame_count, self.interval);
        let elapsed = self.started.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }

        let n = self.frame_count;
        self.frame_count += 1;

        let pixel_count = (self.width * self.height * 3) as usize;
        let shade = (n % 256) as u8;
        let pixels = vec![shade; pixel_count];

        // Every 12th frame pretends to be a keyframe, the rest predicted.
        let frame_type = if n % 12 == 0 {
            FrameType::Intra
        } else {
            FrameType::Predicted
        };

        Ok(SourceFrame {
            pixels,
            width: self.width,
            height: self.height,
            channels: 3,
            pts: n as f64 * self.interval.as_secs_f64(),
            frame_type,
            motion_vectors: Vec::new(),
        })
    }
}

/// Offset of frame `frame_count` from stream start. Computed in f64 so the
/// full u64 counter range stays free of `Duration` multiply overflow.
fn pacing_deadline(frame_count: u64, interval: Duration) -> Duration {
    Duration::from_secs_f64(frame_count as f64 * interval.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_deadline_scales_with_frame_count() {
        let interval = Duration::from_millis(10);
        assert_eq!(pacing_deadline(0, interval), Duration::ZERO);
        assert_eq!(pacing_deadline(3, interval), Duration::from_millis(30));
    }

    #[test]
    fn pacing_deadline_survives_huge_frame_counts() {
        // Far beyond u32: a long-lived stream must not panic the pacer.
        let interval = Duration::from_millis(1);
        let due = pacing_deadline(u64::from(u32::MAX) + 10_000, interval);
        assert!(due > Duration::from_secs(4_000_000));
    }

    #[test]
    fn synthetic_source_counts_pts_from_zero() {
        let camera = CameraConfig {
            source: "synthetic://cam/0".into(),
            calibration: "calibration/0".into(),
            width: 2,
            height: 2,
            frame_rate: 1000.0,
        };
        let mut source = SyntheticConnector.connect(&camera).unwrap();

        let first = source.read().unwrap();
        let second = source.read().unwrap();
        assert_eq!(first.pts, 0.0);
        assert!((second.pts - 0.001).abs() < 1e-9);
        assert_eq!(first.pixels.len(), 2 * 2 * 3);
    }
}

