use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Validity of one channel's entry in a packet.
///
/// A single tagged status consumed uniformly by callers; decode failures,
/// connection loss and sync mismatches all land here rather than in
/// separate error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    /// Frame decoded and within the tolerance window; pixel data present.
    Ok,
    /// The decoder rejected this frame; the stream itself is still up.
    DecodeError,
    /// Connection lost; the channel is reconnecting.
    Disconnected,
    /// No successful decode for longer than the grace period.
    Offline,
    /// The channel's buffer was empty this round.
    NoData,
    /// Frame present but outside the tolerance window relative to the
    /// packet's reference timestamp. Data is still included.
    OutOfSync,
}

/// Codec frame type as reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameType {
    Intra,
    Predicted,
    Bidirectional,
    #[default]
    Unknown,
}

/// Per-block displacement vector extracted from the compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionVector {
    pub dx: i32,
    pub dy: i32,
}

/// Owned pixel data with explicit geometry.
///
/// Always a copy of the decoder's output: the decoder reuses its own frame
/// memory, so the bytes are copied out once at push time and stay valid no
/// matter when the consumer looks at them.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl PixelBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One decoded frame as it travels from a capture channel's decode loop
/// into its frame buffer.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub status: FrameStatus,
    /// Codec-relative presentation timestamp, seconds.
    pub pts: f64,
    /// UNIX wall-clock time derived by the channel's clock, seconds.
    pub unix_ts: f64,
    pub frame_type: FrameType,
    pub motion_vectors: Vec<MotionVector>,
    pub pixels: Option<PixelBuffer>,
}

impl DecodedFrame {
    /// A frame recording a failed decode attempt. The synchronizer never
    /// aligns on it; the capture channel overwrites `unix_ts` with its
    /// clock's floor before buffering so per-channel timestamp ordering
    /// holds for error frames too.
    pub fn decode_error() -> Self {
        Self {
            status: FrameStatus::DecodeError,
            pts: 0.0,
            unix_ts: 0.0,
            frame_type: FrameType::Unknown,
            motion_vectors: Vec::new(),
            pixels: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FrameStatus::Ok
    }
}
