use thiserror::Error;

/// Fatal construction-time errors. Everything that can go wrong after the
/// channel threads start is reported as per-entry [`FrameStatus`] instead,
/// so a caller never loses packet delivery to a single bad channel.
///
/// [`FrameStatus`]: crate::FrameStatus
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no cameras configured")]
    NoCameras,

    #[error("camera {index}: {reason}")]
    InvalidConfig { index: usize, reason: String },

    #[error("camera {index}: calibration reference {reference:?}: {source}")]
    Calibration {
        index: usize,
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the decode/demux collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Initial handshake with the stream failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A single frame could not be decoded; the stream itself is still up.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The stream dropped mid-flight; the channel must reconnect.
    #[error("stream lost: {0}")]
    Stream(String),
}
