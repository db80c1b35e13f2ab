pub mod channel;
pub mod clock;
pub mod frame;
pub mod source;

pub use channel::CaptureChannel;
pub use clock::TimestampClock;
pub use frame::{DecodedFrame, FrameStatus, FrameType, MotionVector, PixelBuffer};
pub use source::{Connect, FrameSource, SourceFrame};
