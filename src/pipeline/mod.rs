pub mod ringbuf;

pub use ringbuf::{BufferStats, FrameRingBuffer};
