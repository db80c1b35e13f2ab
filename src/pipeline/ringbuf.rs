//! Bounded drop-oldest ring buffer for per-channel frame handoff

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use ringbuf::{traits::*, HeapRb};

use crate::capture::frame::DecodedFrame;

/// Single-producer/single-consumer frame buffer, capacity fixed at
/// construction. The producer is one capture channel's decode loop, the
/// consumer is the synchronizer; a short critical section per operation is
/// the only coordination, and there is no cross-channel locking.
pub struct FrameRingBuffer {
    ring: Mutex<HeapRb<DecodedFrame>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: append a frame. If the buffer is at capacity the oldest
    /// frame is evicted first, so the decode loop never stalls on a slow
    /// consumer cycle.
    pub fn push(&self, frame: DecodedFrame) {
        let mut ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.push_overwrite(frame).is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: remove and return the oldest frame, or `None` if the
    /// buffer is empty. Never blocks.
    pub fn pop_oldest(&self) -> Option<DecodedFrame> {
        let mut ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let frame = ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        match self.ring.lock() {
            Ok(g) => g.occupied_len(),
            Err(poisoned) => poisoned.into_inner().occupied_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::capture::frame::{DecodedFrame, FrameStatus, FrameType};

    fn frame(unix_ts: f64) -> DecodedFrame {
        DecodedFrame {
            status: FrameStatus::Ok,
            pts: unix_ts,
            unix_ts,
            frame_type: FrameType::Unknown,
            motion_vectors: Vec::new(),
            pixels: None,
        }
    }

    #[test]
    fn pop_on_empty_is_none() {
        let buf = FrameRingBuffer::new(2);
        assert!(buf.pop_oldest().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn drop_oldest_on_overflow() {
        let buf = FrameRingBuffer::new(2);
        buf.push(frame(1.0));
        buf.push(frame(2.0));
        buf.push(frame(3.0));

        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop_oldest().unwrap().unix_ts, 2.0);
        assert_eq!(buf.pop_oldest().unwrap().unix_ts, 3.0);
        assert_eq!(buf.stats().dropped, 1);
    }

    #[test]
    fn fifo_order() {
        let buf = FrameRingBuffer::new(4);
        for ts in [1.0, 2.0, 3.0] {
            buf.push(frame(ts));
        }
        assert_eq!(buf.pop_oldest().unwrap().unix_ts, 1.0);
        assert_eq!(buf.pop_oldest().unwrap().unix_ts, 2.0);
    }

    #[test]
    fn bounded_under_concurrent_push_pop() {
        let buf = Arc::new(FrameRingBuffer::new(3));
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..10_000 {
                    buf.push(frame(i as f64));
                }
            })
        };
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut last = f64::NEG_INFINITY;
                for _ in 0..10_000 {
                    if let Some(f) = buf.pop_oldest() {
                        // Order must survive eviction.
                        assert!(f.unix_ts > last);
                        last = f.unix_ts;
                    }
                    assert!(buf.len() <= 3);
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();

        let stats = buf.stats();
        assert_eq!(stats.written, 10_000);
        assert_eq!(stats.read + stats.dropped + buf.len(), 10_000);
    }
}
