//! Codec-timestamp to wall-clock translation, one clock per channel.

use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum step applied when a codec timestamp regresses, so derived UNIX
/// timestamps stay strictly non-decreasing per channel.
const MIN_STEP: f64 = 1e-6;

/// Maps codec-relative presentation timestamps to UNIX wall-clock seconds.
///
/// The anchor is taken from the first decoded frame
/// (`anchor = arrival - pts`); subsequent frames are `anchor + pts`. If the
/// observed arrival-time delta diverges from the pts delta by more than the
/// drift threshold the clock re-anchors on the current frame instead of
/// accumulating skew.
#[derive(Debug)]
pub struct TimestampClock {
    drift_threshold: f64,
    anchor: Option<f64>,
    last_pts: f64,
    last_arrival: f64,
    last_unix: Option<f64>,
}

impl TimestampClock {
    pub fn new(drift_threshold: f64) -> Self {
        Self {
            drift_threshold,
            anchor: None,
            last_pts: 0.0,
            last_arrival: 0.0,
            last_unix: None,
        }
    }

    /// Derive the UNIX timestamp for a frame with codec timestamp `pts`
    /// that arrived at wall-clock time `arrival`.
    pub fn to_unix(&mut self, pts: f64, arrival: f64) -> f64 {
        let anchor = match self.anchor {
            None => {
                let anchor = arrival - pts;
                self.anchor = Some(anchor);
                anchor
            }
            Some(anchor) => {
                let pts_delta = pts - self.last_pts;
                let arrival_delta = arrival - self.last_arrival;
                if (arrival_delta - pts_delta).abs() > self.drift_threshold {
                    let anchor = arrival - pts;
                    self.anchor = Some(anchor);
                    anchor
                } else {
                    anchor
                }
            }
        };

        let mut unix_ts = anchor + pts;
        if let Some(prev) = self.last_unix {
            if unix_ts <= prev {
                unix_ts = prev + MIN_STEP;
            }
        }

        self.last_pts = pts;
        self.last_arrival = arrival;
        self.last_unix = Some(unix_ts);
        unix_ts
    }

    /// Forget the anchor. Called on reconnect, when the stream starts a new
    /// pts epoch. The monotonic floor survives so timestamps never regress
    /// across a reconnect either.
    pub fn reset(&mut self) {
        self.anchor = None;
    }

    /// Latest UNIX timestamp handed out, or 0.0 before the first frame.
    /// Error frames are stamped with this so buffered timestamps stay
    /// non-decreasing even around failed decodes.
    pub fn floor(&self) -> f64 {
        self.last_unix.unwrap_or(0.0)
    }
}

/// Current wall-clock time as UNIX seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
