//! Progress reporting for downloads.
//!
//! A single [`ProgressTracker`] spans one whole download operation. Sub-steps
//! (each delta, the full fallback) get a [`ProgressTracker::segment`] sink
//! that maps their own 0..100 into a slice of the overall range. The tracker
//! forwards a value only when it exceeds everything forwarded before, so a
//! caller drawing one progress bar sees it move forward only, even when a
//! failed delta chain hands over to the full download.

use std::sync::{Arc, Mutex, PoisonError};

/// Callback receiving a percentage in `0..=100`.
///
/// May be invoked from a worker thread.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// Monotonic progress aggregator.
pub struct ProgressTracker {
    sink: Option<ProgressSink>,
    // -1 until the first value is forwarded so that 0 is reported once.
    last: Mutex<i16>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Create a tracker forwarding to `sink`.
    pub fn new(sink: Option<ProgressSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            last: Mutex::new(-1),
        })
    }

    /// Report overall progress. Values above 100 are clamped; values not
    /// greater than the last forwarded value are dropped.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if i16::from(percent) <= *last {
            return;
        }
        *last = i16::from(percent);
        // Held across the call so concurrent reporters deliver in order.
        if let Some(sink) = &self.sink {
            sink(percent);
        }
    }

    /// Highest value forwarded so far (0 if none).
    pub fn current(&self) -> u8 {
        let last = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        u8::try_from(last.max(0)).unwrap_or(100)
    }

    /// Report 100.
    pub fn complete(&self) {
        self.report(100);
    }

    /// A sink mapping a sub-step's 0..100 onto `start..=end` of the overall
    /// range.
    pub fn segment(self: &Arc<Self>, start: u8, end: u8) -> ProgressSink {
        let tracker = Arc::clone(self);
        let start = start.min(100);
        let end = end.clamp(start, 100);
        Arc::new(move |p: u8| tracker.report(scale(start, end, p)))
    }

    /// Split `start..=end` into `parts` equal segments and return the bounds
    /// of segment `index`.
    pub fn split(start: u8, end: u8, parts: usize, index: usize) -> (u8, u8) {
        if parts == 0 {
            return (start, end);
        }
        let span = usize::from(end.saturating_sub(start));
        let lo = usize::from(start) + span * index / parts;
        let hi = usize::from(start) + span * (index + 1) / parts;
        (
            u8::try_from(lo).unwrap_or(100),
            u8::try_from(hi).unwrap_or(100),
        )
    }
}

fn scale(start: u8, end: u8, percent: u8) -> u8 {
    let span = u16::from(end - start);
    let offset = span * u16::from(percent.min(100)) / 100;
    u8::try_from(u16::from(start) + offset).unwrap_or(100)
}
