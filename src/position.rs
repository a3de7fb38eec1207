//! Position Tracker: current offset and duration of the live session.
//!
//! The control thread is the only writer. Readers (the host's reading-position store, the
//! UI's progress bar) go through a [`PositionHandle`], which reads lock-free atomics and
//! never touches the state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const UNKNOWN_DURATION: u64 = u64::MAX;

struct PositionShared {
    offset_micros: AtomicU64,
    duration_micros: AtomicU64,
}

/// Read-only view of the tracker for the persistence boundary.
#[derive(Clone)]
pub struct PositionHandle {
    shared: Arc<PositionShared>,
}

impl PositionHandle {
    /// Offset as of the last tick, seek, pause or resume.
    pub fn current_offset(&self) -> Duration {
        Duration::from_micros(self.shared.offset_micros.load(Ordering::Acquire))
    }

    /// Total duration, if known.
    pub fn duration(&self) -> Option<Duration> {
        match self.shared.duration_micros.load(Ordering::Acquire) {
            UNKNOWN_DURATION => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }
}

impl std::fmt::Debug for PositionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionHandle")
            .field("offset", &self.current_offset())
            .field("duration", &self.duration())
            .finish()
    }
}

/// Offset bookkeeping for one machine.
///
/// While running, the offset advances with elapsed time scaled by the rate, measured from
/// an anchor that is reset on every seek, rate change, pause and resume.
pub struct PositionTracker {
    anchor_offset: Duration,
    anchor_at: Option<Instant>,
    rate: f32,
    duration: Option<Duration>,
    offset: Duration,
    handle: PositionHandle,
}

impl PositionTracker {
    pub fn new() -> Self {
        let handle = PositionHandle {
            shared: Arc::new(PositionShared {
                offset_micros: AtomicU64::new(0),
                duration_micros: AtomicU64::new(UNKNOWN_DURATION),
            }),
        };
        Self {
            anchor_offset: Duration::ZERO,
            anchor_at: None,
            rate: 1.0,
            duration: None,
            offset: Duration::ZERO,
            handle,
        }
    }

    pub fn handle(&self) -> PositionHandle {
        self.handle.clone()
    }

    /// Back to zero with no duration, as when no session exists.
    pub fn reset(&mut self) {
        self.anchor_offset = Duration::ZERO;
        self.anchor_at = None;
        self.rate = 1.0;
        self.duration = None;
        self.offset = Duration::ZERO;
        self.publish();
    }

    pub fn set_duration(&mut self, duration: Option<Duration>) {
        self.duration = duration;
        self.offset = self.clamp(self.offset);
        self.anchor_offset = self.clamp(self.anchor_offset);
        self.publish();
    }

    /// Starts advancing from the current offset.
    pub fn start(&mut self, now: Instant) {
        self.anchor_offset = self.offset;
        self.anchor_at = Some(now);
        self.publish();
    }

    /// Freezes at the offset reached by `now`.
    pub fn halt(&mut self, now: Instant) {
        self.offset = self.compute(now);
        self.anchor_offset = self.offset;
        self.anchor_at = None;
        self.publish();
    }

    /// Jumps to `offset`, clamped to the known duration. Returns the applied offset.
    pub fn seek(&mut self, offset: Duration, now: Instant) -> Duration {
        self.offset = self.clamp(offset);
        self.anchor_offset = self.offset;
        if self.anchor_at.is_some() {
            self.anchor_at = Some(now);
        }
        self.publish();
        self.offset
    }

    pub fn set_rate(&mut self, rate: f32, now: Instant) {
        if self.anchor_at.is_some() {
            self.offset = self.compute(now);
            self.anchor_offset = self.offset;
            self.anchor_at = Some(now);
        }
        self.rate = rate;
        self.publish();
    }

    /// Periodic update while running. Never moves backwards.
    pub fn tick(&mut self, now: Instant) -> Duration {
        if self.anchor_at.is_some() {
            self.offset = self.offset.max(self.compute(now));
            self.publish();
        }
        self.offset
    }

    pub fn current_offset(&self) -> Duration {
        self.offset
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_running(&self) -> bool {
        self.anchor_at.is_some()
    }

    /// True once the offset has reached a known duration.
    pub fn reached_end(&self) -> bool {
        matches!(self.duration, Some(duration) if self.offset >= duration)
    }

    fn compute(&self, now: Instant) -> Duration {
        match self.anchor_at {
            Some(anchor_at) => {
                let elapsed = now.saturating_duration_since(anchor_at).as_secs_f64();
                let advanced = Duration::try_from_secs_f64(elapsed * self.rate as f64)
                    .unwrap_or(Duration::MAX);
                // Saturates: an unknown duration lets seeks land anywhere
                self.clamp(
                    self.anchor_offset
                        .checked_add(advanced)
                        .unwrap_or(Duration::MAX),
                )
            }
            None => self.offset,
        }
    }

    fn clamp(&self, offset: Duration) -> Duration {
        match self.duration {
            Some(duration) => offset.min(duration),
            None => offset,
        }
    }

    fn publish(&self) {
        let shared = &self.handle.shared;
        shared
            .offset_micros
            .store(saturating_micros(self.offset), Ordering::Release);
        let duration = self
            .duration
            .map(|d| saturating_micros(d).min(UNKNOWN_DURATION - 1))
            .unwrap_or(UNKNOWN_DURATION);
        shared.duration_micros.store(duration, Ordering::Release);
    }
}

fn saturating_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}
