//! Platform boundary: the OS audio service narration plays through.
//!
//! An [`AudioOutput`] implementation wraps one platform's output session. The
//! [`SessionGuard`](crate::guard::SessionGuard) is its only caller, and only from the control
//! thread. Platform notifications go the other way through a [`PlatformNotifier`], which turns
//! them into synthetic commands on the queue.

#[cfg(feature = "cpal-output")]
mod cpal_output;
mod simulated;

#[cfg(feature = "cpal-output")]
pub use cpal_output::{CpalOutput, FillInfo, OutputFillCallback};
pub use simulated::{OutputCall, SimulatedOutput, SimulatedOutputControl};

use crate::error::GuardError;
use crate::playback::{Command, RouteChange};
use crate::queue::CommandSender;
use crate::source::SourceHandle;
use std::time::Duration;

/// How narration shares the output with other applications' audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusPolicy {
    /// Play alongside other audio
    Mix,
    /// Lower other audio while narrating
    #[default]
    Duck,
    /// Ask other audio to stop
    Exclusive,
}

/// Mode of the platform output as seen by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Nothing held
    Released,
    /// Held but silent
    Suspended,
    /// Held and sounding
    Active,
}

/// One platform's audio output service.
///
/// Calls arrive from the control thread only, one at a time. Implementations may block
/// briefly on the OS but must not wait on the command queue.
pub trait AudioOutput: Send {
    /// Hands the platform the channel for interruption and route notifications.
    fn subscribe(&mut self, notifier: PlatformNotifier);

    /// Takes the output for `source`, configured for narration under `policy`. The output
    /// starts suspended.
    fn acquire(&mut self, source: &SourceHandle, policy: FocusPolicy) -> Result<(), GuardError>;

    /// Starts sounding. Fails if focus was lost since acquisition.
    fn activate(&mut self) -> Result<(), GuardError>;

    /// Goes silent, keeping the output.
    fn suspend(&mut self);

    /// Gives the output back.
    fn release(&mut self);

    /// Moves the platform player to `offset`.
    fn seek(&mut self, _offset: Duration) {}

    /// Changes the platform player's rate.
    fn set_rate(&mut self, _rate: f32) {}
}

/// Handle the platform uses to report asynchronous events.
///
/// Each call enqueues a synthetic command at the moment the notification fires, so it is
/// ordered against host commands by arrival. Safe to call from any thread.
#[derive(Clone)]
pub struct PlatformNotifier {
    queue: CommandSender,
}

impl PlatformNotifier {
    pub(crate) fn new(queue: CommandSender) -> Self {
        Self { queue }
    }

    pub fn interruption_began(&self) {
        log::info!("Platform reported interruption began");
        self.queue.enqueue(Command::InterruptionBegan);
    }

    pub fn interruption_ended(&self, should_resume: bool) {
        log::info!(
            "Platform reported interruption ended (should_resume: {})",
            should_resume
        );
        self.queue
            .enqueue(Command::InterruptionEnded { should_resume });
    }

    pub fn route_changed(&self, change: RouteChange) {
        log::info!("Platform reported route change: {:?}", change);
        self.queue.enqueue(Command::RouteChanged(change));
    }
}
