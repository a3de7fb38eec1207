//! In-memory output backend.
//!
//! Nothing is played. The output only tracks its mode and records every call, and a control
//! handle lets tests and the demo stand in for the OS.

use crate::error::GuardError;
use crate::platform::{AudioOutput, FocusPolicy, OutputMode, PlatformNotifier};
use crate::playback::RouteChange;
use crate::source::SourceHandle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call made on the simulated output, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Acquire(SourceHandle, FocusPolicy),
    Activate,
    Suspend,
    Release,
    Seek(Duration),
    SetRate(f32),
}

#[derive(Default)]
struct SimState {
    mode: Option<OutputMode>,
    acquire_error: Option<GuardError>,
    activate_error: Option<GuardError>,
    notifier: Option<PlatformNotifier>,
    calls: Vec<OutputCall>,
    overlapping_acquires: usize,
}

impl SimState {
    fn mode(&self) -> OutputMode {
        self.mode.unwrap_or(OutputMode::Released)
    }
}

/// In-memory output for headless hosts, tests and the demo.
///
/// Behaviour is steered through the [`SimulatedOutputControl`] returned by
/// [`SimulatedOutput::new`]: deny focus, fail reactivation, or fire interruption and route
/// notifications as the OS would.
pub struct SimulatedOutput {
    state: Arc<Mutex<SimState>>,
}

/// Cloneable handle that steers and inspects a [`SimulatedOutput`].
#[derive(Clone)]
pub struct SimulatedOutputControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedOutput {
    pub fn new() -> (Self, SimulatedOutputControl) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            Self {
                state: state.clone(),
            },
            SimulatedOutputControl { state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for SimulatedOutput {
    fn subscribe(&mut self, notifier: PlatformNotifier) {
        self.lock().notifier = Some(notifier);
    }

    fn acquire(&mut self, source: &SourceHandle, policy: FocusPolicy) -> Result<(), GuardError> {
        let mut state = self.lock();
        state.calls.push(OutputCall::Acquire(source.clone(), policy));
        if let Some(err) = state.acquire_error.clone() {
            return Err(err);
        }
        if state.mode() != OutputMode::Released {
            state.overlapping_acquires += 1;
            return Err(GuardError::ResourceUnavailable(
                "output already held".to_string(),
            ));
        }
        state.mode = Some(OutputMode::Suspended);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), GuardError> {
        let mut state = self.lock();
        state.calls.push(OutputCall::Activate);
        if let Some(err) = state.activate_error.clone() {
            return Err(err);
        }
        if state.mode() == OutputMode::Released {
            return Err(GuardError::ResourceUnavailable(
                "output not acquired".to_string(),
            ));
        }
        state.mode = Some(OutputMode::Active);
        Ok(())
    }

    fn suspend(&mut self) {
        let mut state = self.lock();
        state.calls.push(OutputCall::Suspend);
        if state.mode() == OutputMode::Active {
            state.mode = Some(OutputMode::Suspended);
        }
    }

    fn release(&mut self) {
        let mut state = self.lock();
        state.calls.push(OutputCall::Release);
        state.mode = Some(OutputMode::Released);
    }

    fn seek(&mut self, offset: Duration) {
        self.lock().calls.push(OutputCall::Seek(offset));
    }

    fn set_rate(&mut self, rate: f32) {
        self.lock().calls.push(OutputCall::SetRate(rate));
    }
}

impl SimulatedOutputControl {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next acquisitions fail as if another app held exclusive focus.
    pub fn deny_focus(&self) {
        self.lock().acquire_error = Some(GuardError::ResourceUnavailable(
            "focus held by another application".to_string(),
        ));
    }

    /// Makes the next acquisitions fail as if the platform disallowed audio.
    pub fn deny_permission(&self) {
        self.lock().acquire_error = Some(GuardError::PermissionDenied(
            "audio disabled for this application".to_string(),
        ));
    }

    pub fn grant_focus(&self) {
        self.lock().acquire_error = None;
    }

    /// Makes activation fail, as after losing focus while paused.
    pub fn lose_focus(&self) {
        self.lock().activate_error = Some(GuardError::ResourceUnavailable(
            "focus lost".to_string(),
        ));
    }

    pub fn regain_focus(&self) {
        self.lock().activate_error = None;
    }

    pub fn mode(&self) -> OutputMode {
        self.lock().mode()
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.lock().calls.clone()
    }

    /// Acquisitions attempted while the output was already held.
    pub fn overlapping_acquires(&self) -> usize {
        self.lock().overlapping_acquires
    }

    /// Fires an interruption-began notification as the OS would.
    pub fn begin_interruption(&self) {
        if let Some(notifier) = self.notifier() {
            notifier.interruption_began();
        }
    }

    pub fn end_interruption(&self, should_resume: bool) {
        if let Some(notifier) = self.notifier() {
            notifier.interruption_ended(should_resume);
        }
    }

    pub fn change_route(&self, change: RouteChange) {
        if let Some(notifier) = self.notifier() {
            notifier.route_changed(change);
        }
    }

    // Cloned out so the notification is not sent while holding the lock
    fn notifier(&self) -> Option<PlatformNotifier> {
        let notifier = self.lock().notifier.clone();
        if notifier.is_none() {
            log::warn!("Simulated output has no subscriber; notification dropped");
        }
        notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_activate_release() {
        let (mut output, control) = SimulatedOutput::new();
        let source = SourceHandle::new("chapter-1");

        assert_eq!(control.mode(), OutputMode::Released);
        output.acquire(&source, FocusPolicy::Duck).unwrap();
        assert_eq!(control.mode(), OutputMode::Suspended);
        output.activate().unwrap();
        assert_eq!(control.mode(), OutputMode::Active);
        output.suspend();
        assert_eq!(control.mode(), OutputMode::Suspended);
        output.release();
        assert_eq!(control.mode(), OutputMode::Released);

        assert_eq!(
            control.calls(),
            vec![
                OutputCall::Acquire(source, FocusPolicy::Duck),
                OutputCall::Activate,
                OutputCall::Suspend,
                OutputCall::Release,
            ]
        );
    }

    #[test]
    fn test_denied_focus() {
        let (mut output, control) = SimulatedOutput::new();
        control.deny_focus();
        let err = output
            .acquire(&SourceHandle::new("a"), FocusPolicy::Exclusive)
            .unwrap_err();
        assert!(matches!(err, GuardError::ResourceUnavailable(_)));
        assert_eq!(control.mode(), OutputMode::Released);

        control.grant_focus();
        assert!(
            output
                .acquire(&SourceHandle::new("a"), FocusPolicy::Exclusive)
                .is_ok()
        );
    }

    #[test]
    fn test_double_acquire_is_recorded() {
        let (mut output, control) = SimulatedOutput::new();
        output.acquire(&SourceHandle::new("a"), FocusPolicy::Mix).unwrap();
        assert!(output.acquire(&SourceHandle::new("b"), FocusPolicy::Mix).is_err());
        assert_eq!(control.overlapping_acquires(), 1);
    }
}
