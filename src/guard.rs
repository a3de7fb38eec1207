//! Session Guard: exclusive ownership of the platform audio output.
//!
//! The output is modelled as a [`SessionGuardToken`] that is neither `Clone` nor `Copy`. At
//! most one exists at a time; the session holding it is the only one that can make the output
//! sound, and giving it back consumes it. The guard is driven from the control thread only,
//! so a release followed by an acquire can never interleave with an interruption callback:
//! those arrive as queued commands.

use crate::error::GuardError;
use crate::platform::{AudioOutput, FocusPolicy, OutputMode, PlatformNotifier};
use crate::source::SourceHandle;
use std::time::Duration;
use uuid::Uuid;

/// Proof of exclusive ownership of the output.
#[derive(Debug)]
pub struct SessionGuardToken {
    id: Uuid,
    mode: OutputMode,
}

impl SessionGuardToken {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `Suspended` or `Active`; a token is never `Released` while it exists.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode == OutputMode::Active
    }
}

pub struct SessionGuard {
    output: Box<dyn AudioOutput>,
    policy: FocusPolicy,
    held: Option<Uuid>,
    mode: OutputMode,
}

impl SessionGuard {
    pub fn new(output: Box<dyn AudioOutput>, policy: FocusPolicy) -> Self {
        Self {
            output,
            policy,
            held: None,
            mode: OutputMode::Released,
        }
    }

    /// Connects the platform's interruption and route notifications to the queue.
    pub fn subscribe(&mut self, notifier: PlatformNotifier) {
        self.output.subscribe(notifier);
    }

    /// Takes the output for `source`. The returned token starts suspended.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if focus cannot be negotiated or a token is already out;
    /// `PermissionDenied` if the platform disallows audio.
    pub fn acquire(&mut self, source: &SourceHandle) -> Result<SessionGuardToken, GuardError> {
        if let Some(held) = self.held {
            log::error!("Acquire for {} while token {} is still held", source, held);
            return Err(GuardError::ResourceUnavailable(
                "output already held by another session".to_string(),
            ));
        }

        self.output.acquire(source, self.policy)?;

        let token = SessionGuardToken {
            id: Uuid::new_v4(),
            mode: OutputMode::Suspended,
        };
        self.held = Some(token.id);
        self.mode = OutputMode::Suspended;
        log::debug!("Guard token {} acquired ({:?})", token.id, self.policy);
        Ok(token)
    }

    /// Puts the output into sounding mode.
    ///
    /// # Errors
    ///
    /// Fails with `ResourceUnavailable` when focus was lost while the token was suspended.
    /// The token stays suspended and must still be released.
    pub fn activate(&mut self, token: &mut SessionGuardToken) -> Result<(), GuardError> {
        if !self.owns(token) {
            return Err(GuardError::ResourceUnavailable(
                "stale guard token".to_string(),
            ));
        }
        if token.mode == OutputMode::Active {
            return Ok(());
        }

        self.output.activate()?;
        token.mode = OutputMode::Active;
        self.mode = OutputMode::Active;
        log::debug!("Guard token {} active", token.id);
        Ok(())
    }

    /// Silences the output, keeping ownership.
    pub fn suspend(&mut self, token: &mut SessionGuardToken) {
        if !self.owns(token) || token.mode == OutputMode::Suspended {
            return;
        }

        self.output.suspend();
        token.mode = OutputMode::Suspended;
        self.mode = OutputMode::Suspended;
        log::debug!("Guard token {} suspended", token.id);
    }

    /// Gives the output back to the platform.
    pub fn release(&mut self, token: SessionGuardToken) {
        if !self.owns(&token) {
            return;
        }

        self.output.release();
        self.held = None;
        self.mode = OutputMode::Released;
        log::debug!("Guard token {} released", token.id);
    }

    pub fn seek(&mut self, token: &SessionGuardToken, offset: Duration) {
        if self.owns(token) {
            self.output.seek(offset);
        }
    }

    pub fn set_rate(&mut self, token: &SessionGuardToken, rate: f32) {
        if self.owns(token) {
            self.output.set_rate(rate);
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Mode of the platform output as last set through this guard.
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn owns(&self, token: &SessionGuardToken) -> bool {
        let owns = self.held == Some(token.id);
        if !owns {
            log::error!(
                "Guard token {} is not the held token ({:?})",
                token.id,
                self.held
            );
        }
        owns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{OutputCall, SimulatedOutput};

    fn guard() -> (SessionGuard, crate::platform::SimulatedOutputControl) {
        let (output, control) = SimulatedOutput::new();
        (SessionGuard::new(Box::new(output), FocusPolicy::Duck), control)
    }

    #[test]
    fn test_token_lifecycle() {
        let (mut guard, control) = guard();
        let source = SourceHandle::new("chapter-1");

        let mut token = guard.acquire(&source).unwrap();
        assert!(guard.is_held());
        assert_eq!(token.mode(), OutputMode::Suspended);

        guard.activate(&mut token).unwrap();
        assert!(token.is_active());
        assert_eq!(control.mode(), OutputMode::Active);

        guard.suspend(&mut token);
        assert_eq!(guard.output_mode(), OutputMode::Suspended);

        guard.release(token);
        assert!(!guard.is_held());
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_second_acquire_refused() {
        let (mut guard, control) = guard();
        let _token = guard.acquire(&SourceHandle::new("a")).unwrap();
        let err = guard.acquire(&SourceHandle::new("b")).unwrap_err();
        assert!(matches!(err, GuardError::ResourceUnavailable(_)));
        // Refused before reaching the platform
        assert_eq!(control.overlapping_acquires(), 0);
    }

    #[test]
    fn test_activate_after_focus_loss() {
        let (mut guard, control) = guard();
        let mut token = guard.acquire(&SourceHandle::new("a")).unwrap();
        control.lose_focus();

        assert!(guard.activate(&mut token).is_err());
        assert_eq!(token.mode(), OutputMode::Suspended);
        guard.release(token);
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_idempotent_activate_and_suspend() {
        let (mut guard, control) = guard();
        let mut token = guard.acquire(&SourceHandle::new("a")).unwrap();
        guard.suspend(&mut token);
        guard.activate(&mut token).unwrap();
        guard.activate(&mut token).unwrap();

        let calls = control.calls();
        assert_eq!(
            calls.iter().filter(|c| **c == OutputCall::Activate).count(),
            1
        );
        assert!(!calls.contains(&OutputCall::Suspend));
    }

    #[test]
    fn test_release_after_release_is_ignored() {
        let (mut guard, control) = guard();
        let token = guard.acquire(&SourceHandle::new("a")).unwrap();
        let stale = SessionGuardToken {
            id: token.id(),
            mode: OutputMode::Suspended,
        };
        guard.release(token);
        guard.release(stale);

        let releases = control
            .calls()
            .into_iter()
            .filter(|c| *c == OutputCall::Release)
            .count();
        assert_eq!(releases, 1);
    }
}
