//! Playback states, commands and the session record.
//!
//! This module provides the vocabulary shared by the queue, the state machine and the host:
//! - [`PlaybackState`]: where the machine is (idle, loading, playing, ...)
//! - [`Command`]: requests from the host and synthetic commands from the platform
//! - [`RouteChange`]: what the platform reported about the output route
//! - [`PlaybackSession`]: the single live narration session
//!
//! Hosts normally issue commands through [`NarratorEngine`](crate::NarratorEngine) methods
//! rather than building [`Command`] values themselves.

use crate::error::ErrorKind;
use crate::guard::SessionGuardToken;
use crate::source::SourceHandle;
use std::time::Duration;
use uuid::Uuid;

/// Identifies one narration session from `play` to stop or error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// State of the playback machine as observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No session exists
    Idle,
    /// A session holds the output and waits for its source
    Loading,
    /// Output is active and sounding
    Playing,
    /// Output is silent at the host's request; resource retained
    Paused,
    /// Output was suspended by the platform; resource retained
    Interrupted,
    /// The session ended at the host's request; always followed by `Idle`
    Stopped,
    /// The session ended with a failure
    Error(ErrorKind),
}

impl PlaybackState {
    /// Returns true for the states in which a session (and its guard token) exists.
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Playing | Self::Paused | Self::Interrupted
        )
    }

    /// Returns true while the output is expected to be sounding.
    pub fn is_sounding(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Playing => write!(f, "Playing"),
            Self::Paused => write!(f, "Paused"),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Error(kind) => write!(f, "Error({:?})", kind),
        }
    }
}

/// Why the platform changed the output route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    /// The device in use went away, e.g. headphones unplugged
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Unknown,
}

/// A route change reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteChange {
    pub reason: RouteChangeReason,
    /// Whether any output remains usable after the change
    pub output_available: bool,
}

impl RouteChange {
    pub fn new(reason: RouteChangeReason, output_available: bool) -> Self {
        Self {
            reason,
            output_available,
        }
    }

    /// A change narration cannot keep sounding through.
    pub fn is_incompatible(&self) -> bool {
        !self.output_available || self.reason == RouteChangeReason::OldDeviceUnavailable
    }
}

/// Requests applied by the state machine in queue order.
///
/// The first six variants come from the host; the interruption and route variants are
/// synthetic commands the platform injects so they are ordered with everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a session on `source` at `start`
    Play { source: SourceHandle, start: Duration },
    Pause,
    Resume,
    Seek(Duration),
    /// Abort everything; collapses commands still waiting in the queue
    Stop,
    SetRate(f32),
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged(RouteChange),
}

impl Command {
    /// Returns true for commands generated from platform notifications.
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            Self::InterruptionBegan | Self::InterruptionEnded { .. } | Self::RouteChanged(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Play { .. } => "Play",
            Self::Pause => "Pause",
            Self::Resume => "Resume",
            Self::Seek(_) => "Seek",
            Self::Stop => "Stop",
            Self::SetRate(_) => "SetRate",
            Self::InterruptionBegan => "InterruptionBegan",
            Self::InterruptionEnded { .. } => "InterruptionEnded",
            Self::RouteChanged(_) => "RouteChanged",
        }
    }
}

/// The live narration session.
///
/// Owned by the state machine; created on an accepted `Play`, destroyed on stop or on a
/// terminal error, at which point its guard token goes back to the
/// [`SessionGuard`](crate::guard::SessionGuard). The current offset is kept by the
/// [`PositionTracker`](crate::position::PositionTracker).
#[derive(Debug)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub source: SourceHandle,
    /// Offset requested by `play`, applied once the source is ready
    pub start_offset: Duration,
    /// Total length, unknown until the source has loaded (and possibly after)
    pub duration: Option<Duration>,
    pub rate: f32,
    pub(crate) token: SessionGuardToken,
    /// Set while interrupted if the session was sounding when the interruption began
    pub(crate) resume_after_interruption: bool,
    /// Output route went away before the source was ready
    pub(crate) route_lost: bool,
}

impl PlaybackSession {
    pub(crate) fn new(
        source: SourceHandle,
        start_offset: Duration,
        rate: f32,
        token: SessionGuardToken,
    ) -> Self {
        let id = SessionId::new();
        log::info!("Session {} created for {} at {:?}", id, source, start_offset);
        Self {
            id,
            source,
            start_offset,
            duration: None,
            rate,
            token,
            resume_after_interruption: false,
            route_lost: false,
        }
    }

    /// Clamps an offset into `[0, duration]` when the duration is known.
    pub fn clamp_offset(&self, offset: Duration) -> Duration {
        match self.duration {
            Some(duration) => offset.min(duration),
            None => offset,
        }
    }

    pub(crate) fn into_token(self) -> SessionGuardToken {
        self.token
    }
}
