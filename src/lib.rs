//! Narrator: playback control core for spoken-word narration.
//!
//! A [`NarratorEngine`] owns a single control thread. Host commands, platform interruption
//! and route notifications, source load outcomes and progress ticks all pass through one
//! ordered queue and are applied by the playback state machine one at a time. The host
//! learns about every accepted transition through [`StateEvent`]s and reads the live
//! position through a [`PositionHandle`].
//!
//! ```no_run
//! use narrator::{NarratorConfig, NarratorEngine, SimulatedOutput, SymphoniaProbe};
//! use std::time::Duration;
//!
//! let (output, _control) = SimulatedOutput::new();
//! let engine = NarratorEngine::new(NarratorConfig::default(), output, SymphoniaProbe)?;
//! let events = engine.subscribe();
//!
//! engine.play("chapter-01.mp3", Duration::from_secs(42));
//! while let Some(event) = events.recv_timeout(Duration::from_secs(1)) {
//!     println!("{} at {:?}", event.state, event.offset);
//! }
//! engine.shutdown()?;
//! # Ok::<(), narrator::NarratorError>(())
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
mod machine;
pub mod platform;
pub mod playback;
pub mod position;
mod queue;
pub mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NarratorConfig;
pub use engine::NarratorEngine;
pub use error::{ErrorKind, GuardError, LoadError, NarratorError};
pub use events::{EventNotifier, EventSubscription, StateEvent};
pub use guard::{SessionGuard, SessionGuardToken};
pub use platform::{
    AudioOutput, FocusPolicy, OutputMode, PlatformNotifier, SimulatedOutput,
    SimulatedOutputControl,
};
#[cfg(feature = "cpal-output")]
pub use platform::CpalOutput;
pub use playback::{
    Command, PlaybackSession, PlaybackState, RouteChange, RouteChangeReason, SessionId,
};
pub use position::PositionHandle;
pub use queue::CommandSender;
pub use source::{SourceHandle, SourceInfo, SourceLoader, SymphoniaProbe};
