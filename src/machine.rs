//! Playback State Machine.
//!
//! Applies queue entries one at a time on the control thread. This is the only place
//! playback state, the session and the guard token change, so none of it needs a lock.
//!
//! Every accepted transition updates the position tracker first and then publishes exactly
//! one [`StateEvent`]. Commands that make no sense in the current state are protocol
//! violations: logged, counted, and otherwise ignored.

use crate::clock::Clock;
use crate::config::NarratorConfig;
use crate::error::{ErrorKind, LoadError};
use crate::events::{EventNotifier, StateEvent};
use crate::guard::SessionGuard;
use crate::platform::OutputMode;
use crate::playback::{Command, PlaybackSession, PlaybackState, RouteChange, SessionId};
use crate::position::{PositionHandle, PositionTracker};
use crate::queue::{CommandSender, Delivery, QueueItem};
use crate::source::{SourceHandle, SourceInfo, SourceLoader};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct PlaybackStateMachine {
    config: NarratorConfig,
    state: PlaybackState,
    session: Option<PlaybackSession>,
    guard: SessionGuard,
    tracker: PositionTracker,
    notifier: EventNotifier,
    loader: Arc<dyn SourceLoader>,
    queue: CommandSender,
    clock: Arc<dyn Clock>,
    load_deadline: Option<Instant>,
    protocol_violations: u64,
    end_reported: bool,
}

impl PlaybackStateMachine {
    pub(crate) fn new(
        config: NarratorConfig,
        guard: SessionGuard,
        loader: Arc<dyn SourceLoader>,
        queue: CommandSender,
        notifier: EventNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            state: PlaybackState::Idle,
            session: None,
            guard,
            tracker: PositionTracker::new(),
            notifier,
            loader,
            queue,
            clock,
            load_deadline: None,
            protocol_violations: 0,
            end_reported: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> PositionHandle {
        self.tracker.handle()
    }

    /// Commands rejected as invalid for the state they arrived in.
    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations
    }

    /// True when the platform output mode matches what the state promises the host.
    pub fn output_consistent(&self) -> bool {
        let expected = match self.state {
            PlaybackState::Playing => OutputMode::Active,
            PlaybackState::Loading | PlaybackState::Paused | PlaybackState::Interrupted => {
                OutputMode::Suspended
            }
            PlaybackState::Idle | PlaybackState::Stopped | PlaybackState::Error(_) => {
                OutputMode::Released
            }
        };
        self.guard.output_mode() == expected && self.session.is_some() == self.state.has_session()
    }

    pub(crate) fn apply(&mut self, delivery: Delivery) {
        match delivery.item {
            QueueItem::Command(command) => self.handle_command(command, delivery.collapsed),
            QueueItem::SourceLoaded { session, result } => self.on_source_loaded(session, result),
            QueueItem::Tick => self.on_tick(),
        }
        debug_assert!(
            self.output_consistent(),
            "state {} does not match output {:?}",
            self.state,
            self.guard.output_mode()
        );
    }

    /// Ends any live session before the control thread exits.
    pub(crate) fn shutdown(&mut self) {
        if self.session.is_some() {
            log::info!("Shutting down with a live session; stopping it");
            self.stop(0);
        }
    }

    fn handle_command(&mut self, command: Command, collapsed: usize) {
        log::debug!("Applying {:?} in {}", command, self.state);
        match command {
            Command::Play { source, start } => self.play(source, start),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Seek(offset) => self.seek(offset),
            Command::Stop => self.stop(collapsed),
            Command::SetRate(rate) => self.set_rate(rate),
            Command::InterruptionBegan => self.interruption_began(),
            Command::InterruptionEnded { should_resume } => self.interruption_ended(should_resume),
            Command::RouteChanged(change) => self.route_changed(change),
        }
    }

    fn play(&mut self, source: SourceHandle, start: Duration) {
        if !matches!(self.state, PlaybackState::Idle | PlaybackState::Error(_)) {
            self.reject("Play", "a session is already live; stop it first");
            return;
        }

        let now = self.clock.now();
        self.tracker.reset();

        let token = match self.guard.acquire(&source) {
            Ok(token) => token,
            Err(e) => {
                log::error!("Could not acquire output for {}: {}", source, e);
                self.tracker.seek(start, now);
                self.emit(PlaybackState::Error(ErrorKind::from(&e)), None);
                return;
            }
        };

        let session = PlaybackSession::new(source.clone(), start, self.config.default_rate, token);
        let session_id = session.id;
        self.tracker.set_rate(session.rate, now);
        self.tracker.seek(start, now);
        self.session = Some(session);
        self.load_deadline = now.checked_add(self.config.load_timeout);
        if self.load_deadline.is_none() {
            log::warn!(
                "Load timeout {:?} is beyond the clock's range; loading is unbounded",
                self.config.load_timeout
            );
        }
        self.end_reported = false;
        self.emit(PlaybackState::Loading, Some(session_id));

        if let Err(e) = self.spawn_load(session_id, source) {
            log::error!("Could not start loading for session {}: {}", session_id, e);
            self.fail_session(ErrorKind::SourceLoadFailure);
        }
    }

    fn spawn_load(&self, session: SessionId, source: SourceHandle) -> std::io::Result<()> {
        let loader = self.loader.clone();
        let queue = self.queue.clone();
        std::thread::Builder::new()
            .name("narrator-loader".to_string())
            .spawn(move || {
                let result = loader.load(&source);
                match &result {
                    Ok(info) => log::debug!("Loaded {} ({:?})", source, info.duration),
                    Err(e) => log::debug!("Loading {} failed: {}", source, e),
                }
                queue.push(QueueItem::SourceLoaded { session, result });
            })
            .map(|_| ())
    }

    fn on_source_loaded(&mut self, session_id: SessionId, result: Result<SourceInfo, LoadError>) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            log::debug!("Ignoring load outcome for ended session {}", session_id);
            return;
        };
        if session.id != session_id || self.state != PlaybackState::Loading {
            log::debug!(
                "Ignoring stale load outcome for {} (current {} in {})",
                session_id,
                session.id,
                self.state
            );
            return;
        }
        self.load_deadline = None;

        let info = match result {
            Ok(info) => info,
            Err(e) => {
                log::error!("Session {}: source failed to load: {}", session_id, e);
                self.fail_session(ErrorKind::from(&e));
                return;
            }
        };

        session.duration = info.duration;
        let start = session.clamp_offset(session.start_offset);
        self.tracker.set_duration(info.duration);
        self.tracker.seek(start, now);
        self.guard.seek(&session.token, start);
        self.guard.set_rate(&session.token, session.rate);

        if std::mem::take(&mut session.route_lost) {
            log::info!(
                "Session {} ready at {:?} with no usable output; paused",
                session_id,
                start
            );
            self.emit(PlaybackState::Paused, Some(session_id));
            return;
        }

        if let Err(e) = self.guard.activate(&mut session.token) {
            log::error!("Session {}: output could not start: {}", session_id, e);
            self.fail_session(ErrorKind::from(&e));
            return;
        }

        log::info!(
            "Session {} playing from {:?} of {:?}",
            session_id,
            start,
            info.duration
        );
        self.tracker.start(now);
        self.emit(PlaybackState::Playing, Some(session_id));
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            self.reject("Pause", "only valid while playing");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.tracker.halt(self.clock.now());
        self.guard.suspend(&mut session.token);
        let id = session.id;
        self.emit(PlaybackState::Paused, Some(id));
    }

    fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            self.reject("Resume", "only valid while paused");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = self.guard.activate(&mut session.token) {
            log::error!("Session {}: could not resume: {}", session.id, e);
            self.fail_session(ErrorKind::from(&e));
            return;
        }
        let id = session.id;
        self.tracker.start(self.clock.now());
        self.emit(PlaybackState::Playing, Some(id));
    }

    fn seek(&mut self, offset: Duration) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.reject("Seek", "only valid while playing or paused");
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let applied = self.tracker.seek(session.clamp_offset(offset), self.clock.now());
        if applied != offset {
            log::debug!("Seek to {:?} clamped to {:?}", offset, applied);
        }
        self.guard.seek(&session.token, applied);
        self.end_reported = false;
        let id = session.id;
        self.emit(self.state, Some(id));
    }

    fn set_rate(&mut self, rate: f32) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.reject("SetRate", "only valid while playing or paused");
            return;
        }
        let Some(rate) = self.config.clamp_rate(rate) else {
            self.reject("SetRate", "rate must be a positive finite number");
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if session.rate == rate {
            log::debug!("Rate already {}; nothing to do", rate);
            return;
        }
        session.rate = rate;
        self.tracker.set_rate(rate, self.clock.now());
        self.guard.set_rate(&session.token, rate);
        let id = session.id;
        self.emit(self.state, Some(id));
    }

    fn stop(&mut self, collapsed: usize) {
        let now = self.clock.now();
        match self.state {
            PlaybackState::Idle | PlaybackState::Stopped if collapsed == 0 => {
                log::debug!("Stop with nothing to abort");
                return;
            }
            _ => {}
        }

        let session_id = match self.session.take() {
            Some(session) => {
                let id = session.id;
                log::info!("Stopping session {} in {}", id, self.state);
                self.guard.release(session.into_token());
                Some(id)
            }
            None => {
                log::debug!("Stop in {} aborted {} queued commands", self.state, collapsed);
                None
            }
        };
        self.load_deadline = None;
        self.tracker.halt(now);
        self.emit(PlaybackState::Stopped, session_id);

        self.tracker.reset();
        self.emit(PlaybackState::Idle, None);
    }

    fn interruption_began(&mut self) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.reject("InterruptionBegan", "no sounding or paused session");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.resume_after_interruption = self.state == PlaybackState::Playing;
        self.tracker.halt(self.clock.now());
        self.guard.suspend(&mut session.token);
        let id = session.id;
        self.emit(PlaybackState::Interrupted, Some(id));
    }

    fn interruption_ended(&mut self, should_resume: bool) {
        if self.state != PlaybackState::Interrupted {
            self.reject("InterruptionEnded", "not interrupted");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let resumable = std::mem::take(&mut session.resume_after_interruption);
        let id = session.id;
        if should_resume && resumable {
            match self.guard.activate(&mut session.token) {
                Ok(()) => {
                    self.tracker.start(self.clock.now());
                    self.emit(PlaybackState::Playing, Some(id));
                    return;
                }
                Err(e) => log::warn!("Session {}: could not resume after interruption: {}", id, e),
            }
        }
        self.emit(PlaybackState::Paused, Some(id));
    }

    fn route_changed(&mut self, change: RouteChange) {
        if !change.is_incompatible() {
            log::debug!("Route change {:?} leaves {} unchanged", change, self.state);
            return;
        }

        match self.state {
            PlaybackState::Playing => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                log::warn!("Output route lost ({:?}); pausing", change.reason);
                self.tracker.halt(self.clock.now());
                self.guard.suspend(&mut session.token);
                let id = session.id;
                self.emit(PlaybackState::Paused, Some(id));
            }
            PlaybackState::Interrupted => {
                if let Some(session) = self.session.as_mut() {
                    log::warn!("Output route lost while interrupted; will not auto-resume");
                    session.resume_after_interruption = false;
                }
            }
            PlaybackState::Loading => {
                if let Some(session) = self.session.as_mut() {
                    log::warn!("Output route lost while loading; will start paused");
                    session.route_lost = true;
                }
            }
            _ => log::debug!("Route change {:?} ignored in {}", change, self.state),
        }
    }

    fn on_tick(&mut self) {
        let now = self.clock.now();
        match self.state {
            PlaybackState::Loading => {
                if matches!(self.load_deadline, Some(deadline) if now >= deadline) {
                    log::error!(
                        "Source did not become ready within {:?}",
                        self.config.load_timeout
                    );
                    self.fail_session(ErrorKind::Timeout);
                }
            }
            PlaybackState::Playing => {
                self.tracker.tick(now);
                if self.tracker.reached_end() && !self.end_reported {
                    self.end_reported = true;
                    log::info!("Reached end of source at {:?}", self.tracker.current_offset());
                }
            }
            _ => {}
        }
    }

    /// Ends the live session with a terminal error.
    fn fail_session(&mut self, kind: ErrorKind) {
        let session_id = self.session.take().map(|session| {
            let id = session.id;
            self.guard.release(session.into_token());
            id
        });
        self.load_deadline = None;
        self.tracker.halt(self.clock.now());
        self.emit(PlaybackState::Error(kind), session_id);
    }

    fn reject(&mut self, command: &str, reason: &str) {
        self.protocol_violations += 1;
        log::warn!(
            "{:?}: {} ignored in {} ({})",
            ErrorKind::ProtocolViolation,
            command,
            self.state,
            reason
        );
    }

    fn emit(&mut self, state: PlaybackState, session: Option<SessionId>) {
        self.state = state;
        let rate = self
            .session
            .as_ref()
            .map(|s| s.rate)
            .unwrap_or_else(|| self.tracker.rate());
        self.notifier.publish(StateEvent::new(
            state,
            self.tracker.current_offset(),
            self.tracker.duration(),
            rate,
            session,
        ));
    }
}
