//! Narration engine: the host-facing handle around the control thread.
//!
//! All public commands are fire-and-forget. They are appended to the command queue and the
//! serial control thread applies them in order, together with the progress ticks and load
//! outcomes that travel the same queue. Results come back only as [`StateEvent`]s.

use crate::clock::{Clock, SystemClock};
use crate::config::NarratorConfig;
use crate::error::{NarratorError, Result};
use crate::events::{EventNotifier, EventSubscription, StateEvent};
use crate::guard::SessionGuard;
use crate::machine::PlaybackStateMachine;
use crate::platform::{AudioOutput, PlatformNotifier};
use crate::playback::Command;
use crate::position::PositionHandle;
use crate::queue::{CommandReceiver, CommandSender, QueueItem, command_queue};
use crate::source::{SourceHandle, SourceLoader};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct NarratorEngine {
    queue: CommandSender,
    notifier: EventNotifier,
    position: PositionHandle,
    platform_notifier: PlatformNotifier,
    shutdown_tx: Sender<()>,
    control_thread: Option<JoinHandle<()>>,
}

impl NarratorEngine {
    /// Create an engine and start its control thread
    pub fn new<O, L>(config: NarratorConfig, output: O, loader: L) -> Result<Self>
    where
        O: AudioOutput + 'static,
        L: SourceLoader + 'static,
    {
        Self::with_clock(config, output, loader, Arc::new(SystemClock))
    }

    /// Like [`Self::new`], reading time from `clock` instead of the system clock
    pub fn with_clock<O, L>(
        config: NarratorConfig,
        output: O,
        loader: L,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        O: AudioOutput + 'static,
        L: SourceLoader + 'static,
    {
        config.validate()?;

        let (queue, receiver) = command_queue(config.backlog_warning);
        let notifier = EventNotifier::new();
        let platform_notifier = PlatformNotifier::new(queue.clone());

        let mut guard = SessionGuard::new(Box::new(output), config.focus_policy);
        guard.subscribe(platform_notifier.clone());

        let tick_interval = config.tick_interval;
        let thread_name = config.thread_name.clone();
        let machine = PlaybackStateMachine::new(
            config,
            guard,
            Arc::new(loader),
            queue.clone(),
            notifier.clone(),
            clock,
        );
        let position = machine.position();

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let ticks = queue.clone();
        let control_thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                run_control_loop(machine, receiver, ticks, shutdown_rx, tick_interval)
            })?;

        log::info!("Narrator engine started (tick {:?})", tick_interval);

        Ok(Self {
            queue,
            notifier,
            position,
            platform_notifier,
            shutdown_tx,
            control_thread: Some(control_thread),
        })
    }

    /// Start narrating `source` from `start`
    pub fn play(&self, source: impl Into<SourceHandle>, start: Duration) {
        self.submit(Command::Play {
            source: source.into(),
            start,
        });
    }

    pub fn pause(&self) {
        self.submit(Command::Pause);
    }

    pub fn resume(&self) {
        self.submit(Command::Resume);
    }

    pub fn seek(&self, offset: Duration) {
        self.submit(Command::Seek(offset));
    }

    /// Abort the live session. Everything still queued behind earlier commands is discarded.
    pub fn stop(&self) {
        self.submit(Command::Stop);
    }

    pub fn set_rate(&self, rate: f32) {
        self.submit(Command::SetRate(rate));
    }

    /// Append any command, including platform notifications.
    pub fn submit(&self, command: Command) {
        log::trace!("Submitting {:?}", command);
        self.queue.enqueue(command);
    }

    /// Register the event subscriber. The most recent event, if any, is delivered first.
    pub fn subscribe(&self) -> EventSubscription {
        self.notifier.subscribe()
    }

    pub fn last_event(&self) -> Option<StateEvent> {
        self.notifier.last_event()
    }

    pub fn current_offset(&self) -> Duration {
        self.position.current_offset()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.position.duration()
    }

    /// Lock-free position reader for the persistence boundary
    pub fn position(&self) -> PositionHandle {
        self.position.clone()
    }

    /// Entry point for platform interruption and route notifications
    pub fn platform_notifier(&self) -> PlatformNotifier {
        self.platform_notifier.clone()
    }

    /// Extra producer handle for hosts that issue commands from other threads
    pub fn command_sender(&self) -> CommandSender {
        self.queue.clone()
    }

    /// Stop the control thread, releasing the output if a session is live
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let Some(handle) = self.control_thread.take() else {
            return Ok(());
        };

        let _ = self.shutdown_tx.try_send(());
        handle
            .join()
            .map_err(|_| NarratorError::Engine("Control thread panicked".into()))?;
        log::info!("Narrator engine stopped");
        Ok(())
    }
}

impl Drop for NarratorEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            log::error!("Error shutting down narrator engine: {}", e);
        }
    }
}

/// Ticks are appended to the queue rather than applied directly, so anything queued before a
/// tick (a finished load racing its deadline, say) is applied first.
fn run_control_loop(
    mut machine: PlaybackStateMachine,
    mut receiver: CommandReceiver,
    ticks: CommandSender,
    shutdown_rx: Receiver<()>,
    tick_interval: Duration,
) {
    log::debug!("Control thread running");
    let commands = receiver.channel().clone();
    let tick = crossbeam_channel::tick(tick_interval);

    loop {
        crossbeam_channel::select! {
            recv(commands) -> msg => {
                let Ok(envelope) = msg else { break };
                if let Some(delivery) = receiver.accept(envelope) {
                    machine.apply(delivery);
                }
            }
            recv(tick) -> _ => ticks.push(QueueItem::Tick),
            recv(shutdown_rx) -> _ => break,
        }
    }

    machine.shutdown();
    log::debug!(
        "Control thread exiting in {} ({} protocol violations)",
        machine.state(),
        machine.protocol_violations()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorKind, LoadError};
    use crate::platform::{OutputMode, SimulatedOutput, SimulatedOutputControl};
    use crate::playback::PlaybackState;
    use crate::source::SourceInfo;

    const WAIT: Duration = Duration::from_secs(5);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    type LoadResult = std::result::Result<SourceInfo, LoadError>;

    fn instant_loader(duration: Duration) -> impl SourceLoader {
        move |_: &SourceHandle| -> LoadResult { Ok(SourceInfo::with_duration(duration)) }
    }

    fn engine() -> (NarratorEngine, SimulatedOutputControl) {
        init_logger();
        let (output, control) = SimulatedOutput::new();
        let engine = NarratorEngine::new(
            NarratorConfig::default().tick_interval(Duration::from_millis(10)),
            output,
            instant_loader(secs(300)),
        )
        .unwrap();
        (engine, control)
    }

    /// Collects events until one in `state` arrives.
    fn wait_for(events: &EventSubscription, state: PlaybackState) -> Vec<StateEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv_timeout(WAIT) {
            let done = event.state == state;
            seen.push(event);
            if done {
                return seen;
            }
        }
        panic!("never reached {}; saw {:?}", state, seen);
    }

    fn states(events: &[StateEvent]) -> Vec<PlaybackState> {
        events.iter().map(|e| e.state).collect()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (output, _control) = SimulatedOutput::new();
        let result = NarratorEngine::new(
            NarratorConfig::default().tick_interval(Duration::ZERO),
            output,
            instant_loader(secs(1)),
        );
        assert!(matches!(result, Err(NarratorError::Configuration(_))));
    }

    #[test]
    fn test_play_pause_resume() {
        let (engine, control) = engine();
        let events = engine.subscribe();

        engine.play("chapter-1", Duration::ZERO);
        let seen = wait_for(&events, PlaybackState::Playing);
        assert_eq!(
            states(&seen),
            vec![PlaybackState::Loading, PlaybackState::Playing]
        );
        assert_eq!(engine.duration(), Some(secs(300)));

        engine.seek(secs(150));
        engine.pause();
        let seen = wait_for(&events, PlaybackState::Paused);
        assert!(seen.last().unwrap().offset >= secs(150));
        assert_eq!(control.mode(), OutputMode::Suspended);

        engine.resume();
        wait_for(&events, PlaybackState::Playing);
        assert_eq!(control.mode(), OutputMode::Active);

        engine.shutdown().unwrap();
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_focus_denied_reports_error() {
        let (engine, control) = engine();
        control.deny_focus();
        let events = engine.subscribe();

        engine.play("chapter-1", Duration::ZERO);
        let seen = wait_for(
            &events,
            PlaybackState::Error(ErrorKind::ResourceUnavailable),
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_stop_right_after_play_never_plays() {
        init_logger();
        let (output, control) = SimulatedOutput::new();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let loader = move |_: &SourceHandle| -> LoadResult {
            let _ = gate_rx.recv();
            Ok(SourceInfo::with_duration(secs(300)))
        };
        let engine = NarratorEngine::new(NarratorConfig::default(), output, loader).unwrap();
        let events = engine.subscribe();

        engine.play("chapter-1", Duration::ZERO);
        engine.stop();
        let seen = wait_for(&events, PlaybackState::Idle);
        let seen = states(&seen);
        assert!(!seen.contains(&PlaybackState::Playing));
        assert_eq!(
            &seen[seen.len() - 2..],
            &[PlaybackState::Stopped, PlaybackState::Idle]
        );

        // The load finishing afterwards is ignored
        drop(gate_tx);
        assert!(events.recv_timeout(Duration::from_millis(200)).is_none());
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_repeated_stop_is_idempotent() {
        let (engine, _control) = engine();
        let events = engine.subscribe();
        engine.play("chapter-1", Duration::ZERO);
        wait_for(&events, PlaybackState::Playing);

        engine.stop();
        engine.stop();
        engine.stop();
        let seen = wait_for(&events, PlaybackState::Idle);
        assert_eq!(
            states(&seen),
            vec![PlaybackState::Stopped, PlaybackState::Idle]
        );
        assert!(events.recv_timeout(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_interruption_applied_before_later_commands() {
        let (engine, control) = engine();
        let events = engine.subscribe();
        engine.play("chapter-1", Duration::ZERO);
        wait_for(&events, PlaybackState::Playing);

        engine.seek(secs(10));
        control.begin_interruption();
        engine.seek(secs(20));
        let seen = wait_for(&events, PlaybackState::Interrupted);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].state, PlaybackState::Playing);

        // The seek behind the interruption is rejected, not applied
        assert!(events.recv_timeout(Duration::from_millis(200)).is_none());
        assert!(engine.current_offset() < secs(20));

        control.end_interruption(true);
        wait_for(&events, PlaybackState::Playing);
        assert_eq!(control.mode(), OutputMode::Active);
    }

    #[test]
    fn test_position_is_monotonic_while_playing() {
        init_logger();
        let (output, _control) = SimulatedOutput::new();
        let clock = ManualClock::new();
        let engine = NarratorEngine::with_clock(
            NarratorConfig::default().tick_interval(Duration::from_millis(5)),
            output,
            instant_loader(secs(20)),
            Arc::new(clock.clone()),
        )
        .unwrap();
        let events = engine.subscribe();
        engine.play("chapter-1", Duration::ZERO);
        wait_for(&events, PlaybackState::Playing);

        let position = engine.position();
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            clock.advance(secs(1));
            std::thread::sleep(Duration::from_millis(15));
            let offset = position.current_offset();
            assert!(offset >= last);
            assert!(offset <= secs(20));
            last = offset;
        }
        assert!(last > Duration::ZERO);
    }

    #[test]
    fn test_load_failure_surfaces_as_error() {
        init_logger();
        let (output, control) = SimulatedOutput::new();
        let loader = |_: &SourceHandle| -> LoadResult {
            Err(LoadError::Unsupported("not audio".into()))
        };
        let engine = NarratorEngine::new(NarratorConfig::default(), output, loader).unwrap();
        let events = engine.subscribe();

        engine.play("notes.txt", Duration::ZERO);
        let seen = wait_for(&events, PlaybackState::Error(ErrorKind::SourceLoadFailure));
        assert_eq!(seen[0].state, PlaybackState::Loading);
        assert_eq!(control.mode(), OutputMode::Released);
    }

    #[test]
    fn test_late_subscriber_gets_current_state() {
        let (engine, _control) = engine();
        let first = engine.subscribe();
        engine.play("chapter-1", Duration::ZERO);
        wait_for(&first, PlaybackState::Playing);

        let second = engine.subscribe();
        let replayed = second.recv_timeout(WAIT).unwrap();
        assert_eq!(replayed.state, PlaybackState::Playing);
        assert_eq!(engine.last_event().map(|e| e.sequence), Some(replayed.sequence));
    }

    #[test]
    fn test_commands_from_many_threads() {
        let (engine, _control) = engine();
        let events = engine.subscribe();
        engine.play("chapter-1", Duration::ZERO);
        wait_for(&events, PlaybackState::Playing);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sender = engine.command_sender();
                std::thread::spawn(move || {
                    for step in 0..25u64 {
                        sender.enqueue(Command::Seek(Duration::from_millis(i * 1000 + step)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        engine.pause();
        wait_for(&events, PlaybackState::Paused);
        engine.shutdown().unwrap();
    }
}
