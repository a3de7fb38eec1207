use anyhow::{Context, Result, bail};
use narrator::{
    EventSubscription, LoadError, NarratorConfig, NarratorEngine, PlaybackState, SimulatedOutput,
    SourceHandle, SourceInfo, StateEvent, SymphoniaProbe,
};
use std::path::Path;
use std::time::Duration;

const EVENT_WAIT: Duration = Duration::from_secs(5);

pub fn run_scenarios() -> Result<()> {
    log::info!("=== Play, seek, pause, resume ===");
    scenario_play_seek_pause_resume()?;

    log::info!("=== Phone call interruption ===");
    scenario_interruption()?;

    log::info!("=== Focus denied ===");
    scenario_focus_denied()?;

    log::info!("=== Stop while loading ===");
    scenario_stop_while_loading()?;

    log::info!("All scenarios completed");
    Ok(())
}

/// Probes `path` and narrates it for a few seconds against the simulated output.
pub fn play_file(path: &str) -> Result<()> {
    let info = narrator::source::probe_file(Path::new(path))
        .with_context(|| format!("Failed to probe {}", path))?;
    log::info!("{} reports duration {:?}", path, info.duration);

    let (output, _control) = SimulatedOutput::new();
    let engine = NarratorEngine::new(NarratorConfig::default(), output, SymphoniaProbe)?;
    let events = engine.subscribe();

    engine.play(path, Duration::ZERO);
    wait_for(&events, PlaybackState::Playing)?;
    std::thread::sleep(Duration::from_secs(2));

    let halfway = info
        .duration
        .map(|d| d / 2)
        .unwrap_or(Duration::from_secs(30));
    log::info!("Seeking to {:?}", halfway);
    engine.seek(halfway);
    engine.pause();
    wait_for(&events, PlaybackState::Paused)?;
    std::thread::sleep(Duration::from_secs(1));

    engine.resume();
    wait_for(&events, PlaybackState::Playing)?;
    std::thread::sleep(Duration::from_secs(2));

    log::info!("Position before stop: {:?}", engine.current_offset());
    engine.stop();
    wait_for(&events, PlaybackState::Idle)?;
    engine.shutdown()?;
    Ok(())
}

fn narration_loader(_: &SourceHandle) -> Result<SourceInfo, LoadError> {
    std::thread::sleep(Duration::from_millis(100));
    Ok(SourceInfo::with_duration(Duration::from_secs(300)))
}

fn scenario_play_seek_pause_resume() -> Result<()> {
    let (output, _control) = SimulatedOutput::new();
    let engine = NarratorEngine::new(NarratorConfig::default(), output, narration_loader)?;
    let events = engine.subscribe();

    engine.play("chapter-1", Duration::ZERO);
    wait_for(&events, PlaybackState::Playing)?;

    engine.seek(Duration::from_secs(150));
    engine.pause();
    wait_for(&events, PlaybackState::Paused)?;

    engine.resume();
    wait_for(&events, PlaybackState::Playing)?;
    engine.shutdown()?;
    Ok(())
}

fn scenario_interruption() -> Result<()> {
    let (output, control) = SimulatedOutput::new();
    let engine = NarratorEngine::new(NarratorConfig::default(), output, narration_loader)?;
    let events = engine.subscribe();

    engine.play("chapter-1", Duration::ZERO);
    wait_for(&events, PlaybackState::Playing)?;
    std::thread::sleep(Duration::from_secs(1));

    control.begin_interruption();
    let interrupted = wait_for(&events, PlaybackState::Interrupted)?;
    std::thread::sleep(Duration::from_millis(500));

    control.end_interruption(true);
    let resumed = wait_for(&events, PlaybackState::Playing)?;
    log::info!(
        "Interrupted at {:?}, resumed at {:?}",
        interrupted.offset,
        resumed.offset
    );
    engine.shutdown()?;
    Ok(())
}

fn scenario_focus_denied() -> Result<()> {
    let (output, control) = SimulatedOutput::new();
    control.deny_focus();
    let engine = NarratorEngine::new(NarratorConfig::default(), output, narration_loader)?;
    let events = engine.subscribe();

    engine.play("chapter-1", Duration::ZERO);
    let event = next_event(&events)?;
    log::info!("Play without focus ended in {}", event.state);

    // Rejected: nothing to pause
    engine.pause();
    if let Some(event) = events.recv_timeout(Duration::from_millis(300)) {
        bail!("Unexpected event after rejected pause: {}", event.state);
    }
    engine.shutdown()?;
    Ok(())
}

fn scenario_stop_while_loading() -> Result<()> {
    let slow_loader = |_: &SourceHandle| -> Result<SourceInfo, LoadError> {
        std::thread::sleep(Duration::from_secs(1));
        Ok(SourceInfo::with_duration(Duration::from_secs(300)))
    };
    let (output, _control) = SimulatedOutput::new();
    let engine = NarratorEngine::new(NarratorConfig::default(), output, slow_loader)?;
    let events = engine.subscribe();

    engine.play("chapter-1", Duration::ZERO);
    engine.stop();
    wait_for(&events, PlaybackState::Idle)?;

    // Give the loader time to finish; its outcome must be ignored
    if let Some(event) = events.recv_timeout(Duration::from_millis(1500)) {
        bail!("Stale load revived the session: {}", event.state);
    }
    engine.shutdown()?;
    Ok(())
}

fn next_event(events: &EventSubscription) -> Result<StateEvent> {
    let event = events
        .recv_timeout(EVENT_WAIT)
        .context("No event before timeout")?;
    log::info!(
        "#{} {} at {:?} / {:?} (rate {})",
        event.sequence,
        event.state,
        event.offset,
        event.duration,
        event.rate
    );
    Ok(event)
}

fn wait_for(events: &EventSubscription, state: PlaybackState) -> Result<StateEvent> {
    loop {
        let event = next_event(events)?;
        if event.state == state {
            return Ok(event);
        }
        if event.is_error() {
            bail!("Waiting for {} but got {}", state, event.state);
        }
    }
}
