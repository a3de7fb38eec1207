//! State events and the notifier that delivers them to the host.

use crate::error::ErrorKind;
use crate::playback::{PlaybackState, SessionId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Notification of one accepted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    /// Strictly increasing across the engine's lifetime; replays keep their original value
    pub sequence: u64,
    pub state: PlaybackState,
    pub offset: Duration,
    pub duration: Option<Duration>,
    pub rate: f32,
    /// Session the transition belongs to; `None` once the machine is back to `Idle`
    pub session: Option<SessionId>,
}

impl StateEvent {
    pub(crate) fn new(
        state: PlaybackState,
        offset: Duration,
        duration: Option<Duration>,
        rate: f32,
        session: Option<SessionId>,
    ) -> Self {
        Self {
            sequence: 0,
            state,
            offset,
            duration,
            rate,
            session,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.state.error_kind()
    }

    pub fn is_error(&self) -> bool {
        self.error_kind().is_some()
    }
}

struct NotifierInner {
    subscriber: Option<Sender<StateEvent>>,
    last: Option<StateEvent>,
    next_sequence: u64,
}

/// Publishes state events to one subscriber at a time.
///
/// The most recent event is always kept. A new subscriber receives it first, so a UI that
/// reattaches mid-session sees the real state instead of assuming `Idle`.
#[derive(Clone)]
pub struct EventNotifier {
    inner: Arc<Mutex<NotifierInner>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NotifierInner {
                subscriber: None,
                last: None,
                next_sequence: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamps and delivers `event`, caching it for the next subscriber.
    pub fn publish(&self, mut event: StateEvent) -> u64 {
        let mut inner = self.lock();
        event.sequence = inner.next_sequence;
        inner.next_sequence += 1;

        log::debug!(
            "Event #{}: {} at {:?} (session {:?})",
            event.sequence,
            event.state,
            event.offset,
            event.session
        );

        let delivered = match inner.subscriber.as_ref() {
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => false,
        };
        if !delivered && inner.subscriber.take().is_some() {
            log::debug!("Event subscriber went away; caching until the next one registers");
        }

        let sequence = event.sequence;
        inner.last = Some(event);
        sequence
    }

    /// Registers the subscriber, replacing (and disconnecting) any previous one.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut inner = self.lock();
        if let Some(last) = inner.last.clone() {
            log::debug!("Replaying event #{} to new subscriber", last.sequence);
            let _ = tx.send(last);
        }
        if inner.subscriber.replace(tx).is_some() {
            log::info!("Event subscriber replaced");
        }
        EventSubscription { rx }
    }

    /// Most recent event published, if any.
    pub fn last_event(&self) -> Option<StateEvent> {
        self.lock().last.clone()
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().subscriber.is_some()
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The host's end of the event stream.
///
/// The stream ends (all receive calls return `None`) once a newer subscription replaces this
/// one and the remaining events have been drained.
pub struct EventSubscription {
    rx: Receiver<StateEvent>,
}

impl EventSubscription {
    /// Waits for the next event.
    pub fn recv(&self) -> Option<StateEvent> {
        self.rx.recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StateEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<StateEvent> {
        self.rx.try_recv().ok()
    }

    /// Drains every event delivered so far.
    pub fn poll_events(&self) -> Vec<StateEvent> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(state: PlaybackState) -> StateEvent {
        StateEvent::new(state, Duration::ZERO, None, 1.0, None)
    }

    #[test]
    fn test_events_in_order_with_sequence() {
        let notifier = EventNotifier::new();
        let sub = notifier.subscribe();
        notifier.publish(event(PlaybackState::Loading));
        notifier.publish(event(PlaybackState::Playing));

        let events = sub.poll_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].state, PlaybackState::Loading);
        assert_eq!(events[1].state, PlaybackState::Playing);
        assert!(events[0].sequence < events[1].sequence);
    }

    #[test]
    fn test_cached_event_replayed_to_late_subscriber() {
        let notifier = EventNotifier::new();
        notifier.publish(event(PlaybackState::Loading));
        notifier.publish(event(PlaybackState::Playing));

        let sub = notifier.subscribe();
        let events = sub.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, PlaybackState::Playing);
    }

    #[test]
    fn test_new_subscriber_replaces_old() {
        let notifier = EventNotifier::new();
        let first = notifier.subscribe();
        notifier.publish(event(PlaybackState::Loading));

        let second = notifier.subscribe();
        notifier.publish(event(PlaybackState::Playing));

        let first_events = first.poll_events();
        assert_eq!(first_events.len(), 1);
        assert!(first.try_recv().is_none());

        let second_events: Vec<_> = second.poll_events().into_iter().map(|e| e.state).collect();
        assert_eq!(
            second_events,
            vec![PlaybackState::Loading, PlaybackState::Playing]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_forgotten() {
        let notifier = EventNotifier::new();
        let sub = notifier.subscribe();
        drop(sub);

        notifier.publish(event(PlaybackState::Paused));
        assert!(!notifier.has_subscriber());
        assert_eq!(
            notifier.last_event().map(|e| e.state),
            Some(PlaybackState::Paused)
        );
    }

    #[test]
    fn test_error_event() {
        let e = event(PlaybackState::Error(ErrorKind::Timeout));
        assert!(e.is_error());
        assert_eq!(e.error_kind(), Some(ErrorKind::Timeout));
    }
}
