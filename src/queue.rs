//! Command queue: many producers, one consumer, totally ordered.
//!
//! Every entry is stamped with the queue's stop epoch at the moment it is enqueued. Enqueueing
//! a `Stop` bumps the epoch, so the consumer can drop everything stamped before it without
//! producers ever touching entries already in flight. Stamping and sending happen under one
//! short lock, which keeps stamp order and channel order identical.

use crate::error::LoadError;
use crate::playback::{Command, SessionId};
use crate::source::SourceInfo;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Entries carried by the queue.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Command(Command),
    /// Outcome of a source load started for `session`
    SourceLoaded {
        session: SessionId,
        result: Result<SourceInfo, LoadError>,
    },
    /// Progress tick from the timer
    Tick,
}

impl QueueItem {
    fn is_collapsible_work(&self) -> bool {
        matches!(self, Self::Command(cmd) if *cmd != Command::Stop)
    }
}

#[derive(Debug)]
pub(crate) struct Envelope {
    epoch: u64,
    item: QueueItem,
}

/// An item handed to the consumer.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub item: QueueItem,
    /// Commands other than `Stop` discarded by the collapse this `Stop` caused; zero otherwise
    pub collapsed: usize,
}

struct Shared {
    epoch: AtomicU64,
    order: Mutex<()>,
    backlog_warning: usize,
}

/// Producer side. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Envelope>,
    shared: Arc<Shared>,
}

/// Consumer side, owned by the control thread.
pub(crate) struct CommandReceiver {
    rx: Receiver<Envelope>,
    shared: Arc<Shared>,
    collapsed: usize,
}

/// Creates a connected queue.
pub(crate) fn command_queue(backlog_warning: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared {
        epoch: AtomicU64::new(0),
        order: Mutex::new(()),
        backlog_warning,
    });
    (
        CommandSender {
            tx,
            shared: shared.clone(),
        },
        CommandReceiver {
            rx,
            shared,
            collapsed: 0,
        },
    )
}

impl CommandSender {
    /// Appends a command. Never blocks and never fails; a command sent after the engine has
    /// shut down is dropped with a warning.
    pub fn enqueue(&self, command: Command) {
        self.push(QueueItem::Command(command));
    }

    pub(crate) fn push(&self, item: QueueItem) {
        let _order = self
            .shared
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let epoch = if matches!(item, QueueItem::Command(Command::Stop)) {
            self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.shared.epoch.load(Ordering::Acquire)
        };

        let backlog = self.tx.len();
        if backlog >= self.shared.backlog_warning {
            log::warn!("Command queue backlog at {} entries", backlog);
        }

        if let Err(e) = self.tx.send(Envelope { epoch, item }) {
            log::warn!("Command queue closed, dropping {:?}", e.into_inner().item);
        }
    }

    /// Number of entries waiting, including ones a pending `Stop` will discard.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl CommandReceiver {
    /// The raw channel, for use in `select!`. Pass what it yields to [`Self::accept`].
    pub(crate) fn channel(&self) -> &Receiver<Envelope> {
        &self.rx
    }

    /// Filters an entry taken from [`Self::channel`]: entries stamped before the latest
    /// `Stop` are discarded.
    pub(crate) fn accept(&mut self, envelope: Envelope) -> Option<Delivery> {
        let current = self.shared.epoch.load(Ordering::Acquire);
        if envelope.epoch < current {
            if envelope.item.is_collapsible_work() {
                self.collapsed += 1;
            }
            log::debug!(
                "Discarding {:?} collapsed by a pending Stop (epoch {} < {})",
                envelope.item,
                envelope.epoch,
                current
            );
            return None;
        }

        let collapsed = if matches!(envelope.item, QueueItem::Command(Command::Stop)) {
            std::mem::take(&mut self.collapsed)
        } else {
            0
        };

        Some(Delivery {
            item: envelope.item,
            collapsed,
        })
    }

    /// Next live entry without waiting. `None` when nothing live is queued.
    pub(crate) fn try_next(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if let Some(delivery) = self.accept(envelope) {
                        return Some(delivery);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Next live entry, waiting up to `timeout`.
    pub(crate) fn next_timeout(&mut self, timeout: Duration) -> Option<Delivery> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let envelope = self.rx.recv_deadline(deadline).ok()?;
            if let Some(delivery) = self.accept(envelope) {
                return Some(delivery);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceHandle;

    fn drain(rx: &mut CommandReceiver) -> Vec<(Command, usize)> {
        let mut out = Vec::new();
        while let Some(delivery) = rx.try_next() {
            if let QueueItem::Command(cmd) = delivery.item {
                out.push((cmd, delivery.collapsed));
            }
        }
        out
    }

    fn play() -> Command {
        Command::Play {
            source: SourceHandle::new("chapter-1"),
            start: Duration::ZERO,
        }
    }

    #[test]
    fn test_fifo_order() {
        let (tx, mut rx) = command_queue(1024);
        tx.enqueue(play());
        tx.enqueue(Command::Seek(Duration::from_secs(5)));
        tx.enqueue(Command::Pause);

        let names: Vec<_> = drain(&mut rx).iter().map(|(c, _)| c.name()).collect();
        assert_eq!(names, vec!["Play", "Seek", "Pause"]);
    }

    #[test]
    fn test_stop_collapses_pending_commands() {
        let (tx, mut rx) = command_queue(1024);
        tx.enqueue(play());
        tx.enqueue(Command::Seek(Duration::from_secs(5)));
        tx.enqueue(Command::InterruptionBegan);
        tx.enqueue(Command::Stop);
        tx.enqueue(Command::Resume);

        let delivered = drain(&mut rx);
        assert_eq!(delivered, vec![(Command::Stop, 3), (Command::Resume, 0)]);
    }

    #[test]
    fn test_repeated_stops_deliver_once() {
        let (tx, mut rx) = command_queue(1024);
        tx.enqueue(Command::Stop);
        tx.enqueue(Command::Stop);
        tx.enqueue(Command::Stop);

        // Earlier stops are superseded and do not count as collapsed work
        assert_eq!(drain(&mut rx), vec![(Command::Stop, 0)]);
    }

    #[test]
    fn test_stop_after_consumer_caught_up() {
        let (tx, mut rx) = command_queue(1024);
        tx.enqueue(Command::Pause);
        assert_eq!(drain(&mut rx), vec![(Command::Pause, 0)]);

        tx.enqueue(Command::Stop);
        assert_eq!(drain(&mut rx), vec![(Command::Stop, 0)]);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let (tx, mut rx) = command_queue(1 << 16);
        let handles: Vec<_> = (0..4u64)
            .map(|producer| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        tx.enqueue(Command::Seek(Duration::from_millis(producer * 1000 + i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = [None::<u64>; 4];
        let delivered = drain(&mut rx);
        assert_eq!(delivered.len(), 400);
        for (cmd, _) in delivered {
            let offset = match cmd {
                Command::Seek(offset) => offset,
                other => panic!("unexpected command {:?}", other),
            };
            let millis = offset.as_millis() as u64;
            let producer = (millis / 1000) as usize;
            let seq = millis % 1000;
            if let Some(prev) = last[producer] {
                assert!(seq > prev);
            }
            last[producer] = Some(seq);
        }
    }

    #[test]
    fn test_next_timeout_skips_collapsed() {
        let (tx, mut rx) = command_queue(1024);
        tx.enqueue(Command::Pause);
        tx.enqueue(Command::Stop);

        let delivery = rx.next_timeout(Duration::from_millis(50)).unwrap();
        assert!(matches!(delivery.item, QueueItem::Command(Command::Stop)));
        assert_eq!(delivery.collapsed, 1);
        assert!(rx.next_timeout(Duration::from_millis(10)).is_none());
    }
}
