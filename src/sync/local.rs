use std::sync::Arc;

use log::trace;
use tokio::sync::broadcast;

use super::{next_origin, BroadcastError, Broadcaster, Frame, SyncEvent, Subscription, BUS_CAPACITY};

/// In-process fan-out for windows that share one process.
#[derive(Clone)]
pub struct LocalBus {
    channel: Arc<str>,
    tx: broadcast::Sender<Frame>,
}

impl LocalBus {
    pub fn new(channel: &str) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            channel: channel.into(),
            tx,
        }
    }

    /// A new endpoint with its own identity on this bus.
    pub fn join(&self) -> LocalEndpoint {
        LocalEndpoint {
            bus: self.clone(),
            origin: next_origin(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn send_frame(&self, frame: Frame) {
        // The only possible error is not having subscribers
        let _ = self.tx.send(frame);
    }
}

pub struct LocalEndpoint {
    bus: LocalBus,
    origin: u64,
}

impl LocalEndpoint {
    #[cfg(test)]
    pub(crate) fn publish_raw(&self, payload: &str) {
        self.bus.send_frame(Frame {
            origin: self.origin,
            payload: payload.into(),
        });
    }
}

impl Broadcaster for LocalEndpoint {
    fn channel(&self) -> &str {
        &self.bus.channel
    }

    fn publish(&self, event: &SyncEvent) -> Result<(), BroadcastError> {
        let payload = event.encode()?;
        trace!("publishing {} on {}", event.kind(), self.bus.channel);
        self.bus.send_frame(Frame {
            origin: self.origin,
            payload: payload.into(),
        });
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(&self.bus.channel, self.origin, self.bus.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, NoteDraft};

    fn created() -> SyncEvent {
        SyncEvent::NoteCreated {
            note: Note::new(NoteDraft::default()),
        }
    }

    #[tokio::test]
    async fn test_other_endpoints_receive() {
        let bus = LocalBus::new("test");
        let a = bus.join();
        let b = bus.join();
        let c = bus.join();
        let mut sub_b = b.subscribe();
        let mut sub_c = c.subscribe();

        let event = created();
        a.publish(&event).unwrap();

        assert_eq!(sub_b.recv().await, Some(event.clone()));
        assert_eq!(sub_c.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_no_self_echo() {
        let bus = LocalBus::new("test");
        let a = bus.join();
        let mut own = a.subscribe();

        a.publish(&created()).unwrap();
        assert_eq!(own.try_recv(), None);
    }

    #[tokio::test]
    async fn test_fifo_from_one_publisher() {
        let bus = LocalBus::new("test");
        let a = bus.join();
        let mut sub = bus.join().subscribe();

        let events: Vec<_> = (0..5)
            .map(|i| SyncEvent::NoteDeleted {
                note_id: format!("n{}", i),
            })
            .collect();
        for event in &events {
            a.publish(event).unwrap();
        }
        for event in events {
            assert_eq!(sub.recv().await, Some(event));
        }
    }

    #[tokio::test]
    async fn test_publish_without_listeners_is_fine() {
        let bus = LocalBus::new("test");
        bus.join().publish(&created()).unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = LocalBus::new("test");
        let a = bus.join();
        a.publish(&created()).unwrap();

        let mut late = bus.join().subscribe();
        assert_eq!(late.try_recv(), None);
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let bus = LocalBus::new("test");
        let a = bus.join();
        let mut sub = bus.join().subscribe();

        a.publish_raw("{ definitely not an event");
        let event = SyncEvent::NotesRefreshed {};
        a.publish(&event).unwrap();

        assert_eq!(sub.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = LocalBus::new("test");
        let sub = bus.join().subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
