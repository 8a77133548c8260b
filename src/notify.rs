use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A realtime notification as delivered to subscribers: the topic it was
/// published under plus the event serialized as JSON. This is the seam the
/// external messaging/notification collaborator consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: Ulid,
    pub payload: String,
}

/// Broadcast hub for LISTEN/NOTIFY. Topics are slot ids and caregiver ids;
/// every slot event is published under both, so a UI can follow one slot
/// through checkout or a whole caregiver's calendar.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event under a single topic. No-op if nobody is listening.
    pub fn send(&self, topic: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&topic) {
            let payload = match serde_json::to_string(event) {
                Ok(p) => p,
                Err(_) => return,
            };
            let _ = sender.send(Notification { topic, payload });
        }
    }

    /// Publish a slot event under both the slot topic and its caregiver topic.
    pub fn send_slot(&self, slot_id: Ulid, caregiver_id: Ulid, event: &Event) {
        self.send(slot_id, event);
        self.send(caregiver_id, event);
    }

    /// Remove a topic's channel (e.g. when a slot is deleted).
    pub fn remove(&self, topic: &Ulid) {
        self.channels.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let slot_id = Ulid::new();
        let mut rx = hub.subscribe(slot_id);

        let event = Event::SlotDeleted { id: slot_id };
        hub.send(slot_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, slot_id);
        assert!(received.payload.contains("SlotDeleted"));
    }

    #[tokio::test]
    async fn slot_events_reach_caregiver_subscribers() {
        let hub = NotifyHub::new();
        let slot_id = Ulid::new();
        let caregiver_id = Ulid::new();
        let mut slot_rx = hub.subscribe(slot_id);
        let mut caregiver_rx = hub.subscribe(caregiver_id);

        let event = Event::HoldCancelled {
            id: Ulid::new(),
            slot_id,
        };
        hub.send_slot(slot_id, caregiver_id, &event);

        assert_eq!(slot_rx.recv().await.unwrap().topic, slot_id);
        assert_eq!(caregiver_rx.recv().await.unwrap().topic, caregiver_id);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        // No subscriber — should not panic
        hub.send_slot(
            id,
            Ulid::new(),
            &Event::SlotCreated {
                id,
                caregiver_id: Ulid::new(),
                span: Span::new(0, 1000),
                total_capacity: 1,
                base_rate: 2500,
                recurrence: None,
                notes: None,
            },
        );
    }
}
