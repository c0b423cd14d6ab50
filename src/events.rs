//! In-process pub/sub for realtime updates, on a tokio broadcast channel.

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Contact, Message, Order, Payment, Quotation};

pub const DEFAULT_CAPACITY: usize = 1024;

/// What happened. Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "message.received")]
    MessageReceived { message: Message, contact: Contact },
    #[serde(rename = "message.sent")]
    MessageSent { message: Message },
    #[serde(rename = "message.status")]
    MessageStatus {
        message_id: Uuid,
        contact_id: Uuid,
        wa_message_id: Option<String>,
        status: String,
    },
    #[serde(rename = "order.updated")]
    OrderUpdated { order: Order },
    #[serde(rename = "quotation.updated")]
    QuotationUpdated { quotation: Quotation },
    #[serde(rename = "payment.received")]
    PaymentReceived {
        payment: Payment,
        balance_due: BigDecimal,
    },
    #[serde(rename = "broadcast.progress")]
    BroadcastProgress {
        broadcast_id: Uuid,
        status: String,
        total: i32,
        sent: i32,
        failed: i32,
    },
    #[serde(rename = "contact.updated")]
    ContactUpdated { contact: Contact },
}

/// An event for one business. Only that business's sockets see it.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl RealtimeEvent {
    pub fn new(user_id: Uuid, payload: EventPayload) -> Self {
        Self {
            user_id,
            payload,
            at: chrono::Utc::now(),
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<RealtimeEvent>,
    events_published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
        }
    }

    /// Never fails: with no subscribers the event is dropped.
    /// Returns how many subscribers received it.
    pub fn publish(&self, user_id: Uuid, payload: EventPayload) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(RealtimeEvent::new(user_id, payload))
            .unwrap_or(0)
    }

    /// Subscribe to the events of a single business.
    pub fn subscribe(&self, user_id: Uuid) -> UserSubscription {
        UserSubscription {
            user_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct UserSubscription {
    user_id: Uuid,
    receiver: broadcast::Receiver<RealtimeEvent>,
}

impl UserSubscription {
    /// Next event for this user. Lagging skips ahead; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.user_id == self.user_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        user_id = %self.user_id,
                        "Realtime subscriber lagged, skipped events"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(sent: i32) -> EventPayload {
        EventPayload::BroadcastProgress {
            broadcast_id: Uuid::nil(),
            status: "sending".to_string(),
            total: 10,
            sent,
            failed: 0,
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_their_own_events() {
        let bus = EventBus::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut sub = bus.subscribe(alice);

        bus.publish(bob, progress(1));
        bus.publish(alice, progress(2));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.user_id, alice);
        match event.payload {
            EventPayload::BroadcastProgress { sent, .. } => assert_eq!(sent, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Uuid::new_v4(), progress(0)), 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let user = Uuid::new_v4();
        let mut sub = bus.subscribe(user);
        for i in 0..5 {
            bus.publish(user, progress(i));
        }
        match sub.recv().await.unwrap().payload {
            EventPayload::BroadcastProgress { sent, .. } => assert_eq!(sent, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = RealtimeEvent::new(Uuid::nil(), progress(4));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "broadcast.progress");
        assert_eq!(json["data"]["sent"], 4);
        assert!(json.get("user_id").is_none());
    }
}
