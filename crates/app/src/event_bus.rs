//! In-process event bus backed by a tokio broadcast channel.

use std::pin::Pin;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use homehub_domain::event::{Event, OutcomeEvent};

/// Boxed stream of events handed to subscribers.
pub type EventStream<T = Event> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Best-effort broadcaster.
///
/// Publishing never blocks and succeeds even when there are no active
/// subscribers. A subscriber that falls more than `capacity` events behind
/// loses the oldest ones; the loss is logged at warn level.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Per-subscriber buffer.
    pub const DEFAULT_CAPACITY: usize = 128;

    /// Create a new event bus with the given per-subscriber buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // Only fails when nobody listens.
        let _ = self.sender.send(event);
    }

    /// Stream of every event published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged, some events were dropped");
                None
            }
        });
        Box::pin(stream)
    }

    /// Stream of command outcomes only.
    #[must_use]
    pub fn subscribe_outcomes(&self) -> EventStream<OutcomeEvent> {
        Box::pin(
            self.subscribe()
                .filter_map(|event| event.as_outcome().cloned()),
        )
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homehub_domain::event::ConnectionState;
    use homehub_domain::id::{DeviceId, RecipeId};

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = Event::trigger_fired(RecipeId::new(), "Porch");
        let id = event.id;
        bus.publish(event);

        assert_eq!(a.next().await.unwrap().id, id);
        assert_eq!(b.next().await.unwrap().id, id);
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(Event::connection(DeviceId::new(), ConnectionState::Connected));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn should_skip_dropped_events_when_subscriber_lags() {
        let bus = EventBus::new(2);
        let mut stream = bus.subscribe();
        let device = DeviceId::new();
        for _ in 0..5 {
            bus.publish(Event::connection(device, ConnectionState::Connected));
        }
        let last = Event::connection(device, ConnectionState::Disconnected);
        let last_id = last.id;
        bus.publish(last);

        // The buffer keeps the two most recent events.
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_ne!(first.id, last_id);
        assert_eq!(second.id, last_id);
    }

    #[tokio::test]
    async fn should_filter_outcome_stream() {
        let bus = EventBus::default();
        let mut outcomes = bus.subscribe_outcomes();
        bus.publish(Event::trigger_fired(RecipeId::new(), "noise"));

        let scene = homehub_domain::scene::Scene::builder().name("S").build().unwrap();
        let command = homehub_domain::command::Command::activate(&scene);
        bus.publish(Event::outcome(OutcomeEvent::new(
            homehub_domain::id::TicketId(1),
            &command,
            homehub_domain::event::Outcome::Ok,
        )));

        let outcome = outcomes.next().await.unwrap();
        assert_eq!(outcome.ticket, homehub_domain::id::TicketId(1));
    }
}
