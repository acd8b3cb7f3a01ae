//! Engine event broadcaster
//!
//! Fan-out of [`EngineEvent`]s to any number of subscribers (SSE clients,
//! embedding applications, tests). Sending never blocks; a subscriber that
//! falls more than the channel capacity behind skips the oldest events.

use segue_common::events::EngineEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast_event(&self, event: EngineEvent) {
        trace!(event = event.event_type(), "Broadcasting engine event");
        // Ignore send errors (no receivers is OK)
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_broadcast_without_subscribers() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.broadcast_event(EngineEvent::BufferingStarted { timestamp: Utc::now() });
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_events() {
        let broadcaster = EventBroadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.broadcast_event(EngineEvent::FadeoutFinished { timestamp: Utc::now() });

        assert_eq!(a.try_recv().unwrap().event_type(), "FadeoutFinished");
        assert_eq!(b.try_recv().unwrap().event_type(), "FadeoutFinished");
    }
}
