//! Local change feed for live queries.
//!
//! - tokio::sync::broadcast for pub-sub notifications
//! - Every receiver sees every event; receivers never mutate the feed

use std::sync::Arc;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::changes::Changes;

/// A change notification as seen by feed receivers.
pub type ChangeEvent = Arc<Changes>;

/// Multi-consumer feed of committed [`Changes`].
///
/// Fed by local commits and by decoded inbound broadcast messages.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Create a new change feed with the given capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of buffered events.
    ///   Receivers that fall further behind observe a lag error.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the feed.
    ///
    /// Returns a receiver that will receive all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Push an event to every receiver.
    ///
    /// # Returns
    ///
    /// The number of receivers that received the event.
    pub fn publish(&self, changes: ChangeEvent) -> usize {
        // send() returns an error if there are no receivers, which is fine
        self.sender.send(changes).unwrap_or(0)
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn event(store: &str, key: i64) -> ChangeEvent {
        let mut builder = Changes::builder();
        builder.add(store, key);
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn test_every_receiver_sees_every_event() {
        let feed = ChangeFeed::new(16);
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();

        let count = feed.publish(event("projects", 42));
        assert_eq!(count, 2);

        let e1 = rx1.recv().await.unwrap();
        assert_eq!(e1.keys("projects").unwrap()[0], Key::Int(42));

        let e2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let feed = ChangeFeed::new(16);
        let mut rx = feed.subscribe();

        for key in 0..5 {
            feed.publish(event("projects", key));
        }
        for key in 0..5 {
            let e = rx.recv().await.unwrap();
            assert_eq!(e.keys("projects").unwrap(), &[Key::Int(key)]);
        }
    }

    #[test]
    fn test_publish_without_receivers() {
        let feed = ChangeFeed::new(16);

        // No receivers - should not panic
        assert_eq!(feed.publish(event("projects", 1)), 0);
        assert_eq!(feed.receiver_count(), 0);
    }
}
