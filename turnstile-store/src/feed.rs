use tokio::sync::broadcast;
use turnstile_core::{ChangeFeed, GameId, SeatChange, Subscription};

/// In-process change feed backed by a tokio broadcast channel.
///
/// Slow subscribers are not allowed to hold writers back: when one falls more
/// than `capacity` changes behind it gets [`turnstile_core::FeedMessage::Lagged`]
/// and has to re-read the seat table.
#[derive(Clone)]
pub struct BroadcastChangeFeed {
    tx: broadcast::Sender<SeatChange>,
}

impl BroadcastChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Every change of every game, for relays.
    pub fn subscribe_all(&self) -> broadcast::Receiver<SeatChange> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ChangeFeed for BroadcastChangeFeed {
    fn subscribe(&self, game_id: &GameId) -> Subscription {
        Subscription::new(game_id.clone(), self.tx.subscribe())
    }

    fn publish(&self, change: SeatChange) {
        // No subscribers is not an error.
        let _ = self.tx.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use turnstile_core::{FeedMessage, Seat};

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let feed = BroadcastChangeFeed::new(8);
        let sub = feed.subscribe(&GameId::new("g1"));
        assert_eq!(feed.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn delivers_published_changes() {
        let feed = BroadcastChangeFeed::new(8);
        let mut sub = feed.subscribe(&GameId::new("g1"));
        let seat = Seat::new(GameId::new("g1"), "VIP", "A", 1, Utc::now());

        feed.publish(SeatChange::insert(seat.clone()));

        assert_eq!(sub.recv().await, Some(FeedMessage::Change(SeatChange::insert(seat))));
    }
}
