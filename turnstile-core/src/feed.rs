use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::seat::{GameId, Seat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// One row-level change of the seat table. For deletes `seat` is the row as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatChange {
    pub kind: ChangeKind,
    pub seat: Seat,
    pub committed_at: DateTime<Utc>,
}

impl SeatChange {
    pub fn insert(seat: Seat) -> Self {
        let committed_at = seat.updated_at;
        Self { kind: ChangeKind::Insert, seat, committed_at }
    }

    pub fn update(seat: Seat) -> Self {
        let committed_at = seat.updated_at;
        Self { kind: ChangeKind::Update, seat, committed_at }
    }

    pub fn delete(seat: Seat, committed_at: DateTime<Utc>) -> Self {
        Self { kind: ChangeKind::Delete, seat, committed_at }
    }

    pub fn game_id(&self) -> &GameId {
        &self.seat.game_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Change(SeatChange),
    /// The subscriber fell behind and `n` changes were dropped. Local state must be re-read.
    Lagged(u64),
}

/// Row-level change notifications for the seat table.
pub trait ChangeFeed: Send + Sync {
    /// Starts delivering changes for one game. Dropping the subscription unsubscribes.
    fn subscribe(&self, game_id: &GameId) -> Subscription;

    fn publish(&self, change: SeatChange);
}

/// Receiving end of a game-scoped feed subscription.
#[derive(Debug)]
pub struct Subscription {
    game_id: GameId,
    rx: broadcast::Receiver<SeatChange>,
}

impl Subscription {
    pub fn new(game_id: GameId, rx: broadcast::Receiver<SeatChange>) -> Self {
        Self { game_id, rx }
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    /// Waits for the next change of this game. `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.game_id() == &self.game_id => return Some(FeedMessage::Change(change)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => return Some(FeedMessage::Lagged(n)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next pending change without waiting.
    pub fn try_recv(&mut self) -> Option<FeedMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.game_id() == &self.game_id => return Some(FeedMessage::Change(change)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => return Some(FeedMessage::Lagged(n)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        tracing::debug!("Unsubscribed from seat changes of game {}", self.game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_filters_other_games() {
        let (tx, rx) = broadcast::channel(16);
        let mut sub = Subscription::new(GameId::new("g1"), rx);
        let now = Utc::now();

        tx.send(SeatChange::insert(Seat::new(GameId::new("g2"), "VIP", "A", 1, now))).unwrap();
        tx.send(SeatChange::insert(Seat::new(GameId::new("g1"), "VIP", "A", 1, now))).unwrap();

        match sub.recv().await {
            Some(FeedMessage::Change(change)) => assert_eq!(change.seat.game_id, GameId::new("g1")),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new(GameId::new("g1"), rx);
        let now = Utc::now();

        for n in 1..=4 {
            tx.send(SeatChange::insert(Seat::new(GameId::new("g1"), "VIP", "A", n, now))).unwrap();
        }

        assert_eq!(sub.try_recv(), Some(FeedMessage::Lagged(2)));
    }
}
