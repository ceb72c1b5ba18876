use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable seat key: `"{game_id}:{section}-{row}-{number}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(pub String);

impl SeatId {
    pub fn new(game_id: &GameId, section: &str, row: &str, number: u32) -> Self {
        Self(format!("{}:{}-{}-{}", game_id, section, row, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeatId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the signed-in user holding or buying a seat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flat status as stored in the `seats.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Held => "held",
            SeatStatus::Sold => "sold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(SeatStatus::Available),
            "held" => Some(SeatStatus::Held),
            "sold" => Some(SeatStatus::Sold),
            _ => None,
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation state of a seat. Holder and expiry only exist where they are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeatState {
    Available,
    Held {
        holder: HolderId,
        expires_at: DateTime<Utc>,
    },
    Sold {
        holder: HolderId,
        order_id: Uuid,
    },
}

impl SeatState {
    pub fn status(&self) -> SeatStatus {
        match self {
            SeatState::Available => SeatStatus::Available,
            SeatState::Held { .. } => SeatStatus::Held,
            SeatState::Sold { .. } => SeatStatus::Sold,
        }
    }

    pub fn holder(&self) -> Option<&HolderId> {
        match self {
            SeatState::Available => None,
            SeatState::Held { holder, .. } | SeatState::Sold { holder, .. } => Some(holder),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SeatState::Held { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            SeatState::Sold { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub game_id: GameId,
    pub section: String,
    pub row: String,
    pub number: u32,
    #[serde(flatten)]
    pub state: SeatState,
    pub updated_at: DateTime<Utc>,
}

impl Seat {
    pub fn new(game_id: GameId, section: &str, row: &str, number: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: SeatId::new(&game_id, section, row, number),
            game_id,
            section: section.to_string(),
            row: row.to_string(),
            number,
            state: SeatState::Available,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SeatStatus {
        self.state.status()
    }

    pub fn hold_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.state, SeatState::Held { expires_at, .. } if *expires_at <= now)
    }

    /// State as a reader should see it at `now`: an expired hold reads as available.
    pub fn effective_state(&self, now: DateTime<Utc>) -> SeatState {
        if self.hold_expired(now) {
            SeatState::Available
        } else {
            self.state.clone()
        }
    }

    pub fn is_held_by(&self, holder: &HolderId, now: DateTime<Utc>) -> bool {
        matches!(&self.state, SeatState::Held { holder: h, expires_at } if h == holder && *expires_at > now)
    }

    pub fn label(&self) -> String {
        format!("{} - Row {}, Seat {}", self.section, self.row, self.number)
    }
}
