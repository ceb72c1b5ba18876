use chrono::{DateTime, Utc};
use std::collections::HashMap;
use turnstile_core::{ChangeKind, Seat, SeatChange, SeatId, SeatState};

/// Last known record per seat, merged last-write-wins on the row version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeatCache {
    seats: HashMap<SeatId, Seat>,
}

impl SeatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, seat_id: &SeatId) -> Option<&Seat> {
        self.seats.get(seat_id)
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.values()
    }

    /// Stores `seat` unless the cache already has the same or a newer version. Returns whether it was applied.
    pub fn record(&mut self, seat: Seat) -> bool {
        match self.seats.get(&seat.id) {
            Some(cached) if cached.updated_at >= seat.updated_at => false,
            _ => {
                self.seats.insert(seat.id.clone(), seat);
                true
            }
        }
    }

    /// Merges one feed change. A deleted row is kept as an available seat.
    pub fn apply(&mut self, change: SeatChange) -> bool {
        let SeatChange { kind, mut seat, committed_at } = change;
        if kind == ChangeKind::Delete {
            seat.state = SeatState::Available;
        }
        seat.updated_at = committed_at;
        self.record(seat)
    }

    /// Merges a full read taken at `read_at`. Seats missing from it are dropped
    /// unless the cache saw them change after the read.
    pub fn replace_all(&mut self, seats: Vec<Seat>, read_at: DateTime<Utc>) {
        let fetched: HashMap<SeatId, Seat> = seats.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.seats.retain(|id, cached| fetched.contains_key(id) || cached.updated_at > read_at);
        for seat in fetched.into_values() {
            self.record(seat);
        }
    }
}
