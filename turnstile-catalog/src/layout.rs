use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use turnstile_core::{GameId, Seat};

/// One block of a stadium: every listed row has `seats_per_row` seats numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionLayout {
    pub section: String,
    pub rows: Vec<String>,
    pub seats_per_row: u32,
}

impl SectionLayout {
    pub fn new(section: &str, rows: &[&str], seats_per_row: u32) -> Self {
        Self {
            section: section.to_string(),
            rows: rows.iter().map(|r| r.to_string()).collect(),
            seats_per_row,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len() * self.seats_per_row as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StadiumLayout {
    pub sections: Vec<SectionLayout>,
}

impl StadiumLayout {
    /// VIP rows A-E (20 per row) and both laterals rows F-J (25 per row).
    pub fn default_stadium() -> Self {
        Self {
            sections: vec![
                SectionLayout::new("VIP", &["A", "B", "C", "D", "E"], 20),
                SectionLayout::new("Lateral-Esquerda", &["F", "G", "H", "I", "J"], 25),
                SectionLayout::new("Lateral-Direita", &["F", "G", "H", "I", "J"], 25),
            ],
        }
    }

    pub fn capacity(&self) -> usize {
        self.sections.iter().map(SectionLayout::capacity).sum()
    }

    /// Checks that every seat of the layout gets its own id. Section names may
    /// contain `-` but not `:`; row labels may contain neither, so the
    /// `{game}:{section}-{row}-{number}` id splits back unambiguously.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity() == 0 {
            return Err("layout has no seats".to_string());
        }

        let mut rows = HashSet::new();
        for section in &self.sections {
            let name = section.section.trim();
            if name.is_empty() || name.contains(':') {
                return Err(format!("invalid section name {:?}", section.section));
            }
            for row in &section.rows {
                if row.trim().is_empty() || row.contains('-') || row.contains(':') {
                    return Err(format!("invalid row label {:?} in section {}", row, name));
                }
                if !rows.insert((section.section.as_str(), row.as_str())) {
                    return Err(format!("row {} of section {} is listed twice", row, name));
                }
            }
        }
        Ok(())
    }

    /// Every seat of the layout for `game_id`, all available.
    pub fn seats_for(&self, game_id: &GameId, now: DateTime<Utc>) -> Vec<Seat> {
        let mut seats = Vec::with_capacity(self.capacity());
        for section in &self.sections {
            for row in &section.rows {
                for number in 1..=section.seats_per_row {
                    seats.push(Seat::new(game_id.clone(), &section.section, row, number, now));
                }
            }
        }
        seats
    }
}

impl Default for StadiumLayout {
    fn default() -> Self {
        Self::default_stadium()
    }
}
