use serde::{Deserialize, Serialize};
use turnstile_core::Seat;

/// Row letters that carry a discount, front to back.
const ROW_ORDER: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRate {
    pub section: String,
    pub base_price: i64,
    /// Subtracted once per row behind row A.
    pub row_step: i64,
}

/// Price of a seat from its section and row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEngine {
    rates: Vec<SectionRate>,
    fallback: SectionRate,
}

impl PricingEngine {
    pub fn new(rates: Vec<SectionRate>, fallback_base: i64, fallback_step: i64) -> Self {
        Self {
            rates,
            fallback: SectionRate {
                section: String::new(),
                base_price: fallback_base,
                row_step: fallback_step,
            },
        }
    }

    fn rate_for(&self, section: &str) -> &SectionRate {
        self.rates.iter().find(|r| r.section == section).unwrap_or(&self.fallback)
    }

    /// Rows outside A-J get no discount.
    pub fn price(&self, section: &str, row: &str) -> i64 {
        let rate = self.rate_for(section);
        let index = ROW_ORDER.iter().position(|r| *r == row).unwrap_or(0) as i64;
        (rate.base_price - index * rate.row_step).max(0)
    }

    pub fn price_of(&self, seat: &Seat) -> i64 {
        self.price(&seat.section, &seat.row)
    }

    pub fn total<'a>(&self, seats: impl IntoIterator<Item = &'a Seat>) -> i64 {
        seats.into_iter().map(|s| self.price_of(s)).sum()
    }
}

impl Default for PricingEngine {
    fn default() -> Self {
        let rate = |section: &str, base_price, row_step| SectionRate {
            section: section.to_string(),
            base_price,
            row_step,
        };
        Self::new(
            vec![
                rate("VIP", 10_000, 200),
                rate("Lateral-Esquerda", 5_000, 100),
                rate("Lateral-Direita", 5_000, 100),
            ],
            3_000,
            100,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use turnstile_core::GameId;

    #[test]
    fn vip_rows_step_down_by_200() {
        let pricing = PricingEngine::default();
        assert_eq!(pricing.price("VIP", "A"), 10_000);
        assert_eq!(pricing.price("VIP", "E"), 9_200);
    }

    #[test]
    fn laterals_start_at_row_f() {
        let pricing = PricingEngine::default();
        assert_eq!(pricing.price("Lateral-Esquerda", "F"), 4_500);
        assert_eq!(pricing.price("Lateral-Direita", "J"), 4_100);
    }

    #[test]
    fn unknown_sections_use_fallback() {
        let pricing = PricingEngine::default();
        assert_eq!(pricing.price("Bancada", "B"), 2_900);
        assert_eq!(pricing.price("Bancada", "Z"), 3_000);
    }

    #[test]
    fn total_sums_seat_prices() {
        let game = GameId::new("g1");
        let now = Utc::now();
        let seats = [Seat::new(game.clone(), "VIP", "A", 1, now), Seat::new(game, "VIP", "B", 1, now)];
        assert_eq!(PricingEngine::default().total(&seats), 19_800);
    }
}
