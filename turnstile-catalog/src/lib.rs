pub mod inventory;
pub mod layout;
pub mod pricing;

pub use inventory::ReservationEngine;
pub use layout::{SectionLayout, StadiumLayout};
pub use pricing::{PricingEngine, SectionRate};
