pub mod cache;
pub mod view;

pub use cache::SeatCache;
pub use view::{display_status, DisplayStatus, SeatView, SelectionError, SelectionView};
