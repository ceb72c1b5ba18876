pub mod app_config;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod feed;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod seat_repo;

pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use feed::BroadcastChangeFeed;
pub use memory::{InMemoryOrderStore, InMemorySeatStore};
pub use order_repo::PgOrderStore;
pub use redis_repo::RedisClient;
pub use seat_repo::PgSeatStore;
