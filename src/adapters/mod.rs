pub mod memory;
pub mod payload;
pub mod postgres;
pub mod provider;
pub mod rate_limit;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use provider::{ApiSportsClient, ProviderClient};
pub use rate_limit::TokenBucket;
