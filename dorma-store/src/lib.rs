pub mod app_config;
pub mod memory;
pub mod postgres;

pub use app_config::Config;
pub use memory::InMemoryStore;
pub use postgres::PgStore;
