mod memory;
mod postgres;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use memory::MemoryStore;
pub use postgres::PgStore;
