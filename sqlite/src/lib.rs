//! SQLite provider for graft, backed by rusqlite.
//!
//! ```ignore
//! let registry = ProviderRegistry::new();
//! graft_sqlite::register(&registry);
//! let provider = registry.resolve("sqlite")?;
//! let mut conn = provider.create_connection("app.db")?;
//! ```

mod connection;
mod row;

pub use connection::{SqliteAdapter, SqliteAsyncConnection, SqliteConnection};
pub use row::SqliteRow;

use graft_core::provider::ProviderRegistry;

/// Name the provider registers under.
pub const PROVIDER_NAME: &str = "sqlite";

/// Register the SQLite provider with `registry`.
pub fn register(registry: &ProviderRegistry) {
    registry.register_adapter(SqliteAdapter);
}
