//! # graft
//!
//! An eager-loading query engine for object-relational mapping.
//!
//! Queries are typed expression trees. A detail collection nested in a
//! query's projection (a customer's orders, an order's lines) is loaded with
//! one extra statement for every parent at once, never one statement per
//! parent row.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graft::prelude::*;
//!
//! let registry = graft::default_registry();
//! let config = GraftConfig::load()?;
//! let graft = Graft::from_config(&config, &registry)?.with_mapping(mapping);
//!
//! let mut scope = Scope::new();
//! let c = scope.param("c", Ty::entity("customers"));
//! let query = Expr::table("customers").select(
//!     &c,
//!     Expr::record("View", [
//!         ("name", c.expr().member("name", Ty::Text)),
//!         ("orders", c.expr().member("orders", Ty::seq(Ty::entity("orders")))),
//!     ]),
//! );
//! let rows = graft.connect()?.query(&query)?;
//! ```
//!
//! ## Providers
//!
//! | Provider | Crate          | Feature Flag |
//! |----------|----------------|--------------|
//! | `memory` | `graft-core`   | always       |
//! | `sqlite` | `graft-sqlite` | `rusqlite`   |

pub mod config;
mod graft;

pub use crate::config::{CONFIG_FILE, ConfigError, GraftConfig};
pub use crate::graft::{AsyncSession, Graft, Session};

/// Result type for graft operations
pub use graft_core::error::Result;

/// Error types
pub mod error {
    pub use graft_core::error::GraftError;
}

/// Core engine: expression IR, builder, planner, evaluator and providers.
pub use graft_core as core;

/// SQLite provider backed by rusqlite.
#[cfg(feature = "rusqlite")]
pub use graft_sqlite as sqlite;

use graft_core::provider::ProviderRegistry;

/// A registry holding every provider compiled into this build.
///
/// The in-memory provider is not included since it needs its databases up
/// front; register a
/// [`MemoryAdapter`](graft_core::provider::memory::MemoryAdapter) with
/// [`ProviderRegistry::register_adapter`] to use it.
pub fn default_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    #[cfg(feature = "rusqlite")]
    graft_sqlite::register(&registry);
    registry
}

/// Commonly used types.
pub mod prelude {
    pub use crate::config::GraftConfig;
    pub use crate::graft::{AsyncSession, Graft, Session};
    pub use graft_core::prelude::*;
    pub use graft_core::provider::ProviderRegistry;
}
