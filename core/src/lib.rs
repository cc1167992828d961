//! Core of the graft eager-loading engine.
//!
//! Queries are written as typed expression trees ([`expr`]). The
//! [`ExpressionBuilder`] finds detail collections nested in a query's
//! projection and loads each of them with one extra statement for all parent
//! rows (a *preamble*), instead of one statement per parent row. Preamble
//! results are published through an [`EagerLoadingContext`] keyed by a
//! synthesized composite key, and the main projection reads children from
//! it by key.

pub mod builder;
pub mod deps;
pub mod eager;
pub mod error;
pub mod eval;
pub mod exec;
pub mod expr;
pub mod key;
pub mod mapping;
pub mod preamble;
pub mod provider;
pub mod remap;
pub mod value;

pub mod profiling;
pub mod tracing;

pub use builder::ExpressionBuilder;
pub use eager::EagerLoadingContext;
pub use error::{GraftError, Result};
pub use exec::{AsyncConnection, CompiledQuery, Connection};
pub use expr::{Expr, ExprExt, ExprRef, Param, Scope, Ty};
pub use mapping::{AssociationDescriptor, EntityDescriptor, MappingSchema};
pub use preamble::{PreambleMode, PreambleRegistry};
pub use provider::{DataProvider, DynamicProvider, ProviderAdapter, ProviderRegistry};
pub use value::{Record, Value, ValueKind};

/// Commonly used types for building and running queries.
pub mod prelude {
    pub use crate::builder::ExpressionBuilder;
    pub use crate::error::{GraftError, Result};
    pub use crate::exec::{AsyncConnection, CompiledQuery, Connection};
    pub use crate::expr::{Expr, ExprExt, ExprRef, KeyedKind, Param, Part, Scope, Ty};
    pub use crate::mapping::{AssociationDescriptor, EntityDescriptor, MappingSchema};
    pub use crate::preamble::PreambleMode;
    pub use crate::value::{Record, Value, ValueKind};
}
