//! Tracing utilities for statement, fetch, preamble and planning observability.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]` boilerplate
//! at every call site.

/// Emit a debug-level tracing event for one executed statement.
///
/// ```ignore
/// graft_trace_statement!(provider, tables.len(), rows.len());
/// ```
#[macro_export]
macro_rules! graft_trace_statement {
    ($provider:expr, $tables:expr, $rows:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            provider = %$provider,
            tables = $tables,
            rows = $rows,
            "graft.statement"
        );
    };
}

/// Emit a trace-level event for one table read by a provider.
///
/// ```ignore
/// graft_trace_fetch!(PROVIDER_NAME, table, out.len());
/// ```
#[macro_export]
macro_rules! graft_trace_fetch {
    ($provider:expr, $table:expr, $rows:expr) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(provider = %$provider, table = %$table, rows = $rows, "graft.fetch");
    };
}

/// Emit a debug-level tracing event when a preamble slot finishes.
///
/// ```ignore
/// graft_trace_preamble!(slot, "correlated", items);
/// ```
#[macro_export]
macro_rules! graft_trace_preamble {
    ($slot:expr, $kind:expr, $items:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(slot = $slot, kind = $kind, items = $items, "graft.preamble");
    };
}

/// Emit a trace-level event describing a planning decision.
///
/// ```ignore
/// graft_trace_plan!("correlated", slot, keys.len());
/// ```
#[macro_export]
macro_rules! graft_trace_plan {
    ($mode:expr, $slot:expr, $keys:expr) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(mode = $mode, slot = $slot, keys = $keys, "graft.plan");
    };
}

/// Emit an info-level event for provider capability negotiation.
#[macro_export]
macro_rules! graft_trace_provider {
    ($event:literal, $provider:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(event = $event, provider = %$provider, "graft.provider");
    };
}
