//! The `Graft` handle and its sessions.

use futures_util::future::AbortRegistration;
use graft_core::builder::ExpressionBuilder;
use graft_core::error::Result;
use graft_core::exec::{AsyncConnection, CompiledQuery, Connection};
use graft_core::expr::ExprRef;
use graft_core::{graft_profile_scope, graft_trace_provider};
use graft_core::mapping::MappingSchema;
use graft_core::preamble::PreambleMode;
use graft_core::provider::{DataProvider, ProviderRegistry};
use graft_core::value::Value;
use std::sync::Arc;

use crate::config::GraftConfig;

/// A configured provider plus the mapping queries are compiled against.
#[derive(Clone)]
pub struct Graft {
    provider: Arc<dyn DataProvider>,
    connection_string: String,
    preamble_mode: PreambleMode,
    builder: ExpressionBuilder,
}

impl std::fmt::Debug for Graft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graft")
            .field("provider", &self.provider.name())
            .field("preamble_mode", &self.preamble_mode)
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl Graft {
    /// Resolve the configured provider from `registry`.
    pub fn from_config(config: &GraftConfig, registry: &ProviderRegistry) -> Result<Self> {
        let provider = registry.resolve(&config.provider)?;
        Ok(Self {
            provider,
            connection_string: config.connection_string.clone(),
            preamble_mode: config.preamble_mode,
            builder: ExpressionBuilder::default(),
        })
    }

    pub fn with_mapping(mut self, mapping: impl Into<Arc<MappingSchema>>) -> Self {
        self.builder = ExpressionBuilder::new(mapping);
        self
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider.as_ref()
    }

    pub fn preamble_mode(&self) -> PreambleMode {
        self.preamble_mode
    }

    pub fn builder(&self) -> &ExpressionBuilder {
        &self.builder
    }

    pub fn compile(&self, query: &ExprRef) -> Result<CompiledQuery> {
        self.builder.build(query)
    }

    /// Open a blocking session.
    pub fn connect(&self) -> Result<Session<'_>> {
        let conn = self.provider.create_connection(&self.connection_string)?;
        graft_trace_provider!("connect", self.provider.name());
        Ok(Session { graft: self, conn })
    }

    /// Open an async session.
    pub fn connect_async(&self) -> Result<AsyncSession<'_>> {
        let conn = self
            .provider
            .create_async_connection(&self.connection_string)?;
        graft_trace_provider!("connect_async", self.provider.name());
        Ok(AsyncSession { graft: self, conn })
    }
}

/// A blocking connection bound to a [`Graft`] handle.
pub struct Session<'g> {
    graft: &'g Graft,
    conn: Box<dyn Connection>,
}

impl Session<'_> {
    /// Compile and run `query`.
    pub fn query(&mut self, query: &ExprRef) -> Result<Vec<Value>> {
        graft_profile_scope!("session", "query");
        let compiled = self.graft.compile(query)?;
        self.execute(&compiled)
    }

    pub fn execute(&mut self, compiled: &CompiledQuery) -> Result<Vec<Value>> {
        compiled.execute(&mut *self.conn)
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }
}

/// An async connection bound to a [`Graft`] handle. Preambles are scheduled
/// with the handle's [`PreambleMode`].
pub struct AsyncSession<'g> {
    graft: &'g Graft,
    conn: Box<dyn AsyncConnection>,
}

impl AsyncSession<'_> {
    pub async fn query(&self, query: &ExprRef) -> Result<Vec<Value>> {
        let compiled = self.graft.compile(query)?;
        self.execute(&compiled).await
    }

    pub async fn execute(&self, compiled: &CompiledQuery) -> Result<Vec<Value>> {
        compiled
            .execute_async(self.conn.as_ref(), self.graft.preamble_mode)
            .await
    }

    /// Like [`AsyncSession::query`], failing with
    /// [`GraftError::Cancelled`](graft_core::GraftError::Cancelled) once the
    /// registration's handle is aborted.
    pub async fn query_cancellable(
        &self,
        query: &ExprRef,
        registration: AbortRegistration,
    ) -> Result<Vec<Value>> {
        let compiled = self.graft.compile(query)?;
        compiled
            .execute_cancellable(self.conn.as_ref(), self.graft.preamble_mode, registration)
            .await
    }

    pub fn connection(&self) -> &dyn AsyncConnection {
        self.conn.as_ref()
    }
}
