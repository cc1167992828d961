//! Auxiliary queries executed before the main statement.
//!
//! Each registered preamble owns a compiled query and two executors with the
//! same semantics: one for blocking connections and one returning a future.
//! Every preamble finishes before the main projection runs; results are
//! collected locally and published as one [`PreambleValues`] array only once
//! all of them succeeded.

use futures_util::future::{BoxFuture, try_join_all};
use std::sync::Arc;

use crate::eager::EagerLoadingContext;
use crate::error::{GraftError, Result};
use crate::exec::{AsyncConnection, CompiledQuery, Connection};
use crate::value::Value;
use crate::{graft_profile_scope, graft_trace_preamble};

/// How asynchronous preambles are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PreambleMode {
    /// One preamble at a time, in registration order.
    #[default]
    Sequential,
    /// All preambles polled together on the caller's task.
    Concurrent,
}

/// What a slot holds once published.
#[derive(Debug, Clone)]
pub enum PreambleValue {
    /// Result of an independent detail query, shared by every parent.
    List(Arc<[Value]>),
    /// Children grouped by correlation key.
    Context(Arc<EagerLoadingContext<Value, Value>>),
}

impl PreambleValue {
    pub fn item_count(&self) -> usize {
        match self {
            PreambleValue::List(items) => items.len(),
            PreambleValue::Context(context) => context.item_count(),
        }
    }

    fn from_envelopes(rows: Vec<Value>) -> Result<Self> {
        let mut context = EagerLoadingContext::new();
        for row in rows {
            let Value::Keyed(envelope) = row else {
                return Err(GraftError::eval(format!(
                    "correlated preamble produced a {} row instead of a key/detail envelope",
                    row.kind()
                )));
            };
            let envelope = Arc::unwrap_or_clone(envelope);
            context.add(envelope.key, envelope.data);
        }
        Ok(PreambleValue::Context(Arc::new(context)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleKind {
    Detached,
    Correlated,
}

impl PreambleKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            PreambleKind::Detached => "detached",
            PreambleKind::Correlated => "correlated",
        }
    }
}

pub type SyncExecutor = Box<dyn Fn(&mut dyn Connection) -> Result<PreambleValue> + Send + Sync>;

pub type AsyncExecutor = Box<
    dyn for<'c> Fn(&'c dyn AsyncConnection, PreambleMode) -> BoxFuture<'c, Result<PreambleValue>>
        + Send
        + Sync,
>;

pub struct Preamble {
    kind: PreambleKind,
    query: Arc<CompiledQuery>,
    run: SyncExecutor,
    run_async: AsyncExecutor,
}

impl core::fmt::Debug for Preamble {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Preamble")
            .field("kind", &self.kind)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl Preamble {
    /// Loads `query` once and publishes its rows as a list.
    pub fn detached(query: CompiledQuery) -> Self {
        let query = Arc::new(query);
        let sync_query = query.clone();
        let async_query = query.clone();
        Self {
            kind: PreambleKind::Detached,
            query,
            run: Box::new(move |conn| {
                let rows = sync_query.execute(conn)?;
                Ok(PreambleValue::List(Arc::from(rows)))
            }),
            run_async: Box::new(move |conn, mode| {
                let query = async_query.clone();
                Box::pin(async move {
                    let rows = query.execute_async(conn, mode).await?;
                    Ok(PreambleValue::List(Arc::from(rows)))
                })
            }),
        }
    }

    /// Loads key/detail envelopes from `query` and groups them by key.
    pub fn correlated(query: CompiledQuery) -> Self {
        let query = Arc::new(query);
        let sync_query = query.clone();
        let async_query = query.clone();
        Self {
            kind: PreambleKind::Correlated,
            query,
            run: Box::new(move |conn| PreambleValue::from_envelopes(sync_query.execute(conn)?)),
            run_async: Box::new(move |conn, mode| {
                let query = async_query.clone();
                Box::pin(async move {
                    PreambleValue::from_envelopes(query.execute_async(conn, mode).await?)
                })
            }),
        }
    }

    pub fn kind(&self) -> PreambleKind {
        self.kind
    }

    /// The query this preamble executes.
    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }
}

/// Ordered preamble slots of one compiled query.
#[derive(Debug, Default)]
pub struct PreambleRegistry {
    entries: Vec<Preamble>,
}

impl PreambleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preamble and return its slot.
    pub fn register(&mut self, preamble: Preamble) -> usize {
        self.entries.push(preamble);
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Preamble> {
        self.entries.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preamble> {
        self.entries.iter()
    }

    /// Run every preamble on a blocking connection, in slot order.
    pub fn run(&self, conn: &mut dyn Connection) -> Result<PreambleValues> {
        graft_profile_scope!("preamble", "run");
        let mut slots = Vec::with_capacity(self.entries.len());
        for (slot, preamble) in self.entries.iter().enumerate() {
            let value = (preamble.run)(conn).map_err(|source| wrap(slot, source))?;
            graft_trace_preamble!(slot, preamble.kind.as_str(), value.item_count());
            slots.push(value);
        }
        Ok(PreambleValues { slots })
    }

    /// Run every preamble on an asynchronous connection.
    pub fn run_async<'a>(
        &'a self,
        conn: &'a dyn AsyncConnection,
        mode: PreambleMode,
    ) -> BoxFuture<'a, Result<PreambleValues>> {
        Box::pin(async move {
            let slots = match mode {
                PreambleMode::Sequential => {
                    let mut slots = Vec::with_capacity(self.entries.len());
                    for (slot, preamble) in self.entries.iter().enumerate() {
                        let value = (preamble.run_async)(conn, mode)
                            .await
                            .map_err(|source| wrap(slot, source))?;
                        graft_trace_preamble!(slot, preamble.kind.as_str(), value.item_count());
                        slots.push(value);
                    }
                    slots
                }
                PreambleMode::Concurrent => {
                    let pending = self.entries.iter().enumerate().map(|(slot, preamble)| {
                        let future = (preamble.run_async)(conn, mode);
                        async move {
                            let value = future.await.map_err(|source| wrap(slot, source))?;
                            graft_trace_preamble!(slot, preamble.kind.as_str(), value.item_count());
                            Ok::<_, GraftError>(value)
                        }
                    });
                    try_join_all(pending).await?
                }
            };
            Ok(PreambleValues { slots })
        })
    }
}

fn wrap(slot: usize, source: GraftError) -> GraftError {
    match source {
        GraftError::Cancelled => GraftError::Cancelled,
        source => GraftError::Preamble {
            slot,
            source: Box::new(source),
        },
    }
}

/// Published preamble results, indexed by slot.
#[derive(Debug, Clone, Default)]
pub struct PreambleValues {
    slots: Vec<PreambleValue>,
}

impl PreambleValues {
    pub fn get(&self, slot: usize) -> Result<&PreambleValue> {
        self.slots.get(slot).ok_or_else(|| {
            GraftError::eval(format!(
                "preamble slot {slot} is not published ({} available)",
                self.slots.len()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
