//! Statement execution.
//!
//! A [`CompiledQuery`] is a main projection plus the preambles it reads.
//! Executing it runs every preamble to completion, publishes their results,
//! then runs the main statement: each table the statement scans is fetched
//! once from the connection and the plan is evaluated over those snapshots.

use compact_str::CompactString;
use futures_util::future::{AbortRegistration, Abortable, Aborted, BoxFuture};
use hashbrown::HashSet;
use std::sync::Arc;

use crate::error::{GraftError, Result};
use crate::eval::{Env, Evaluator, Tables};
use crate::expr::visit::walk;
use crate::expr::{Expr, ExprRef};
use crate::preamble::{PreambleMode, PreambleRegistry, PreambleValues};
use crate::value::Value;
use crate::{graft_profile_scope, graft_trace_statement};

/// A blocking connection.
pub trait Connection: Send {
    /// Name of the provider that opened this connection.
    fn provider_name(&self) -> &str;

    /// All rows of `table`, as records.
    fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>>;
}

/// A connection whose reads return futures.
pub trait AsyncConnection: Send + Sync {
    fn provider_name(&self) -> &str;

    fn fetch_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<Value>>>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }

    fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>> {
        (**self).fetch_table(table)
    }
}

/// A query ready to run, with its preamble registry.
#[derive(Debug)]
pub struct CompiledQuery {
    query: ExprRef,
    preambles: PreambleRegistry,
    tables: Vec<CompactString>,
}

impl CompiledQuery {
    pub fn new(query: ExprRef, preambles: PreambleRegistry) -> Self {
        let tables = referenced_tables(&query);
        Self {
            query,
            preambles,
            tables,
        }
    }

    /// The rewritten main projection.
    pub fn query(&self) -> &ExprRef {
        &self.query
    }

    pub fn preambles(&self) -> &PreambleRegistry {
        &self.preambles
    }

    pub fn preamble_count(&self) -> usize {
        self.preambles.len()
    }

    /// Tables scanned by the main statement, in first-seen order.
    pub fn tables(&self) -> &[CompactString] {
        &self.tables
    }

    /// Run preambles then the main statement on a blocking connection.
    pub fn execute(&self, conn: &mut dyn Connection) -> Result<Vec<Value>> {
        graft_profile_scope!("exec", "execute");
        let published = self.preambles.run(conn)?;
        let mut tables = Tables::new();
        for name in &self.tables {
            let rows = conn.fetch_table(name)?;
            tables.insert(name.clone(), Arc::from(rows));
        }
        let rows = self.evaluate(&tables, &published)?;
        graft_trace_statement!(conn.provider_name(), tables.len(), rows.len());
        Ok(rows)
    }

    /// Asynchronous counterpart of [`CompiledQuery::execute`].
    pub fn execute_async<'a>(
        &'a self,
        conn: &'a dyn AsyncConnection,
        mode: PreambleMode,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let published = self.preambles.run_async(conn, mode).await?;
            let mut tables = Tables::new();
            for name in &self.tables {
                let rows = conn.fetch_table(name).await?;
                tables.insert(name.clone(), Arc::from(rows));
            }
            let rows = self.evaluate(&tables, &published)?;
            graft_trace_statement!(conn.provider_name(), tables.len(), rows.len());
            Ok(rows)
        })
    }

    /// Like [`CompiledQuery::execute_async`], stopping with
    /// [`GraftError::Cancelled`] once `registration`'s handle is aborted.
    ///
    /// Nothing is published when cancelled: results of preambles that had
    /// already finished are dropped with the future.
    pub async fn execute_cancellable(
        &self,
        conn: &dyn AsyncConnection,
        mode: PreambleMode,
        registration: AbortRegistration,
    ) -> Result<Vec<Value>> {
        match Abortable::new(self.execute_async(conn, mode), registration).await {
            Ok(result) => result,
            Err(Aborted) => Err(GraftError::Cancelled),
        }
    }

    fn evaluate(&self, tables: &Tables, published: &PreambleValues) -> Result<Vec<Value>> {
        graft_profile_scope!("exec", "evaluate");
        let evaluator = Evaluator::new(tables, published);
        match evaluator.eval(&self.query, &Env::root())? {
            Value::List(items) => Ok(items.to_vec()),
            scalar => Ok(vec![scalar]),
        }
    }
}

/// Tables scanned by `query`, excluding those only read by preambles.
pub fn referenced_tables(query: &ExprRef) -> Vec<CompactString> {
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    walk(query, &mut |node| {
        if let Expr::Table { name } = &**node
            && seen.insert(name.clone())
        {
            tables.push(name.clone());
        }
        true
    });
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExprExt, Scope, Ty};
    use crate::value::Record;

    struct Fixed {
        fetches: usize,
    }

    impl Connection for Fixed {
        fn provider_name(&self) -> &str {
            "fixed"
        }

        fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>> {
            self.fetches += 1;
            match table {
                "numbers" => Ok((1..=4)
                    .map(|n| Value::record(Record::new("numbers").with("n", n as i64)))
                    .collect()),
                other => Err(GraftError::ExecutionError(format!("no table {other}"))),
            }
        }
    }

    #[test]
    fn each_table_fetched_once_per_statement() {
        let mut scope = Scope::new();
        let a = scope.param("a", Ty::entity("numbers"));
        let b = scope.param("b", Ty::entity("numbers"));
        let query = Expr::table("numbers").select_many(
            &a,
            Expr::table("numbers").filter(
                &b,
                b.expr().member("n", Ty::Int).less(a.expr().member("n", Ty::Int)),
            ),
        );
        let compiled = CompiledQuery::new(query, PreambleRegistry::new());
        assert_eq!(compiled.tables(), &["numbers"]);

        let mut conn = Fixed { fetches: 0 };
        let rows = compiled.execute(&mut conn).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(conn.fetches, 1);
    }

    #[test]
    fn scalar_results_are_wrapped() {
        let compiled = CompiledQuery::new(Expr::table("numbers").count(), PreambleRegistry::new());
        let rows = compiled.execute(&mut Fixed { fetches: 0 }).unwrap();
        assert_eq!(rows, vec![Value::Int(4)]);
    }

    #[test]
    fn fetch_errors_propagate() {
        let compiled = CompiledQuery::new(Expr::table("missing"), PreambleRegistry::new());
        let err = compiled.execute(&mut Fixed { fetches: 0 }).unwrap_err();
        assert!(matches!(err, GraftError::ExecutionError(_)));
    }
}
