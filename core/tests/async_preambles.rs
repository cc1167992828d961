mod common;

use common::{orders_of, shop};
use futures_util::future::{self, AbortHandle, BoxFuture};
use graft_core::prelude::*;
use graft_core::provider::memory::MemoryConnection;
use std::time::Duration;

/// Wraps a memory connection; reads of `stalled` never complete and reads
/// of `failing` error out.
struct Flaky {
    inner: MemoryConnection,
    stalled: Option<&'static str>,
    failing: Option<&'static str>,
}

impl AsyncConnection for Flaky {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    fn fetch_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        if self.stalled == Some(table) {
            return Box::pin(future::pending());
        }
        if self.failing == Some(table) {
            return Box::pin(future::ready(Err(GraftError::ExecutionError(format!(
                "connection reset while reading {table}"
            )))));
        }
        AsyncConnection::fetch_table(&self.inner, table)
    }
}

fn query() -> ExprRef {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let t = scope.param("t", Ty::entity("orders"));
    let ids = orders_of(&mut scope, &c).select(&o, o.expr().member("id", Ty::Int));
    let totals = orders_of(&mut scope, &c).select(&t, t.expr().member("total", Ty::Int));
    Expr::table("customers").select(
        &c,
        Expr::record(
            "CustomerView",
            [
                ("orders", ids),
                ("totals", totals),
                ("everyone", Expr::table("customers").count()),
            ],
        ),
    )
}

#[tokio::test]
async fn async_matches_blocking() {
    let compiled = ExpressionBuilder::default().build(&query()).unwrap();
    assert_eq!(compiled.preamble_count(), 3);

    let db = shop();
    let mut conn = MemoryConnection::open(db.clone()).unwrap();
    let expected = compiled.execute(&mut conn).unwrap();

    for mode in [PreambleMode::Sequential, PreambleMode::Concurrent] {
        let rows = compiled.execute_async(&conn, mode).await.unwrap();
        assert_eq!(rows, expected);
    }
    assert_eq!(expected[1].field("everyone"), Some(&Value::Int(3)));
}

#[tokio::test]
async fn cancellation_stops_pending_preambles() {
    let compiled = ExpressionBuilder::default().build(&query()).unwrap();
    let conn = Flaky {
        inner: MemoryConnection::open(shop()).unwrap(),
        stalled: Some("orders"),
        failing: None,
    };

    let (handle, registration) = AbortHandle::new_pair();
    let run = compiled.execute_cancellable(&conn, PreambleMode::Concurrent, registration);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
    };
    let (result, ()) = tokio::join!(run, cancel);
    assert!(matches!(result, Err(GraftError::Cancelled)));
}

#[tokio::test]
async fn preamble_failure_names_its_slot() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let query = Expr::table("customers").select(
        &c,
        Expr::record("CustomerView", [("orders", orders_of(&mut scope, &c))]),
    );
    let compiled = ExpressionBuilder::default().build(&query).unwrap();
    let conn = Flaky {
        inner: MemoryConnection::open(shop()).unwrap(),
        stalled: None,
        failing: Some("orders"),
    };

    for mode in [PreambleMode::Sequential, PreambleMode::Concurrent] {
        match compiled.execute_async(&conn, mode).await {
            Err(GraftError::Preamble { slot, source }) => {
                assert_eq!(slot, 0);
                assert!(matches!(*source, GraftError::ExecutionError(_)));
            }
            other => panic!("expected a preamble failure, got {other:?}"),
        }
    }
}

#[test]
fn blocking_failure_names_its_slot() {
    struct Broken(MemoryConnection);

    impl Connection for Broken {
        fn provider_name(&self) -> &str {
            "broken"
        }

        fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>> {
            if table == "orders" {
                return Err(GraftError::ExecutionError("disk I/O error".into()));
            }
            Connection::fetch_table(&mut self.0, table)
        }
    }

    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let query = Expr::table("customers").select(
        &c,
        Expr::record("CustomerView", [("orders", orders_of(&mut scope, &c))]),
    );
    let compiled = ExpressionBuilder::default().build(&query).unwrap();
    let err = compiled.execute(&mut Broken(MemoryConnection::open(shop()).unwrap())).unwrap_err();
    assert!(matches!(err, GraftError::Preamble { slot: 0, .. }));
}
