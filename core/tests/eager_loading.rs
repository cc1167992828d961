mod common;

use common::{ints, mapping, orders_of, scaled, shop};
use graft_core::prelude::*;
use graft_core::provider::memory::{MemoryConnection, MemoryDatabase};
use std::sync::Arc;

fn run(db: &Arc<MemoryDatabase>, builder: &ExpressionBuilder, query: &ExprRef) -> Vec<Value> {
    let compiled = builder.build(query).unwrap();
    let mut conn = MemoryConnection::open(db.clone()).unwrap();
    db.reset_stats();
    compiled.execute(&mut conn).unwrap()
}

fn customers_with_orders() -> ExprRef {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let orders = orders_of(&mut scope, &c);
    Expr::table("customers").select(
        &c,
        Expr::record(
            "CustomerView",
            [("id", c.expr().member("id", Ty::Int)), ("orders", orders)],
        ),
    )
}

#[test]
fn children_are_grouped_by_parent() {
    let db = shop();
    let rows = run(&db, &ExpressionBuilder::default(), &customers_with_orders());
    let counts: Vec<usize> = rows
        .iter()
        .map(|row| row.field("orders").and_then(Value::as_list).unwrap().len())
        .collect();
    assert_eq!(counts, vec![0, 2, 1]);
}

#[test]
fn children_keep_source_order_within_a_key() {
    let db = shop();
    let rows = run(&db, &ExpressionBuilder::default(), &customers_with_orders());
    assert!(ints(rows[0].field("orders"), "id").is_empty());
    assert_eq!(ints(rows[1].field("orders"), "id"), vec![11, 10]);
    assert_eq!(ints(rows[2].field("orders"), "id"), vec![12]);
}

#[test]
fn statement_count_does_not_scale_with_parents() {
    let builder = ExpressionBuilder::default();
    let query = customers_with_orders();
    let compiled = builder.build(&query).unwrap();
    assert_eq!(compiled.preamble_count(), 1);

    let small = scaled(3);
    let rows = run(&small, &builder, &query);
    assert_eq!(rows.len(), 3);
    let small_fetches = small.total_fetches();

    let large = scaled(30);
    let rows = run(&large, &builder, &query);
    assert_eq!(rows.len(), 30);
    assert_eq!(large.total_fetches(), small_fetches);
    assert_eq!(large.fetch_count("orders"), 1);
    assert_eq!(ints(rows[29].field("orders"), "id"), vec![130]);
}

#[test]
fn counting_children() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let orders = orders_of(&mut scope, &c);
    let query = Expr::table("customers").select(
        &c,
        Expr::record(
            "CustomerCount",
            [("name", c.expr().member("name", Ty::Text)), ("count", orders.count())],
        ),
    );

    let db = shop();
    let rows = run(&db, &ExpressionBuilder::default(), &query);
    let counts: Vec<i64> = rows
        .iter()
        .map(|row| row.field("count").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(counts, vec![0, 2, 1]);
    assert_eq!(db.fetch_count("orders"), 1);
}

#[test]
fn independent_detail_runs_once() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let query = Expr::table("customers").select(
        &c,
        Expr::record(
            "WithCatalog",
            [
                ("name", c.expr().member("name", Ty::Text)),
                (
                    "all",
                    Expr::table("orders").select(&o, o.expr().member("id", Ty::Int)),
                ),
            ],
        ),
    );

    let builder = ExpressionBuilder::default();
    let compiled = builder.build(&query).unwrap();
    assert_eq!(compiled.preamble_count(), 1);
    assert!(compiled.preambles().iter().all(|preamble| preamble.kind().as_str() == "detached"));

    let db = shop();
    let rows = run(&db, &builder, &query);
    for row in &rows {
        assert_eq!(ints(row.field("all"), "id"), vec![11, 10, 12]);
    }
    assert_eq!(db.fetch_count("orders"), 1);
}

#[test]
fn paging_is_replayed_per_parent() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let top = orders_of(&mut scope, &c)
        .order_by_desc(&o, o.expr().member("total", Ty::Int))
        .take(1)
        .select(&o, o.expr().member("id", Ty::Int));
    let query = Expr::table("customers").select(
        &c,
        Expr::record("TopOrder", [("top", top)]),
    );

    let db = shop();
    let rows = run(&db, &ExpressionBuilder::default(), &query);
    assert!(ints(rows[0].field("top"), "id").is_empty());
    assert_eq!(ints(rows[1].field("top"), "id"), vec![11]);
    assert_eq!(ints(rows[2].field("top"), "id"), vec![12]);
}

#[test]
fn associations_nest_through_levels() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let l = scope.param("l", Ty::entity("lines"));
    let orders = c.expr().member("orders", Ty::seq(Ty::entity("orders")));
    let lines = o.expr().member("lines", Ty::seq(Ty::entity("lines")));
    let query = Expr::table("customers").select(
        &c,
        Expr::record(
            "CustomerView",
            [
                ("name", c.expr().member("name", Ty::Text)),
                (
                    "orders",
                    orders.select(
                        &o,
                        Expr::record(
                            "OrderView",
                            [
                                ("id", o.expr().member("id", Ty::Int)),
                                ("skus", lines.select(&l, l.expr().member("sku", Ty::Text))),
                            ],
                        ),
                    ),
                ),
            ],
        ),
    );

    let builder = ExpressionBuilder::new(mapping());
    let compiled = builder.build(&query).unwrap();
    assert_eq!(compiled.preamble_count(), 1);
    assert_eq!(compiled.tables(), &["customers"]);

    let db = shop();
    let rows = run(&db, &builder, &query);
    let bob = rows[1].field("orders").and_then(Value::as_list).unwrap();
    assert_eq!(bob.len(), 2);
    let skus = |order: &Value| -> Vec<String> {
        order
            .field("skus")
            .and_then(Value::as_list)
            .unwrap()
            .iter()
            .filter_map(|sku| sku.as_str().map(str::to_owned))
            .collect()
    };
    assert_eq!(bob[0].field("id"), Some(&Value::Int(11)));
    assert!(skus(&bob[0]).is_empty());
    assert_eq!(bob[1].field("id"), Some(&Value::Int(10)));
    assert_eq!(skus(&bob[1]), vec!["a", "b"]);

    let cy = rows[2].field("orders").and_then(Value::as_list).unwrap();
    assert_eq!(skus(&cy[0]), vec!["c"]);
    assert_eq!(db.fetch_count("lines"), 1);
}

#[test]
fn sibling_details_load_independently() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let big = orders_of(&mut scope, &c).filter(&o, o.expr().member("total", Ty::Int).greater(Expr::constant(4)));
    let query = Expr::table("customers").select(
        &c,
        Expr::record(
            "CustomerView",
            [("orders", orders_of(&mut scope, &c)), ("big", big)],
        ),
    );

    let builder = ExpressionBuilder::default();
    let compiled = builder.build(&query).unwrap();
    assert_eq!(compiled.preamble_count(), 2);

    let db = shop();
    let rows = run(&db, &builder, &query);
    assert_eq!(ints(rows[1].field("orders"), "id"), vec![11, 10]);
    assert_eq!(ints(rows[2].field("orders"), "id"), vec![12]);
    assert!(ints(rows[0].field("big"), "id").is_empty());
    assert_eq!(ints(rows[1].field("big"), "id"), vec![11, 10]);
    assert!(ints(rows[2].field("big"), "id").is_empty());
    assert_eq!(db.fetch_count("orders"), 2);
}

#[test]
fn group_join_loads_like_a_filtered_detail() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let o = scope.param("o", Ty::entity("orders"));
    let v = scope.param("v", Ty::entity("customers"));
    let group = scope.param("group", Ty::seq(Ty::entity("orders")));
    let x = scope.param("x", Ty::entity("orders"));
    let query = Expr::table("customers").group_join(
        Expr::table("orders"),
        (&c, c.expr().member("id", Ty::Int)),
        (&o, o.expr().member("customer_id", Ty::Int)),
        (&v, &group),
        Expr::record(
            "CustomerOrders",
            [
                ("name", v.expr().member("name", Ty::Text)),
                ("orders", group.expr().select(&x, x.expr().member("id", Ty::Int))),
                ("count", group.expr().count()),
            ],
        ),
    );

    let builder = ExpressionBuilder::default();
    let compiled = builder.build(&query).unwrap();
    assert_eq!(compiled.preamble_count(), 2);
    assert_eq!(compiled.tables(), &["customers"]);

    let db = shop();
    let rows = run(&db, &builder, &query);
    assert!(ints(rows[0].field("orders"), "id").is_empty());
    assert_eq!(ints(rows[1].field("orders"), "id"), vec![11, 10]);
    assert_eq!(ints(rows[2].field("orders"), "id"), vec![12]);
    let counts: Vec<i64> = rows
        .iter()
        .map(|row| row.field("count").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(counts, vec![0, 2, 1]);
}

#[test]
fn queries_without_details_are_untouched() {
    let mut scope = Scope::new();
    let c = scope.param("c", Ty::entity("customers"));
    let query = Expr::table("customers")
        .filter(&c, orders_of(&mut scope, &c).any())
        .select(&c, c.expr().member("name", Ty::Text));

    let db = shop();
    let rows = run(&db, &ExpressionBuilder::default(), &query);
    assert_eq!(rows, vec![Value::from("bob"), Value::from("cy")]);
}
