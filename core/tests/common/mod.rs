#![allow(dead_code)]

use graft_core::prelude::*;
use graft_core::provider::memory::MemoryDatabase;
use std::sync::Arc;

pub fn mapping() -> MappingSchema {
    MappingSchema::new()
        .with_entity(
            EntityDescriptor::new("customers")
                .column("id", Ty::Int)
                .column("name", Ty::Text)
                .primary_key(["id"])
                .association(AssociationDescriptor::new("orders", "orders").on("id", "customer_id")),
        )
        .with_entity(
            EntityDescriptor::new("orders")
                .column("id", Ty::Int)
                .column("customer_id", Ty::Int)
                .column("total", Ty::Int)
                .primary_key(["id"])
                .association(AssociationDescriptor::new("lines", "lines").on("id", "order_id")),
        )
        .with_entity(
            EntityDescriptor::new("lines")
                .column("id", Ty::Int)
                .column("order_id", Ty::Int)
                .column("sku", Ty::Text)
                .primary_key(["id"]),
        )
}

fn create_tables(db: &MemoryDatabase) {
    db.create_table("customers", &[("id", "INTEGER"), ("name", "TEXT")]);
    db.create_table(
        "orders",
        &[("id", "INTEGER"), ("customer_id", "INTEGER"), ("total", "INTEGER")],
    );
    db.create_table("lines", &[("id", "INTEGER"), ("order_id", "INTEGER"), ("sku", "TEXT")]);
}

/// ada has no orders, bob has orders 11 and 10 (in that order), cy has 12.
/// Order 10 has lines a and b, order 12 has line c.
pub fn shop() -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    create_tables(&db);
    for (id, name) in [(1, "ada"), (2, "bob"), (3, "cy")] {
        db.insert("customers", vec![Value::Int(id), Value::from(name)])
            .unwrap();
    }
    for (id, customer, total) in [(11, 2, 7), (10, 2, 5), (12, 3, 3)] {
        db.insert("orders", vec![Value::Int(id), Value::Int(customer), Value::Int(total)])
            .unwrap();
    }
    for (id, order, sku) in [(100, 10, "a"), (101, 10, "b"), (102, 12, "c")] {
        db.insert("lines", vec![Value::Int(id), Value::Int(order), Value::from(sku)])
            .unwrap();
    }
    db
}

/// `count` customers with one order each.
pub fn scaled(count: i64) -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    create_tables(&db);
    for id in 1..=count {
        db.insert("customers", vec![Value::Int(id), Value::from(format!("c{id}"))])
            .unwrap();
        db.insert("orders", vec![Value::Int(100 + id), Value::Int(id), Value::Int(id)])
            .unwrap();
    }
    db
}

/// `orders.Where(o => o.customer_id == customer.id)`
pub fn orders_of(scope: &mut Scope, customer: &Param) -> ExprRef {
    let o = scope.param("o", Ty::entity("orders"));
    Expr::table("orders").filter(
        &o,
        o.expr()
            .member("customer_id", Ty::Int)
            .equals(customer.expr().member("id", Ty::Int)),
    )
}

pub fn ints(value: Option<&Value>, field: &str) -> Vec<i64> {
    value
        .and_then(Value::as_list)
        .expect("list field")
        .iter()
        .map(|item| match item.field(field) {
            Some(inner) => inner.as_i64().expect("int field"),
            None => item.as_i64().expect("int item"),
        })
        .collect()
}
