//! Query compilation with eager-loaded detail collections.
//!
//! [`ExpressionBuilder::build`] turns a query whose projection contains
//! detail collections into a [`CompiledQuery`]: association members are
//! expanded into child queries, then every detail is planned in turn and
//! replaced by a read of its preamble slot. Detail queries are themselves
//! built the same way, so each nesting level carries its own preambles.

use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::eager::{placeholder, plan_detail};
use crate::error::Result;
use crate::exec::CompiledQuery;
use crate::expr::visit::{contains_node, find, replace_node, substitute, transform};
use crate::expr::{BinaryOp, Expr, ExprExt, ExprRef, Method, Scope};
use crate::{graft_profile_scope, graft_trace_plan};
use crate::mapping::MappingSchema;
use crate::preamble::PreambleRegistry;

#[derive(Debug, Clone, Default)]
pub struct ExpressionBuilder {
    mapping: Arc<MappingSchema>,
}

impl ExpressionBuilder {
    pub fn new(mapping: impl Into<Arc<MappingSchema>>) -> Self {
        Self {
            mapping: mapping.into(),
        }
    }

    pub fn mapping(&self) -> &MappingSchema {
        &self.mapping
    }

    /// Compile `query`, planning every detail collection in its projection.
    pub fn build(&self, query: &ExprRef) -> Result<CompiledQuery> {
        let mut scope = Scope::after(query);
        self.build_in(query, &mut scope)
    }

    pub(crate) fn build_in(&self, query: &ExprRef, scope: &mut Scope) -> Result<CompiledQuery> {
        graft_profile_scope!("builder", "build");
        let mut current = self.expand_associations(query, scope);
        let mut preambles = PreambleRegistry::new();
        let mut inline: Vec<ExprRef> = Vec::new();

        while let Some(detail) = next_detail(&current, &inline) {
            match plan_detail(self, &current, &detail, scope, &mut preambles)? {
                Some(plan) => {
                    let mode = if plan.is_detached() { "detached" } else { "correlated" };
                    graft_trace_plan!(mode, plan.slot, plan.keys.len());
                    current = replace_node(&current, &detail, &plan.replacement);
                }
                None => inline.push(detail),
            }
        }
        Ok(CompiledQuery::new(current, preambles))
    }

    /// Replace association member reads with the child queries they stand for,
    /// and group joins with projections over filtered inner queries.
    fn expand_associations(&self, query: &ExprRef, scope: &mut Scope) -> ExprRef {
        let query = inline_group_joins(query, scope);
        if self.mapping.is_empty() {
            return query;
        }
        transform(&query, &mut |node| match &**node {
            Expr::Member { object, field, ty } if ty.is_seq() => {
                self.mapping.expand_association(object, field, scope)
            }
            _ => None,
        })
    }

    /// `main` with every detail collection and every read of an already
    /// planned slot replaced by an empty placeholder, except the details
    /// enclosing `keep`.
    pub(crate) fn prune_details(&self, main: &ExprRef, keep: &ExprRef) -> ExprRef {
        let candidates = detail_candidates(main);
        transform(main, &mut |node| {
            if matches!(&**node, Expr::Preamble { .. }) {
                return Some(placeholder(node));
            }
            if !candidates.iter().any(|candidate| Arc::ptr_eq(candidate, node)) {
                return None;
            }
            if !Arc::ptr_eq(node, keep) && contains_node(node, keep) {
                return None;
            }
            Some(placeholder(node))
        })
    }
}

// =============================================================================
// Group joins
// =============================================================================

/// Rewrite every `GroupJoin` as a `Select` over the outer sequence whose
/// group argument is the inner sequence filtered by key equality.
fn inline_group_joins(query: &ExprRef, scope: &mut Scope) -> ExprRef {
    transform(query, &mut |node| {
        let Expr::Call {
            method: Method::GroupJoin,
            args,
        } = &**node
        else {
            return None;
        };
        let args: SmallVec<[ExprRef; 5]> = args
            .iter()
            .map(|arg| inline_group_joins(arg, scope))
            .collect();
        group_join_as_select(&args, scope)
    })
}

fn group_join_as_select(args: &[ExprRef], scope: &mut Scope) -> Option<ExprRef> {
    let [outer, inner, outer_key, inner_key, result] = args else {
        return None;
    };
    let (outer_key, inner_key, result) = (
        outer_key.as_lambda()?,
        inner_key.as_lambda()?,
        result.as_lambda()?,
    );
    let (outer_param, group_param) = match result.params.as_slice() {
        [outer_param, group_param] => (outer_param, group_param),
        _ => return None,
    };
    let inner_param = inner_key.params.first()?;
    let outer_key_param = outer_key.params.first()?;

    let detail_param = scope.param(inner_param.name.clone(), inner_param.ty.clone());
    let mut map = HashMap::new();
    map.insert(inner_param.id, detail_param.expr());
    let inner_body = substitute(&inner_key.body, &map);
    map.clear();
    map.insert(outer_key_param.id, outer_param.expr());
    let outer_body = substitute(&outer_key.body, &map);

    let filtered = inner.filter(&detail_param, key_equality(&inner_body, &outer_body));
    map.clear();
    map.insert(group_param.id, filtered);
    let body = substitute(&result.body, &map);
    Some(outer.select(outer_param, body))
}

/// Equality of two join keys; record keys compare field by field.
fn key_equality(inner: &ExprRef, outer: &ExprRef) -> ExprRef {
    match (&**inner, &**outer) {
        (Expr::Record { fields: left, .. }, Expr::Record { fields: right, .. })
            if left.len() == right.len() && !left.is_empty() =>
        {
            left.iter()
                .zip(right.iter())
                .map(|((_, l), (_, r))| l.equals(r.clone()))
                .reduce(|all, next| Expr::binary(BinaryOp::And, all, next))
                .unwrap_or_else(|| inner.equals(outer.clone()))
        }
        _ => inner.equals(outer.clone()),
    }
}

// =============================================================================
// Detail search
// =============================================================================

/// A projected node that loads rows of its own.
fn is_detail(node: &ExprRef) -> bool {
    let shaped = match &**node {
        Expr::Constant { .. } | Expr::Param(_) | Expr::Lambda(_) | Expr::Preamble { .. } => false,
        Expr::Call { method, args } if method.is_element_reducer() || method.is_aggregate() => {
            args.first().is_some_and(|source| source.ty().is_seq())
        }
        _ => node.ty().is_seq(),
    };
    shaped && find(node, &mut |inner| matches!(&**inner, Expr::Table { .. })).is_some()
}

fn lambda_body(arg: Option<&ExprRef>) -> Option<&ExprRef> {
    arg.and_then(|arg| arg.as_lambda()).map(|lambda| &lambda.body)
}

/// First detail of `query` that has not been left inline.
fn next_detail(query: &ExprRef, inline: &[ExprRef]) -> Option<ExprRef> {
    detail_candidates(query)
        .into_iter()
        .find(|candidate| !inline.iter().any(|kept| Arc::ptr_eq(kept, candidate)))
}

/// Detail collections in projection positions, outer ones before the
/// details nested inside them.
pub(crate) fn detail_candidates(query: &ExprRef) -> Vec<ExprRef> {
    let mut out = Vec::new();
    visit_chain(query, &mut out);
    out
}

fn visit_chain(node: &ExprRef, out: &mut Vec<ExprRef>) {
    let Expr::Call { method, args } = &**node else {
        return;
    };
    if let Some(source) = args.first() {
        visit_chain(source, out);
    }
    match method {
        Method::Select => {
            if let Some(body) = lambda_body(args.get(1)) {
                visit_projection(body, out);
            }
        }
        Method::SelectMany => {
            if let Some(body) = lambda_body(args.get(1)) {
                visit_chain(body, out);
            }
            if let Some(body) = lambda_body(args.get(2)) {
                visit_projection(body, out);
            }
        }
        Method::GroupBy => {
            if let Some(body) = lambda_body(args.get(2)) {
                visit_projection(body, out);
            }
        }
        _ => {}
    }
}

fn visit_projection(node: &ExprRef, out: &mut Vec<ExprRef>) {
    if is_detail(node) {
        out.push(node.clone());
        visit_chain(node, out);
        return;
    }
    match &**node {
        Expr::Record { fields, .. } => {
            for (_, value) in fields {
                visit_projection(value, out);
            }
        }
        Expr::Keyed { data, .. } => visit_projection(data, out),
        Expr::Convert { operand, .. } | Expr::Unary { operand, .. } => visit_projection(operand, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExprExt, Ty};
    use crate::mapping::{AssociationDescriptor, EntityDescriptor};

    fn mapping() -> MappingSchema {
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
                    .primary_key(["id"]),
            )
    }

    #[test]
    fn finds_details_in_projection_only() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let o = scope.param("o", Ty::entity("orders"));
        let orders = Expr::table("orders").filter(
            &o,
            o.expr()
                .member("customer_id", Ty::Int)
                .equals(c.expr().member("id", Ty::Int)),
        );
        let query = Expr::table("customers")
            .filter(&c, orders.clone().any())
            .select(&c, Expr::record("View", [("orders", orders.clone())]));

        let found = detail_candidates(&query);
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&found[0], &orders));
    }

    #[test]
    fn builds_one_preamble_per_detail() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let query = Expr::table("customers").select(
            &c,
            Expr::record(
                "View",
                [
                    ("name", c.expr().member("name", Ty::Text)),
                    (
                        "orders",
                        c.expr().member("orders", Ty::seq(Ty::entity("orders"))),
                    ),
                    ("everything", Expr::table("orders")),
                ],
            ),
        );

        let compiled = ExpressionBuilder::new(mapping()).build(&query).unwrap();
        assert_eq!(compiled.preamble_count(), 2);
        assert_eq!(compiled.tables(), &["customers"]);
        assert!(detail_candidates(compiled.query()).is_empty());
    }

    #[test]
    fn plain_queries_compile_unchanged() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let query = Expr::table("customers").select(&c, c.expr().member("name", Ty::Text));
        let compiled = ExpressionBuilder::default().build(&query).unwrap();
        assert!(Arc::ptr_eq(compiled.query(), &query));
        assert_eq!(compiled.preamble_count(), 0);
    }
}
