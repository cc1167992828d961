//! Outer-scope dependency extraction.
//!
//! A detail expression depends on its surroundings through parameters it
//! does not bind itself. For every such parameter the first member chain
//! reaching it is recorded (`c.address.city` rather than `c.address`), or the
//! bare parameter when it is used directly. An empty result means the detail
//! can be loaded once for all parents.

use hashbrown::HashSet;
use std::sync::Arc;

use crate::expr::visit::{bound_params, walk};
use crate::expr::{Expr, ExprRef, Param, ParamId};

/// External references of an expression, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    /// Outermost member chains (or bare parameters) per external parameter.
    pub exprs: Vec<ExprRef>,
    /// The external parameters those chains are rooted at.
    pub params: Vec<Param>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

/// Object of a chain link, for nodes that read a member of another node.
pub(crate) fn chain_object(expr: &Expr) -> Option<&ExprRef> {
    match expr {
        Expr::Member { object, .. } | Expr::Part { object, .. } => Some(object),
        Expr::KeyItem { key, .. } => Some(key),
        _ => None,
    }
}

/// Root of a member chain.
pub(crate) fn chain_root(expr: &ExprRef) -> &ExprRef {
    let mut current = expr;
    while let Some(object) = chain_object(current) {
        current = object;
    }
    current
}

pub fn collect_dependencies(expr: &ExprRef) -> Dependencies {
    let bound: HashSet<ParamId> = bound_params(expr);
    let mut recorded: HashSet<ParamId> = HashSet::new();
    let mut chain_links: HashSet<*const Expr> = HashSet::new();
    let mut deps = Dependencies::default();

    walk(expr, &mut |node| {
        if chain_links.contains(&Arc::as_ptr(node)) {
            return true;
        }
        match &**node {
            Expr::Member { .. } | Expr::Part { .. } | Expr::KeyItem { .. } => {
                let mut current = node;
                while let Some(object) = chain_object(current) {
                    chain_links.insert(Arc::as_ptr(object));
                    current = object;
                }
                if let Expr::Param(param) = &**current
                    && !bound.contains(&param.id)
                    && recorded.insert(param.id)
                {
                    deps.exprs.push(node.clone());
                    deps.params.push(param.clone());
                }
            }
            Expr::Param(param) if !bound.contains(&param.id) && recorded.insert(param.id) => {
                deps.exprs.push(node.clone());
                deps.params.push(param.clone());
            }
            _ => {}
        }
        true
    });
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExprExt, Scope, Ty};

    #[test]
    fn records_outermost_chain_per_parameter() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let o = scope.param("o", Ty::entity("orders"));
        let city = c
            .expr()
            .member("address", Ty::record("Address"))
            .member("city", Ty::Text);
        let detail = Expr::table("orders").filter(
            &o,
            o.expr()
                .member("city", Ty::Text)
                .equals(city.clone())
                .and(o.expr().member("region", Ty::Text).equals(c.expr().member("region", Ty::Text))),
        );

        let deps = collect_dependencies(&detail);
        assert_eq!(deps.exprs.len(), 1);
        assert_eq!(deps.exprs[0], city);
        assert_eq!(deps.params, vec![c]);
    }

    #[test]
    fn bare_parameters_are_recorded() {
        let mut scope = Scope::new();
        let id = scope.param("id", Ty::Int);
        let o = scope.param("o", Ty::entity("orders"));
        let detail = Expr::table("orders")
            .filter(&o, o.expr().member("customer_id", Ty::Int).equals(id.expr()));
        let deps = collect_dependencies(&detail);
        assert_eq!(deps.params, vec![id.clone()]);
        assert_eq!(&*deps.exprs[0], &Expr::Param(id));
    }

    #[test]
    fn independent_detail_has_no_dependencies() {
        let mut scope = Scope::new();
        let o = scope.param("o", Ty::entity("orders"));
        let detail = Expr::table("orders")
            .filter(&o, o.expr().member("total", Ty::Int).greater(Expr::constant(5)));
        assert!(collect_dependencies(&detail).is_empty());
    }

    #[test]
    fn first_seen_order_across_parameters() {
        let mut scope = Scope::new();
        let a = scope.param("a", Ty::entity("customers"));
        let b = scope.param("b", Ty::entity("regions"));
        let o = scope.param("o", Ty::entity("orders"));
        let detail = Expr::table("orders").filter(
            &o,
            o.expr()
                .member("region_id", Ty::Int)
                .equals(b.expr().member("id", Ty::Int))
                .and(o.expr().member("customer_id", Ty::Int).equals(a.expr().member("id", Ty::Int))),
        );
        let deps = collect_dependencies(&detail);
        assert_eq!(deps.params, vec![b, a]);
    }
}
