//! Detail query planning.
//!
//! Given a main query and one detail collection inside its projection, the
//! planner picks how the detail is loaded:
//!
//! - **detached**: the detail reads nothing from its parent row, so it runs
//!   once and every parent sees the same list;
//! - **correlated**: parents are tagged with a key over the values the detail
//!   reads from them, one `(key, child)` envelope query loads the children of
//!   every distinct key, and the main projection looks its children up by
//!   key.
//!
//! Operators that cannot be re-entered per parent inside a batched query
//! (ordering, paging, reducers, aggregates) are cut off the detail first and
//! replayed on each parent's list after lookup.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::builder::ExpressionBuilder;
use crate::deps::{Dependencies, collect_dependencies};
use crate::error::{GraftError, Result};
use crate::expr::visit::{
    contains_node, find_containing_lambda, free_params, make_copy, replace_node, substitute, transform,
};
use crate::expr::{Expr, ExprExt, ExprRef, KeyedKind, Lambda, Method, Param, ParamId, Part, Scope, Ty};
use crate::key::{key_component_paths, key_components, synthesize_key};
use crate::preamble::{Preamble, PreambleRegistry};
use crate::remap::{ReplaceInfo, apply_remapping};
use crate::value::Value;
use crate::graft_profile_scope;

/// A detail split into the part loaded in batch and the part replayed per
/// parent.
#[derive(Debug, Clone)]
pub struct Truncation {
    /// The sequence loaded for all parents at once.
    pub batched: ExprRef,
    /// Operators cut from the detail, applied to `param` (a parent's list).
    pub replay: Option<(Param, ExprRef)>,
}

/// One correlation key component.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// The value read from the parent, as it appears in the detail.
    pub original: ExprRef,
    /// Read of the component out of the envelope query's key parameter.
    pub for_select: ExprRef,
    /// The component as evaluated at the lookup site in the main query.
    pub for_compilation: ExprRef,
}

/// Outcome of planning one detail.
#[derive(Debug, Clone)]
pub struct DetailPlan {
    /// Preamble slot registered for the detail.
    pub slot: usize,
    /// Correlation key components; empty when the detail is detached.
    pub keys: Vec<KeyInfo>,
    /// Expression to splice in place of the detail.
    pub replacement: ExprRef,
}

impl DetailPlan {
    pub fn is_detached(&self) -> bool {
        self.keys.is_empty()
    }
}

fn strip_converts(expr: &ExprRef) -> &ExprRef {
    let mut current = expr;
    while let Expr::Convert { operand, .. } = &**current {
        current = operand;
    }
    current
}

fn with_source(call: &ExprRef, source: ExprRef) -> ExprRef {
    match &**call {
        Expr::Call { method, args } => {
            let mut args = args.clone();
            if let Some(first) = args.first_mut() {
                *first = source;
            }
            Arc::new(Expr::Call {
                method: *method,
                args,
            })
        }
        _ => call.clone(),
    }
}

/// Move a reducer's predicate or an aggregate's selector into its own
/// `Where`/`Select` so the reducer itself reads nothing from the parent.
fn split_terminal(detail: &ExprRef) -> ExprRef {
    let Expr::Call { method, args } = &**detail else {
        return detail.clone();
    };
    let (Some(source), Some(lambda)) = (args.first(), args.get(1)) else {
        return detail.clone();
    };
    if lambda.as_lambda().is_none() {
        return detail.clone();
    }
    let inner = match method {
        m if m.is_element_reducer() || matches!(m, Method::Any | Method::Count) => {
            Expr::call_unchecked(Method::Where, [source.clone(), lambda.clone()])
        }
        Method::Sum | Method::Min | Method::Max | Method::Average => {
            Expr::call_unchecked(Method::Select, [source.clone(), lambda.clone()])
        }
        _ => return detail.clone(),
    };
    Expr::call_unchecked(*method, [inner])
}

/// Cut non-re-enterable operators off `detail`.
///
/// The cut is made at the innermost non-batchable operator such that no
/// operator from there outward reads a parameter from outside the detail.
pub fn truncate(detail: &ExprRef, scope: &mut Scope) -> Truncation {
    let detail = split_terminal(detail);
    let external: HashSet<ParamId> = free_params(&detail).iter().map(|p| p.id).collect();

    let mut links: Vec<ExprRef> = Vec::new();
    let mut current = detail.clone();
    while let Expr::Call { args, .. } = &*current {
        let Some(source) = args.first().cloned() else {
            break;
        };
        links.push(current.clone());
        current = source;
    }

    let reads_outside = |link: &ExprRef| {
        link.call_args().is_some_and(|args| {
            args.iter()
                .skip(1)
                .any(|arg| free_params(arg).iter().any(|p| external.contains(&p.id)))
        })
    };
    let clean = links
        .iter()
        .position(reads_outside)
        .unwrap_or(links.len());
    let cut = (0..clean).rev().find(|&index| {
        links[index]
            .method()
            .is_some_and(|method| !method.signature().batchable)
    });

    let Some(cut) = cut else {
        return Truncation {
            batched: detail,
            replay: None,
        };
    };
    let batched = links[cut]
        .call_args()
        .and_then(|args| args.first().cloned())
        .unwrap_or_else(|| detail.clone());
    let batch = scope.param("batch", batched.ty());
    let mut replay = batch.expr();
    for link in links[..=cut].iter().rev() {
        replay = with_source(link, replay);
    }
    Truncation {
        batched,
        replay: Some((batch, replay)),
    }
}

fn chain_source(expr: &ExprRef) -> &ExprRef {
    let mut current = expr;
    while let Some(source) = current.call_args().and_then(|args| args.first()) {
        current = source;
    }
    current
}

fn is_grouping_rooted(batched: &ExprRef) -> bool {
    let root = chain_source(batched);
    if root.ty().is_grouping() {
        return true;
    }
    matches!(&**root, Expr::Part { object, part: Part::Data } if object.ty().is_grouping())
}

/// Plan `detail`, a node of `main`, registering its preamble.
///
/// Returns `None` for details that are evaluated inline instead.
pub fn plan_detail(
    builder: &ExpressionBuilder,
    main: &ExprRef,
    detail: &ExprRef,
    scope: &mut Scope,
    preambles: &mut PreambleRegistry,
) -> Result<Option<DetailPlan>> {
    graft_profile_scope!("planner", "plan_detail");
    let search_root = strip_converts(detail);
    let Truncation { batched, replay } = truncate(search_root, scope);
    if is_grouping_rooted(&batched) {
        return Ok(None);
    }

    let deps = collect_dependencies(&batched);
    let (slot, keys, lookup) = if deps.is_empty() {
        plan_detached(builder, &batched, scope, preambles)?
    } else {
        plan_correlated(builder, main, search_root, &batched, &deps, scope, preambles)?
    };

    let lookup = match replay {
        Some((batch, replay)) => {
            let mut map = HashMap::new();
            map.insert(batch.id, lookup);
            substitute(&replay, &map)
        }
        None => lookup,
    };
    let replacement = if Arc::ptr_eq(search_root, detail) {
        lookup
    } else {
        replace_node(detail, search_root, &lookup)
    };
    Ok(Some(DetailPlan {
        slot,
        keys,
        replacement,
    }))
}

fn plan_detached(
    builder: &ExpressionBuilder,
    batched: &ExprRef,
    scope: &mut Scope,
    preambles: &mut PreambleRegistry,
) -> Result<(usize, Vec<KeyInfo>, ExprRef)> {
    let ty = batched.ty();
    let compiled = builder.build_in(batched, scope)?;
    let slot = preambles.register(Preamble::detached(compiled));
    Ok((slot, Vec::new(), Expr::preamble(slot, None, ty)))
}

/// Key components in insertion order, deduplicated structurally.
#[derive(Default)]
struct Components {
    /// `(original, as evaluated at the lookup site)`
    items: Vec<(ExprRef, ExprRef)>,
}

impl Components {
    fn push(&mut self, original: ExprRef, compiled: ExprRef) {
        if !self.items.iter().any(|(_, existing)| **existing == *compiled) {
            self.items.push((original, compiled));
        }
    }

    fn compiled(&self) -> Vec<ExprRef> {
        self.items.iter().map(|(_, compiled)| compiled.clone()).collect()
    }
}

/// Components of the envelope key a nested envelope query was built with.
fn previous_envelope_key(main: &ExprRef, search_root: &ExprRef) -> Option<Vec<(ExprRef, ExprRef)>> {
    let Expr::Call {
        method: Method::SelectMany,
        args,
    } = &**main
    else {
        return None;
    };
    let collection = args.get(1)?.as_lambda()?;
    let result = args.get(2)?.as_lambda()?;
    let Expr::Keyed {
        kind: KeyedKind::Envelope { width },
        key,
        ..
    } = &*result.body
    else {
        return None;
    };
    if !contains_node(&collection.body, search_root) {
        return None;
    }
    let (from, to) = (result.params.first()?, collection.params.first()?);
    let mut rebind = HashMap::new();
    rebind.insert(from.id, to.expr());
    Some(
        key_components(key, *width)
            .into_iter()
            .map(|component| {
                let compiled = substitute(&component, &rebind);
                (component, compiled)
            })
            .collect(),
    )
}

fn replace_components(expr: &ExprRef, components: &[ExprRef], paths: &[ExprRef]) -> ExprRef {
    transform(expr, &mut |node| {
        components
            .iter()
            .position(|component| **component == **node)
            .map(|index| paths[index].clone())
    })
}

fn strip_reducers(expr: &ExprRef) -> ExprRef {
    let mut current = expr.clone();
    loop {
        let next = match &*current {
            Expr::Call { method, args } if method.is_element_reducer() || method.is_aggregate() => {
                args.first().cloned()
            }
            _ => None,
        };
        match next {
            Some(source) => current = source,
            None => return current,
        }
    }
}

/// Drop ordering from a parent chain where nothing above depends on it.
fn strip_ordering(expr: &ExprRef) -> ExprRef {
    match &**expr {
        Expr::Call { method, args } if method.is_ordering() => match args.first() {
            Some(source) => strip_ordering(source),
            None => expr.clone(),
        },
        Expr::Call { method, .. }
            if matches!(method, Method::Skip | Method::Take) || method.is_element_reducer() =>
        {
            expr.clone()
        }
        Expr::Call { args, .. } => match args.first() {
            Some(source) => {
                let stripped = strip_ordering(source);
                if Arc::ptr_eq(&stripped, source) {
                    expr.clone()
                } else {
                    with_source(expr, stripped)
                }
            }
            None => expr.clone(),
        },
        _ => expr.clone(),
    }
}

fn plan_correlated(
    builder: &ExpressionBuilder,
    main: &ExprRef,
    search_root: &ExprRef,
    batched: &ExprRef,
    deps: &Dependencies,
    scope: &mut Scope,
    preambles: &mut PreambleRegistry,
) -> Result<(usize, Vec<KeyInfo>, ExprRef)> {
    let lambda = find_containing_lambda(main, search_root).ok_or_else(|| {
        GraftError::unsupported("correlated detail collection outside of a projection lambda")
    })?;
    let target: &Lambda = lambda
        .as_lambda()
        .ok_or_else(|| GraftError::unsupported("containing node is not a lambda"))?;

    let mut components = Components::default();
    for expr in &deps.exprs {
        if !expr.ty().is_seq() {
            components.push(expr.clone(), expr.clone());
        }
    }
    for param in &deps.params {
        let Some(entity) = param.ty.entity_name() else {
            continue;
        };
        match builder.mapping().entity(entity) {
            Some(descriptor) if !descriptor.primary_key.is_empty() => {
                for member in descriptor.key_members(&param.expr()) {
                    components.push(member.clone(), member);
                }
            }
            _ => components.push(param.expr(), param.expr()),
        }
    }
    if let Some(previous) = previous_envelope_key(main, search_root) {
        for (original, compiled) in previous {
            components.push(original, compiled);
        }
    }
    if components.items.is_empty() {
        let zero = Expr::constant(0i64);
        components.push(zero.clone(), zero);
    }

    // Whatever the detail still reads from outside after substitution joins
    // the key as a whole parameter.
    let (kdr, corrected, paths) = loop {
        let compiled = components.compiled();
        let kdr = scope.param("kdr", synthesize_key(&compiled)?.ty());
        let paths = key_component_paths(&kdr.expr(), compiled.len());
        let corrected = replace_components(batched, &compiled, &paths);
        let leftover: SmallVec<[Param; 2]> = free_params(&corrected)
            .into_iter()
            .filter(|p| p.id != kdr.id)
            .collect();
        if leftover.is_empty() {
            break (kdr, corrected, paths);
        }
        for param in leftover {
            components.push(param.expr(), param.expr());
        }
    };
    let compiled = components.compiled();
    let keys: Vec<KeyInfo> = components
        .items
        .iter()
        .zip(paths)
        .map(|((original, for_compilation), for_select)| KeyInfo {
            original: original.clone(),
            for_select,
            for_compilation: for_compilation.clone(),
        })
        .collect();

    let detail_element = corrected.ty().element().cloned().ok_or_else(|| {
        GraftError::unsupported("correlated detail does not produce a sequence")
    })?;
    let detail = make_copy(&corrected, scope);

    let pruned = builder.prune_details(main, search_root);
    let mut info = ReplaceInfo::new(target, compiled.clone());
    let tagged = apply_remapping(&pruned, &mut info, scope, true)?;
    if !info.applied() {
        return Err(GraftError::unsupported(
            "parent rows of the detail collection could not be key-tagged",
        ));
    }

    let parents = strip_ordering(&strip_reducers(&tagged));
    let parent_ty = parents.ty();
    let carrier = parent_ty.element().cloned().unwrap_or_default();
    let Some((key_ty, _)) = carrier.as_keyed() else {
        return Err(GraftError::unsupported(format!(
            "key-tagged parent query yields {carrier:?} rows"
        )));
    };
    let row = scope.param("row", carrier.clone());
    let row_key = Expr::part(row.expr(), Part::Key);
    let distinct_keys = if key_ty.is_seq() {
        parents.select_many(&row, row_key)
    } else {
        parents.select(&row, row_key)
    }
    .distinct();

    let m = scope.param("m", kdr.ty.clone());
    let d = scope.param("d", detail_element.clone());
    let envelopes = distinct_keys.select_many_with(
        &kdr,
        detail,
        (&m, &d),
        Expr::keyed(
            KeyedKind::Envelope {
                width: compiled.len(),
            },
            m.expr(),
            d.expr(),
        ),
    );

    let nested = builder.build_in(&envelopes, scope)?;
    let slot = preambles.register(Preamble::correlated(nested));

    let lookup = Expr::preamble(slot, Some(synthesize_key(&compiled)?), Ty::seq(detail_element));
    Ok((slot, keys, lookup))
}

/// Placeholder standing in for a pruned detail.
pub(crate) fn placeholder(detail: &ExprRef) -> ExprRef {
    match detail.ty() {
        Ty::Seq(element) => Expr::empty_seq((*element).clone()),
        ty => Expr::typed_constant(Value::Null, ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Env, Evaluator};

    fn orders_of(scope: &mut Scope, customer: &Param) -> ExprRef {
        let o = scope.param("o", Ty::entity("orders"));
        Expr::table("orders").filter(
            &o,
            o.expr()
                .member("customer_id", Ty::Int)
                .equals(customer.expr().member("id", Ty::Int)),
        )
    }

    #[test]
    fn truncates_at_innermost_non_batchable_operator() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let o = scope.param("o", Ty::entity("orders"));
        let filtered = orders_of(&mut scope, &c);
        let detail = filtered
            .order_by(&o, o.expr().member("total", Ty::Int))
            .take(2);

        let Truncation { batched, replay } = truncate(&detail, &mut scope);
        assert!(Arc::ptr_eq(&batched, &filtered));
        let (batch, replay) = replay.unwrap();
        assert_eq!(replay.method(), Some(Method::Take));
        assert_eq!(chain_source(&replay).as_param().map(|p| p.id), Some(batch.id));
    }

    #[test]
    fn correlated_paging_is_not_cut() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let filtered = orders_of(&mut scope, &c);
        let detail = Expr::call_unchecked(
            Method::Take,
            [filtered, c.expr().member("limit", Ty::Int)],
        );
        let truncation = truncate(&detail, &mut scope);
        assert!(truncation.replay.is_none());
        assert!(Arc::ptr_eq(&truncation.batched, &detail));
    }

    #[test]
    fn counting_predicate_moves_into_batch() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let o = scope.param("o", Ty::entity("orders"));
        let detail = Expr::call_unchecked(
            Method::Count,
            [
                Expr::table("orders"),
                Expr::lambda(
                    [o.clone()],
                    o.expr()
                        .member("customer_id", Ty::Int)
                        .equals(c.expr().member("id", Ty::Int)),
                ),
            ],
        );
        let Truncation { batched, replay } = truncate(&detail, &mut scope);
        assert_eq!(batched.method(), Some(Method::Where));
        assert_eq!(replay.unwrap().1.method(), Some(Method::Count));
    }

    #[test]
    fn wide_keys_line_up_per_component() {
        let mut scope = Scope::new();
        let params: Vec<Param> = (0..8).map(|i| scope.param(format!("p{i}"), Ty::Int)).collect();
        let o = scope.param("o", Ty::entity("orders"));
        let predicate = params
            .iter()
            .enumerate()
            .map(|(i, p)| o.expr().member(&format!("f{i}"), Ty::Int).equals(p.expr()))
            .reduce(|all, next| all.and(next))
            .unwrap();
        let detail = Expr::table("orders").filter(&o, predicate);
        let main = Expr::call_unchecked(
            Method::Select,
            [
                Expr::table("customers"),
                Expr::lambda(params.clone(), Expr::record("View", [("orders", detail.clone())])),
            ],
        );

        let mut preambles = PreambleRegistry::new();
        let plan = plan_detail(&ExpressionBuilder::default(), &main, &detail, &mut scope, &mut preambles)
            .unwrap()
            .unwrap();
        assert!(!plan.is_detached());
        assert_eq!(plan.slot, 0);
        assert_eq!(preambles.len(), 1);
        assert_eq!(plan.keys.len(), 8);

        let Expr::Param(kdr) = &**crate::deps::chain_root(&plan.keys[0].for_select) else {
            panic!("key reads are rooted at the key parameter");
        };
        let values: Vec<Value> = (0..8).map(|i| Value::Int(i * 10)).collect();
        let key = crate::key::compose_key(&values).unwrap();
        let root = Env::root();
        let env = root.bind(kdr.id, key);
        for (i, (info, param)) in plan.keys.iter().zip(&params).enumerate() {
            assert_eq!(*info.original, *param.expr());
            assert_eq!(*info.for_compilation, *param.expr());
            let read = Evaluator::detached().eval(&info.for_select, &env).unwrap();
            assert_eq!(read, values[i], "component {i}");
        }
        assert!(matches!(
            &*plan.keys[7].for_select,
            Expr::KeyItem { key, index: 1 } if matches!(&**key, Expr::KeyItem { index: 6, .. })
        ));
    }

    #[test]
    fn independent_detail_has_no_keys() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let detail = Expr::table("orders");
        let main = Expr::table("customers").select(&c, Expr::record("View", [("all", detail.clone())]));
        let mut preambles = PreambleRegistry::new();
        let plan = plan_detail(&ExpressionBuilder::default(), &main, &detail, &mut scope, &mut preambles)
            .unwrap()
            .unwrap();
        assert!(plan.is_detached());
        assert!(plan.keys.is_empty());
        assert!(matches!(&*plan.replacement, Expr::Preamble { slot: 0, key: None, .. }));
    }

    #[test]
    fn ordering_under_paging_is_kept() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let ordered = Expr::table("customers").order_by(&c, c.expr().member("name", Ty::Text));
        let paged = ordered.take(2);
        assert!(Arc::ptr_eq(&strip_ordering(&paged), &paged));
        let stripped = strip_ordering(&ordered.distinct());
        assert_eq!(&**chain_source(&stripped), &Expr::Table { name: "customers".into() });
        assert_eq!(stripped.method(), Some(Method::Distinct));
    }
}
