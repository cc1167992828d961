//! Traversal and rewriting helpers over [`Expr`] trees.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::sync::Arc;

use super::{Expr, ExprRef, Lambda, Param, ParamId, Scope};
use crate::error::Result;

type Children<'a> = SmallVec<[&'a ExprRef; 4]>;

/// Direct sub-expressions, in a fixed order per node kind.
pub fn children(expr: &Expr) -> Children<'_> {
    let mut out = Children::new();
    match expr {
        Expr::Constant { .. } | Expr::Param(_) | Expr::Table { .. } => {}
        Expr::Member { object, .. } | Expr::Part { object, .. } => out.push(object),
        Expr::Lambda(lambda) => out.push(&lambda.body),
        Expr::Call { args, .. } => out.extend(args.iter()),
        Expr::Record { fields, .. } => out.extend(fields.iter().map(|(_, value)| value)),
        Expr::Key(items) => out.extend(items.iter()),
        Expr::KeyItem { key, .. } => out.push(key),
        Expr::Keyed { key, data, .. } => {
            out.push(key);
            out.push(data);
        }
        Expr::Convert { operand, .. } | Expr::Unary { operand, .. } => out.push(operand),
        Expr::Binary { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        Expr::Preamble { key, .. } => out.extend(key.iter()),
    }
    out
}

/// Rebuild `expr` with new children given in [`children`] order.
pub fn with_children(expr: &ExprRef, new: SmallVec<[ExprRef; 4]>) -> ExprRef {
    let mut new = new.into_iter();
    let mut next = |old: &ExprRef| new.next().unwrap_or_else(|| old.clone());
    let rebuilt = match &**expr {
        Expr::Constant { .. } | Expr::Param(_) | Expr::Table { .. } => return expr.clone(),
        Expr::Member { object, field, ty } => Expr::Member {
            object: next(object),
            field: field.clone(),
            ty: ty.clone(),
        },
        Expr::Part { object, part } => Expr::Part {
            object: next(object),
            part: *part,
        },
        Expr::Lambda(lambda) => Expr::Lambda(Lambda {
            params: lambda.params.clone(),
            body: next(&lambda.body),
        }),
        Expr::Call { method, args } => Expr::Call {
            method: *method,
            args: args.iter().map(&mut next).collect(),
        },
        Expr::Record { name, fields } => Expr::Record {
            name: name.clone(),
            fields: fields
                .iter()
                .map(|(field, value)| (field.clone(), next(value)))
                .collect(),
        },
        Expr::Key(items) => Expr::Key(items.iter().map(&mut next).collect()),
        Expr::KeyItem { key, index } => Expr::KeyItem {
            key: next(key),
            index: *index,
        },
        Expr::Keyed { kind, key, data } => Expr::Keyed {
            kind: *kind,
            key: next(key),
            data: next(data),
        },
        Expr::Convert { operand, ty } => Expr::Convert {
            operand: next(operand),
            ty: ty.clone(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: next(operand),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: next(left),
            right: next(right),
        },
        Expr::Preamble { slot, key, ty } => Expr::Preamble {
            slot: *slot,
            key: key.as_ref().map(&mut next),
            ty: ty.clone(),
        },
    };
    Arc::new(rebuilt)
}

/// Pre-order walk. Returning `false` from `f` skips the node's children.
pub fn walk(expr: &ExprRef, f: &mut impl FnMut(&ExprRef) -> bool) {
    if f(expr) {
        for child in children(expr) {
            walk(child, f);
        }
    }
}

/// First node in pre-order matching `predicate`.
pub fn find(expr: &ExprRef, predicate: &mut impl FnMut(&ExprRef) -> bool) -> Option<ExprRef> {
    if predicate(expr) {
        return Some(expr.clone());
    }
    children(expr)
        .into_iter()
        .find_map(|child| find(child, predicate))
}

/// Pre-order rewrite. When `f` returns a replacement the node's children are
/// not visited. Untouched subtrees keep their identity.
pub fn transform(expr: &ExprRef, f: &mut impl FnMut(&ExprRef) -> Option<ExprRef>) -> ExprRef {
    if let Some(replacement) = f(expr) {
        return replacement;
    }
    let old = children(expr);
    if old.is_empty() {
        return expr.clone();
    }
    let mut changed = false;
    let new: SmallVec<[ExprRef; 4]> = old
        .iter()
        .map(|child| {
            let updated = transform(child, f);
            changed |= !Arc::ptr_eq(&updated, child);
            updated
        })
        .collect();
    if changed {
        with_children(expr, new)
    } else {
        expr.clone()
    }
}

/// Fallible variant of [`transform`].
pub fn try_transform(
    expr: &ExprRef,
    f: &mut impl FnMut(&ExprRef) -> Result<Option<ExprRef>>,
) -> Result<ExprRef> {
    if let Some(replacement) = f(expr)? {
        return Ok(replacement);
    }
    let old = children(expr);
    if old.is_empty() {
        return Ok(expr.clone());
    }
    let mut changed = false;
    let mut new: SmallVec<[ExprRef; 4]> = SmallVec::with_capacity(old.len());
    for child in old.iter() {
        let updated = try_transform(child, f)?;
        changed |= !Arc::ptr_eq(&updated, child);
        new.push(updated);
    }
    Ok(if changed {
        with_children(expr, new)
    } else {
        expr.clone()
    })
}

/// Replace parameter references by id.
pub fn substitute(expr: &ExprRef, map: &HashMap<ParamId, ExprRef>) -> ExprRef {
    if map.is_empty() {
        return expr.clone();
    }
    transform(expr, &mut |node| match &**node {
        Expr::Param(param) => map.get(&param.id).cloned(),
        _ => None,
    })
}

/// Replace one node, identified by pointer, with `replacement`.
pub fn replace_node(expr: &ExprRef, target: &ExprRef, replacement: &ExprRef) -> ExprRef {
    transform(expr, &mut |node| {
        Arc::ptr_eq(node, target).then(|| replacement.clone())
    })
}

pub fn contains_node(expr: &ExprRef, target: &ExprRef) -> bool {
    find(expr, &mut |node| Arc::ptr_eq(node, target)).is_some()
}

pub fn max_param_id(expr: &ExprRef) -> Option<ParamId> {
    let mut max: Option<ParamId> = None;
    walk(expr, &mut |node| {
        let ids: SmallVec<[ParamId; 2]> = match &**node {
            Expr::Param(param) => SmallVec::from_elem(param.id, 1),
            Expr::Lambda(lambda) => lambda.params.iter().map(|p| p.id).collect(),
            _ => SmallVec::new(),
        };
        for id in ids {
            max = Some(max.map_or(id, |current| current.max(id)));
        }
        true
    });
    max
}

/// Ids of parameters bound by lambdas anywhere inside `expr`.
pub fn bound_params(expr: &ExprRef) -> HashSet<ParamId> {
    let mut bound = HashSet::new();
    walk(expr, &mut |node| {
        if let Expr::Lambda(lambda) = &**node {
            bound.extend(lambda.params.iter().map(|p| p.id));
        }
        true
    });
    bound
}

/// Parameters referenced in `expr` but not bound inside it, first-seen order.
pub fn free_params(expr: &ExprRef) -> Vec<Param> {
    let bound = bound_params(expr);
    let mut seen = HashSet::new();
    let mut free = Vec::new();
    walk(expr, &mut |node| {
        if let Expr::Param(param) = &**node
            && !bound.contains(&param.id)
            && seen.insert(param.id)
        {
            free.push(param.clone());
        }
        true
    });
    free
}

/// Innermost lambda under `root` whose body contains `target`.
pub fn find_containing_lambda(root: &ExprRef, target: &ExprRef) -> Option<ExprRef> {
    fn search(node: &ExprRef, target: &ExprRef) -> Option<ExprRef> {
        if Arc::ptr_eq(node, target) {
            return None;
        }
        for child in children(node) {
            if let Some(found) = search(child, target) {
                return Some(found);
            }
        }
        match &**node {
            Expr::Lambda(lambda) if contains_node(&lambda.body, target) => Some(node.clone()),
            _ => None,
        }
    }
    search(root, target)
}

/// Copy `expr` giving every lambda fresh parameters from `scope`.
pub fn make_copy(expr: &ExprRef, scope: &mut Scope) -> ExprRef {
    let mut renamed: HashMap<ParamId, ExprRef> = HashMap::new();
    walk(expr, &mut |node| {
        if let Expr::Lambda(lambda) = &**node {
            for param in &lambda.params {
                let fresh = scope.param(param.name.clone(), param.ty.clone());
                renamed.insert(param.id, fresh.expr());
            }
        }
        true
    });
    if renamed.is_empty() {
        return expr.clone();
    }
    transform_params(expr, &renamed)
}

fn transform_params(expr: &ExprRef, renamed: &HashMap<ParamId, ExprRef>) -> ExprRef {
    transform(expr, &mut |node| match &**node {
        Expr::Param(param) => renamed.get(&param.id).cloned(),
        Expr::Lambda(lambda) => {
            let params = lambda
                .params
                .iter()
                .map(|p| match renamed.get(&p.id).map(|e| &**e) {
                    Some(Expr::Param(fresh)) => fresh.clone(),
                    _ => p.clone(),
                })
                .collect();
            let body = transform_params(&lambda.body, renamed);
            Some(Arc::new(Expr::Lambda(Lambda { params, body })))
        }
        _ => None,
    })
}
