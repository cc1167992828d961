//! Parent-row key tagging (ApplyReMapping).
//!
//! The rewriter finds the lambda that produces parent rows and wraps its
//! result into a `Carrier(key, row)` pair. The wrapping changes the element
//! type flowing out of that call, so every lambda downstream of it is
//! retargeted: its parameter now receives the carrier, reads of the old
//! parameter go through `Part(carrier, Data)`, and result-producing lambdas
//! re-wrap their output with the carrier key so the tag survives to the end
//! of the chain.
//!
//! Only the first argument that changes within a call is remapped; the
//! arguments after it are retargeted instead.

use compact_str::CompactString;
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::{GraftError, Result};
use crate::expr::visit::substitute;
use crate::expr::{Expr, ExprExt, ExprRef, KeyedKind, Lambda, Method, Param, ParamId, Part, Scope, Ty};
use crate::key::synthesize_key;

/// What to wrap and with which key.
#[derive(Debug, Clone)]
pub struct ReplaceInfo {
    target: Lambda,
    keys: Vec<ExprRef>,
    rehomed: HashMap<ParamId, Param>,
    applied: bool,
}

impl ReplaceInfo {
    /// Wrap the result of `target` with a key over `keys`.
    pub fn new(target: &Lambda, keys: Vec<ExprRef>) -> Self {
        Self {
            target: target.clone(),
            keys,
            rehomed: HashMap::new(),
            applied: false,
        }
    }

    pub fn keys(&self) -> &[ExprRef] {
        &self.keys
    }

    /// Whether the target lambda was reached.
    pub fn applied(&self) -> bool {
        self.applied
    }

    /// Carrier-typed parameter that replaced `id` in a downstream lambda.
    pub fn rehomed(&self, id: ParamId) -> Option<&Param> {
        self.rehomed.get(&id)
    }
}

/// Rewrite `expr` so the rows produced by the target lambda carry their key.
///
/// `treat_as_queryable` marks positions where a sequence flows forward; a
/// sequence-valued target body there has each element wrapped instead of
/// the sequence as a whole. Already-wrapped targets are left untouched.
pub fn apply_remapping(
    expr: &ExprRef,
    info: &mut ReplaceInfo,
    scope: &mut Scope,
    treat_as_queryable: bool,
) -> Result<ExprRef> {
    match &**expr {
        Expr::Lambda(lambda) if lambda.same_as(&info.target) => {
            wrap_target(expr, lambda, info, scope, treat_as_queryable)
        }
        Expr::Lambda(lambda) => {
            let body = apply_remapping(&lambda.body, info, scope, treat_as_queryable)?;
            if Arc::ptr_eq(&body, &lambda.body) {
                return Ok(expr.clone());
            }
            Ok(Arc::new(Expr::Lambda(Lambda {
                params: lambda.params.clone(),
                body,
            })))
        }
        Expr::Call { method, args } => remap_call(expr, *method, args, info, scope),
        Expr::Record { fields, .. } => remap_record(expr, fields, info, scope),
        Expr::Convert { operand, .. } => {
            let updated = apply_remapping(operand, info, scope, treat_as_queryable)?;
            if Arc::ptr_eq(&updated, operand) {
                return Ok(expr.clone());
            }
            let ty = updated.ty();
            Ok(Expr::convert(updated, ty))
        }
        Expr::Unary { op, operand } => {
            let updated = apply_remapping(operand, info, scope, treat_as_queryable)?;
            if Arc::ptr_eq(&updated, operand) {
                return Ok(expr.clone());
            }
            Ok(Expr::unary(*op, updated))
        }
        _ => Ok(expr.clone()),
    }
}

fn is_carrier(body: &Expr) -> bool {
    match body {
        Expr::Keyed {
            kind: KeyedKind::Carrier,
            ..
        } => true,
        Expr::Call {
            method: Method::Select,
            args,
        } => args
            .get(1)
            .and_then(|arg| arg.as_lambda())
            .is_some_and(|lambda| is_carrier(&lambda.body)),
        _ => false,
    }
}

fn wrap_target(
    expr: &ExprRef,
    lambda: &Lambda,
    info: &mut ReplaceInfo,
    scope: &mut Scope,
    treat_as_queryable: bool,
) -> Result<ExprRef> {
    info.applied = true;
    if is_carrier(&lambda.body) {
        return Ok(expr.clone());
    }

    let key = synthesize_key(&info.keys)?;
    let body_ty = lambda.body.ty();
    let body = match body_ty.element() {
        Some(element) if treat_as_queryable && body_ty.is_seq() => {
            let row = scope.param("row", element.clone());
            lambda
                .body
                .select(&row, Expr::keyed(KeyedKind::Carrier, key, row.expr()))
        }
        _ => Expr::keyed(KeyedKind::Carrier, key, lambda.body.clone()),
    };
    Ok(Arc::new(Expr::Lambda(Lambda {
        params: lambda.params.clone(),
        body,
    })))
}

fn remap_call(
    expr: &ExprRef,
    method: Method,
    args: &[ExprRef],
    info: &mut ReplaceInfo,
    scope: &mut Scope,
) -> Result<ExprRef> {
    let mut new_args: SmallVec<[ExprRef; 3]> = args.iter().cloned().collect();
    let mut changed_at = None;
    for (index, arg) in args.iter().enumerate() {
        let queryable = index == 0 || (method == Method::SelectMany && index == 1);
        let updated = apply_remapping(arg, info, scope, queryable)?;
        if !Arc::ptr_eq(&updated, arg) {
            new_args[index] = updated;
            changed_at = Some(index);
            break;
        }
    }
    let Some(changed_at) = changed_at else {
        return Ok(expr.clone());
    };

    if changed_at == 0 && matches!(method, Method::ToList | Method::AsQueryable) {
        return Ok(new_args[0].clone());
    }

    let rebound = match (method, changed_at) {
        (_, 0) => Some(0),
        (Method::SelectMany, 1) => Some(1),
        _ => None,
    };
    if let Some(param_index) = rebound {
        let changed_ty = new_args[changed_at].ty();
        match changed_ty.element() {
            Some(Ty::Grouping(..)) => {
                return Err(GraftError::unsupported(format!(
                    "{method} over groupings of key-tagged rows"
                )));
            }
            Some(element @ Ty::Keyed(..)) => {
                let element = element.clone();
                for index in changed_at + 1..new_args.len() {
                    if method == Method::GroupJoin && index == 3 {
                        continue;
                    }
                    let Some(lambda) = new_args[index].as_lambda() else {
                        continue;
                    };
                    if param_index >= lambda.params.len() {
                        continue;
                    }
                    let retargeted = retarget(
                        lambda,
                        param_index,
                        &element,
                        rewrap_for(method, index, args.len()),
                        info,
                        scope,
                    );
                    new_args[index] = retargeted;
                }
            }
            _ => {}
        }
    }

    Ok(Arc::new(Expr::Call {
        method,
        args: new_args,
    }))
}

/// How a retargeted lambda's result is tagged again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrap {
    /// Pass-through position: the result is not a row.
    PassThrough,
    /// The result is one row.
    Row,
    /// The result is a sequence of rows flattened into the output.
    Elements,
}

fn rewrap_for(method: Method, index: usize, arg_count: usize) -> Rewrap {
    match method {
        Method::Select if index == 1 => Rewrap::Row,
        Method::SelectMany if index == 1 && arg_count == 2 => Rewrap::Elements,
        Method::SelectMany if index == 2 => Rewrap::Row,
        Method::GroupBy if index == 2 => Rewrap::Row,
        Method::GroupJoin if index == 4 => Rewrap::Row,
        _ => Rewrap::PassThrough,
    }
}

fn retarget(
    lambda: &Lambda,
    param_index: usize,
    element: &Ty,
    rewrap: Rewrap,
    info: &mut ReplaceInfo,
    scope: &mut Scope,
) -> ExprRef {
    let old = &lambda.params[param_index];
    let fresh = scope.param(old.name.clone(), element.clone());
    info.rehomed.insert(old.id, fresh.clone());

    let mut map = HashMap::new();
    map.insert(old.id, Expr::part(fresh.expr(), Part::Data));
    let mut body = substitute(&lambda.body, &map);

    let carrier_key = Expr::part(fresh.expr(), Part::Key);
    body = match rewrap {
        Rewrap::PassThrough => body,
        Rewrap::Row => Expr::keyed(KeyedKind::Carrier, carrier_key, body),
        Rewrap::Elements => {
            let inner = body.ty().element().cloned().unwrap_or_default();
            let row = scope.param("row", inner);
            body.select(&row, Expr::keyed(KeyedKind::Carrier, carrier_key, row.expr()))
        }
    };

    let mut params = lambda.params.clone();
    params[param_index] = fresh;
    Arc::new(Expr::Lambda(Lambda { params, body }))
}

fn remap_record(
    expr: &ExprRef,
    fields: &[(CompactString, ExprRef)],
    info: &mut ReplaceInfo,
    scope: &mut Scope,
) -> Result<ExprRef> {
    for (name, value) in fields {
        let updated = apply_remapping(value, info, scope, false)?;
        if Arc::ptr_eq(&updated, value) {
            continue;
        }
        let key = match &*updated {
            Expr::Keyed { key, .. } => key.clone(),
            _ => match updated.ty() {
                Ty::Keyed(..) => Expr::part(updated.clone(), Part::Key),
                Ty::Seq(element) => match &*element {
                    Ty::Keyed(..) => {
                        let row = scope.param("row", (*element).clone());
                        updated.select(&row, Expr::part(row.expr(), Part::Key))
                    }
                    other => {
                        return Err(GraftError::unsupported(format!(
                            "field `{name}` became a sequence of {other:?} rather than key-tagged rows"
                        )));
                    }
                },
                _ => updated.clone(),
            },
        };
        return Ok(Expr::keyed(KeyedKind::Carrier, key, expr.clone()));
    }
    Ok(expr.clone())
}
