//! In-memory interpreter for the query IR.
//!
//! A statement evaluates its plan over table snapshots fetched once from the
//! connection. Preamble reads resolve against the published slot array.

use compact_str::CompactString;
use core::cmp::Ordering;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{GraftError, Result};
use crate::expr::{BinaryOp, Expr, ExprRef, Method, Param, ParamId, Part, Ty, UnaryOp};
use crate::preamble::{PreambleValue, PreambleValues};
use crate::value::{Grouping, Record, Value};

/// Table snapshots visible to one statement.
pub type Tables = HashMap<CompactString, Arc<[Value]>>;

/// Parameter bindings, innermost first.
#[derive(Debug)]
pub enum Env<'a> {
    Root,
    Bound {
        parent: &'a Env<'a>,
        id: ParamId,
        value: Value,
    },
}

impl<'a> Env<'a> {
    pub fn root() -> Env<'static> {
        Env::Root
    }

    pub fn bind(&'a self, id: ParamId, value: Value) -> Env<'a> {
        Env::Bound {
            parent: self,
            id,
            value,
        }
    }

    pub fn lookup(&self, wanted: ParamId) -> Option<&Value> {
        let mut current = self;
        loop {
            match current {
                Env::Root => return None,
                Env::Bound { parent, id, value } => {
                    if *id == wanted {
                        return Some(value);
                    }
                    current = *parent;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator<'a> {
    tables: Option<&'a Tables>,
    preambles: Option<&'a PreambleValues>,
}

impl<'a> Evaluator<'a> {
    pub fn new(tables: &'a Tables, preambles: &'a PreambleValues) -> Self {
        Self {
            tables: Some(tables),
            preambles: Some(preambles),
        }
    }

    /// An evaluator with no tables and no preamble slots.
    pub fn detached() -> Evaluator<'static> {
        Evaluator {
            tables: None,
            preambles: None,
        }
    }

    pub fn eval(&self, expr: &ExprRef, env: &Env<'_>) -> Result<Value> {
        match &**expr {
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::Param(param) => env.lookup(param.id).cloned().ok_or_else(|| {
                GraftError::eval(format!("unbound parameter `{}`#{}", param.name, param.id))
            }),
            Expr::Member { object, field, .. } => match self.eval(object, env)? {
                Value::Null => Ok(Value::Null),
                Value::Record(record) => record.get(field).cloned().ok_or_else(|| {
                    GraftError::eval(format!("`{}` has no field `{field}`", record.name))
                }),
                other => Err(GraftError::eval(format!(
                    "cannot read `{field}` from a {} value",
                    other.kind()
                ))),
            },
            Expr::Lambda(_) => Err(GraftError::eval("lambda evaluated outside of a call")),
            Expr::Call { method, args } => self.eval_call(*method, args, env),
            Expr::Record { name, fields } => {
                let mut record = Record::new(name.clone());
                for (field, value) in fields {
                    record.push(field.clone(), self.eval(value, env)?);
                }
                Ok(Value::record(record))
            }
            Expr::Key(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Key(Arc::from(values)))
            }
            Expr::KeyItem { key, index } => match self.eval(key, env)? {
                Value::Key(items) => items.get(*index).cloned().ok_or_else(|| {
                    GraftError::eval(format!("key slot {index} out of range"))
                }),
                other => Err(GraftError::eval(format!(
                    "cannot index a {} value as a key",
                    other.kind()
                ))),
            },
            Expr::Keyed { key, data, .. } => {
                Ok(Value::keyed(self.eval(key, env)?, self.eval(data, env)?))
            }
            Expr::Part { object, part } => match (self.eval(object, env)?, part) {
                (Value::Null, _) => Ok(Value::Null),
                (Value::Keyed(keyed), Part::Key) => Ok(keyed.key.clone()),
                (Value::Keyed(keyed), Part::Data) => Ok(keyed.data.clone()),
                (Value::Grouping(group), Part::Key) => Ok(group.key.clone()),
                (Value::Grouping(group), Part::Data) => Ok(Value::List(group.items.clone())),
                (other, _) => Err(GraftError::eval(format!(
                    "cannot split a {} value into key and data",
                    other.kind()
                ))),
            },
            Expr::Convert { operand, ty } => convert(self.eval(operand, env)?, ty),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::IsNull => Ok(Value::Bool(value.is_null())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| GraftError::eval(format!("integer overflow in -({i})"))),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        Value::Null => Ok(Value::Null),
                        other => Err(GraftError::eval(format!("cannot negate a {}", other.kind()))),
                    },
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            Expr::Table { name } => self
                .tables
                .and_then(|tables| tables.get(name))
                .map(|rows| Value::List(rows.clone()))
                .ok_or_else(|| GraftError::eval(format!("table `{name}` was not fetched"))),
            Expr::Preamble { slot, key, .. } => {
                let preambles = self
                    .preambles
                    .ok_or_else(|| GraftError::eval(format!("preamble slot {slot} is not published")))?;
                match (preambles.get(*slot)?, key) {
                    (PreambleValue::List(items), None) => Ok(Value::List(items.clone())),
                    (PreambleValue::Context(context), Some(key)) => {
                        let key = self.eval(key, env)?;
                        Ok(Value::List(Arc::from(context.get_list(&key))))
                    }
                    _ => Err(GraftError::eval(format!(
                        "preamble slot {slot} does not match its read"
                    ))),
                }
            }
        }
    }

    /// Evaluate a sequence-valued expression.
    pub fn eval_seq(&self, expr: &ExprRef, env: &Env<'_>) -> Result<Arc<[Value]>> {
        match self.eval(expr, env)? {
            Value::List(items) => Ok(items),
            Value::Grouping(group) => Ok(group.items.clone()),
            Value::Null => Ok(Arc::from(Vec::new())),
            other => Err(GraftError::eval(format!(
                "expected a sequence, got a {} value",
                other.kind()
            ))),
        }
    }

    fn apply(&self, lambda: &ExprRef, args: &[Value], env: &Env<'_>) -> Result<Value> {
        let Expr::Lambda(lambda) = &**lambda else {
            return Err(GraftError::eval("expected a lambda argument"));
        };
        if lambda.params.len() != args.len() {
            return Err(GraftError::eval(format!(
                "lambda takes {} parameters, got {}",
                lambda.params.len(),
                args.len()
            )));
        }
        self.apply_with(&lambda.params, args, env, &lambda.body)
    }

    fn apply_with(&self, params: &[Param], args: &[Value], env: &Env<'_>, body: &ExprRef) -> Result<Value> {
        match (params.split_first(), args.split_first()) {
            (Some((param, params)), Some((arg, args))) => {
                let inner = env.bind(param.id, arg.clone());
                self.apply_with(params, args, &inner, body)
            }
            _ => self.eval(body, env),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &ExprRef, right: &ExprRef, env: &Env<'_>) -> Result<Value> {
        match op {
            BinaryOp::And => {
                if !truthy(&self.eval(left, env)?) {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(truthy(&self.eval(right, env)?)));
            }
            BinaryOp::Or => {
                if truthy(&self.eval(left, env)?) {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(truthy(&self.eval(right, env)?)));
            }
            _ => {}
        }

        let l = self.eval(left, env)?;
        let r = self.eval(right, env)?;
        let comparable = !l.is_null() && !r.is_null();
        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::Lt => Ok(Value::Bool(comparable && l.compare(&r) == Ordering::Less)),
            BinaryOp::Le => Ok(Value::Bool(comparable && l.compare(&r) != Ordering::Greater)),
            BinaryOp::Gt => Ok(Value::Bool(comparable && l.compare(&r) == Ordering::Greater)),
            BinaryOp::Ge => Ok(Value::Bool(comparable && l.compare(&r) != Ordering::Less)),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, l, r),
            BinaryOp::And => Ok(Value::Bool(truthy(&l) && truthy(&r))),
            BinaryOp::Or => Ok(Value::Bool(truthy(&l) || truthy(&r))),
        }
    }

    fn eval_call(&self, method: Method, args: &[ExprRef], env: &Env<'_>) -> Result<Value> {
        let arg = |index: usize| {
            args.get(index)
                .ok_or_else(|| GraftError::eval(format!("{method} is missing argument {index}")))
        };

        match method {
            Method::Select => {
                let selector = arg(1)?;
                let items = self.eval_seq(arg(0)?, env)?;
                let out = items
                    .iter()
                    .map(|item| self.apply(selector, core::slice::from_ref(item), env))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(Arc::from(out)))
            }
            Method::Where => {
                let predicate = arg(1)?;
                let items = self.eval_seq(arg(0)?, env)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    if truthy(&self.apply(predicate, core::slice::from_ref(item), env)?) {
                        out.push(item.clone());
                    }
                }
                Ok(Value::List(Arc::from(out)))
            }
            Method::SelectMany => {
                let collection = arg(1)?;
                let result = args.get(2);
                let items = self.eval_seq(arg(0)?, env)?;
                let mut out = Vec::new();
                for item in items.iter() {
                    let inner = self.apply(collection, core::slice::from_ref(item), env)?;
                    let inner = match inner {
                        Value::List(list) => list,
                        Value::Grouping(group) => group.items.clone(),
                        Value::Null => continue,
                        other => {
                            return Err(GraftError::eval(format!(
                                "SelectMany collection is a {} value",
                                other.kind()
                            )));
                        }
                    };
                    for element in inner.iter() {
                        match result {
                            Some(result) => out.push(self.apply(result, &[item.clone(), element.clone()], env)?),
                            None => out.push(element.clone()),
                        }
                    }
                }
                Ok(Value::List(Arc::from(out)))
            }
            Method::OrderBy | Method::OrderByDescending | Method::ThenBy | Method::ThenByDescending => {
                self.eval_ordering(method, args, env)
            }
            Method::GroupBy => {
                let key_selector = arg(1)?;
                let element_selector = args.get(2);
                let items = self.eval_seq(arg(0)?, env)?;
                let mut index: HashMap<Value, usize> = HashMap::new();
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for item in items.iter() {
                    let key = self.apply(key_selector, core::slice::from_ref(item), env)?;
                    let element = match element_selector {
                        Some(selector) => self.apply(selector, core::slice::from_ref(item), env)?,
                        None => item.clone(),
                    };
                    let slot = *index.entry(key.clone()).or_insert_with(|| {
                        groups.push((key, Vec::new()));
                        groups.len() - 1
                    });
                    groups[slot].1.push(element);
                }
                let out: Vec<Value> = groups
                    .into_iter()
                    .map(|(key, items)| {
                        Value::Grouping(Arc::new(Grouping {
                            key,
                            items: Arc::from(items),
                        }))
                    })
                    .collect();
                Ok(Value::List(Arc::from(out)))
            }
            Method::GroupJoin => {
                let (outer_key, inner_key, result) = (arg(2)?, arg(3)?, arg(4)?);
                let outer = self.eval_seq(arg(0)?, env)?;
                let inner = self.eval_seq(arg(1)?, env)?;
                let inner_keys = inner
                    .iter()
                    .map(|item| self.apply(inner_key, core::slice::from_ref(item), env))
                    .collect::<Result<Vec<_>>>()?;
                let mut out = Vec::with_capacity(outer.len());
                for item in outer.iter() {
                    let key = self.apply(outer_key, core::slice::from_ref(item), env)?;
                    let group: Vec<Value> = inner
                        .iter()
                        .zip(&inner_keys)
                        .filter(|(_, inner_key)| values_equal(&key, inner_key))
                        .map(|(inner_item, _)| inner_item.clone())
                        .collect();
                    out.push(self.apply(result, &[item.clone(), Value::List(Arc::from(group))], env)?);
                }
                Ok(Value::List(Arc::from(out)))
            }
            Method::Distinct => {
                let items = self.eval_seq(arg(0)?, env)?;
                let mut seen = HashSet::new();
                let out: Vec<Value> = items
                    .iter()
                    .filter(|item| seen.insert((*item).clone()))
                    .cloned()
                    .collect();
                Ok(Value::List(Arc::from(out)))
            }
            Method::Skip | Method::Take => {
                let items = self.eval_seq(arg(0)?, env)?;
                let count = self
                    .eval(arg(1)?, env)?
                    .as_i64()
                    .ok_or_else(|| GraftError::eval(format!("{method} count must be an integer")))?
                    .max(0) as usize;
                let out: Vec<Value> = if method == Method::Skip {
                    items.iter().skip(count).cloned().collect()
                } else {
                    items.iter().take(count).cloned().collect()
                };
                Ok(Value::List(Arc::from(out)))
            }
            Method::First
            | Method::FirstOrDefault
            | Method::Single
            | Method::SingleOrDefault
            | Method::Last
            | Method::LastOrDefault => {
                let items = self.filtered(args, env)?;
                let picked = match method {
                    Method::First | Method::FirstOrDefault => items.first().cloned(),
                    Method::Last | Method::LastOrDefault => items.last().cloned(),
                    _ => {
                        if items.len() > 1 {
                            return Err(GraftError::eval("sequence contains more than one element"));
                        }
                        items.first().cloned()
                    }
                };
                match (picked, method) {
                    (Some(value), _) => Ok(value),
                    (None, Method::FirstOrDefault | Method::SingleOrDefault | Method::LastOrDefault) => {
                        Ok(Value::Null)
                    }
                    (None, _) => Err(GraftError::NotFound),
                }
            }
            Method::Any => Ok(Value::Bool(!self.filtered(args, env)?.is_empty())),
            Method::Count => Ok(Value::Int(self.filtered(args, env)?.len() as i64)),
            Method::Sum | Method::Min | Method::Max | Method::Average => {
                let items = self.eval_seq(arg(0)?, env)?;
                let values = match args.get(1) {
                    Some(selector) => items
                        .iter()
                        .map(|item| self.apply(selector, core::slice::from_ref(item), env))
                        .collect::<Result<Vec<_>>>()?,
                    None => items.to_vec(),
                };
                aggregate(method, values)
            }
            Method::ToList | Method::AsQueryable => Ok(Value::List(self.eval_seq(arg(0)?, env)?)),
        }
    }

    /// Source items, filtered by the optional predicate in slot 1.
    fn filtered(&self, args: &[ExprRef], env: &Env<'_>) -> Result<Vec<Value>> {
        let source = args
            .first()
            .ok_or_else(|| GraftError::eval("missing source argument"))?;
        let items = self.eval_seq(source, env)?;
        match args.get(1) {
            Some(predicate) => {
                let mut out = Vec::new();
                for item in items.iter() {
                    if truthy(&self.apply(predicate, core::slice::from_ref(item), env)?) {
                        out.push(item.clone());
                    }
                }
                Ok(out)
            }
            None => Ok(items.to_vec()),
        }
    }

    fn eval_ordering(&self, method: Method, args: &[ExprRef], env: &Env<'_>) -> Result<Value> {
        // Collect the ordering chain down to its primary OrderBy.
        let mut keys: Vec<(&ExprRef, bool)> = Vec::new();
        let mut current_method = method;
        let mut current_args = args;
        let source = loop {
            let (Some(source), Some(selector)) = (current_args.first(), current_args.get(1)) else {
                return Err(GraftError::eval(format!("{current_method} needs a key selector")));
            };
            keys.push((selector, current_method.is_descending()));
            match current_method {
                Method::ThenBy | Method::ThenByDescending => match &**source {
                    Expr::Call { method, args } if method.is_ordering() => {
                        current_method = *method;
                        current_args = args;
                    }
                    _ => break source,
                },
                _ => break source,
            }
        };
        keys.reverse();

        let items = self.eval_seq(source, env)?;
        let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(items.len());
        for item in items.iter() {
            let row_keys = keys
                .iter()
                .map(|(selector, _)| self.apply(selector, core::slice::from_ref(item), env))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((row_keys, item.clone()));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (index, (_, descending)) in keys.iter().enumerate() {
                let ordering = a[index].compare(&b[index]);
                let ordering = if *descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(Value::List(keyed.into_iter().map(|(_, item)| item).collect()))
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.compare(r) == Ordering::Equal
        }
        _ => l == r,
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match (&l, &r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                _ => a.checked_div(*b),
            };
            out.map(Value::Int)
                .ok_or_else(|| GraftError::eval(format!("integer overflow or division by zero in {a} {op:?} {b}")))
        }
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => {
            let mut joined = a.clone();
            joined.push_str(b);
            Ok(Value::Text(joined))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            })),
            _ => Err(GraftError::eval(format!(
                "cannot apply {op:?} to {} and {}",
                l.kind(),
                r.kind()
            ))),
        },
    }
}

fn aggregate(method: Method, values: Vec<Value>) -> Result<Value> {
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match method {
        Method::Min => Ok(values.into_iter().min_by(|a, b| a.compare(b)).unwrap_or_default()),
        Method::Max => Ok(values.into_iter().max_by(|a, b| a.compare(b)).unwrap_or_default()),
        Method::Sum => {
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                let mut total: i64 = 0;
                for value in &values {
                    if let Value::Int(i) = value {
                        total = total
                            .checked_add(*i)
                            .ok_or_else(|| GraftError::eval("integer overflow in Sum"))?;
                    }
                }
                Ok(Value::Int(total))
            } else {
                let mut total = 0.0;
                for value in &values {
                    total += value
                        .as_f64()
                        .ok_or_else(|| GraftError::eval(format!("cannot sum a {} value", value.kind())))?;
                }
                Ok(Value::Float(total))
            }
        }
        _ => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut total = 0.0;
            for value in &values {
                total += value
                    .as_f64()
                    .ok_or_else(|| GraftError::eval(format!("cannot average a {} value", value.kind())))?;
            }
            Ok(Value::Float(total / values.len() as f64))
        }
    }
}

fn convert(value: Value, ty: &Ty) -> Result<Value> {
    Ok(match (value, ty) {
        (Value::Int(i), Ty::Float) => Value::Float(i as f64),
        (Value::Float(f), Ty::Int) => Value::Int(f as i64),
        (Value::Int(i), Ty::Bool) => Value::Bool(i != 0),
        (Value::Bool(b), Ty::Int) => Value::Int(i64::from(b)),
        (value, _) => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExprExt, Scope};

    fn order(id: i64, customer: i64, total: i64) -> Value {
        Value::record(
            Record::new("orders")
                .with("id", id)
                .with("customer_id", customer)
                .with("total", total),
        )
    }

    fn tables() -> Tables {
        let mut tables = Tables::new();
        tables.insert(
            "orders".into(),
            Arc::from(vec![order(1, 10, 5), order(2, 11, 7), order(3, 10, 3), order(4, 12, 7)]),
        );
        tables
    }

    fn ids(value: &Value) -> Vec<i64> {
        value
            .as_list()
            .unwrap()
            .iter()
            .map(|row| row.field("id").and_then(Value::as_i64).unwrap())
            .collect()
    }

    #[test]
    fn filter_order_and_page() {
        let tables = tables();
        let preambles = PreambleValues::default();
        let evaluator = Evaluator::new(&tables, &preambles);
        let mut scope = Scope::new();
        let o = scope.param("o", Ty::entity("orders"));
        let total = o.expr().member("total", Ty::Int);
        let id = o.expr().member("id", Ty::Int);

        let query = Expr::table("orders")
            .filter(&o, total.greater(Expr::constant(3)))
            .order_by_desc(&o, total.clone())
            .then_by(&o, id.clone())
            .take(2);
        let result = evaluator.eval(&query, &Env::root()).unwrap();
        assert_eq!(ids(&result), vec![2, 4]);
    }

    #[test]
    fn group_and_aggregate() {
        let tables = tables();
        let preambles = PreambleValues::default();
        let evaluator = Evaluator::new(&tables, &preambles);
        let mut scope = Scope::new();
        let o = scope.param("o", Ty::entity("orders"));
        let g = scope.param("g", Ty::grouping(Ty::Int, Ty::entity("orders")));

        let query = Expr::table("orders")
            .group_by(&o, o.expr().member("customer_id", Ty::Int))
            .select(&g, Expr::part(g.expr(), Part::Data).count());
        let result = evaluator.eval(&query, &Env::root()).unwrap();
        assert_eq!(
            result.as_list().unwrap(),
            &[Value::Int(2), Value::Int(1), Value::Int(1)]
        );
    }

    #[test]
    fn first_on_empty_sequence_fails_but_default_does_not() {
        let tables = tables();
        let preambles = PreambleValues::default();
        let evaluator = Evaluator::new(&tables, &preambles);
        let mut scope = Scope::new();
        let o = scope.param("o", Ty::entity("orders"));
        let empty = Expr::table("orders").filter(&o, o.expr().member("total", Ty::Int).greater(Expr::constant(100)));

        assert!(matches!(
            evaluator.eval(&empty.first(), &Env::root()),
            Err(GraftError::NotFound)
        ));
        assert_eq!(
            evaluator.eval(&empty.first_or_default(), &Env::root()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn group_join_collects_matching_inner_rows() {
        let tables = tables();
        let preambles = PreambleValues::default();
        let evaluator = Evaluator::new(&tables, &preambles);
        let mut scope = Scope::new();
        let ok = scope.param("ok", Ty::Int);
        let o = scope.param("o", Ty::entity("orders"));
        let outer = scope.param("outer", Ty::Int);
        let group = scope.param("group", Ty::seq(Ty::entity("orders")));

        let customers = Expr::typed_constant(
            Value::list(vec![Value::Int(10), Value::Int(13), Value::Int(11)]),
            Ty::seq(Ty::Int),
        );
        let query = customers.group_join(
            Expr::table("orders"),
            (&ok, ok.expr()),
            (&o, o.expr().member("customer_id", Ty::Int)),
            (&outer, &group),
            group.expr().count(),
        );
        let result = evaluator.eval(&query, &Env::root()).unwrap();
        assert_eq!(
            result.as_list().unwrap(),
            &[Value::Int(2), Value::Int(0), Value::Int(1)]
        );
    }

    #[test]
    fn negating_the_smallest_integer_is_an_error() {
        let evaluator = Evaluator::detached();
        let err = evaluator
            .eval(&Expr::unary(UnaryOp::Neg, Expr::constant(i64::MIN)), &Env::root())
            .unwrap_err();
        assert!(matches!(err, GraftError::Evaluation(_)));
        assert_eq!(
            evaluator
                .eval(&Expr::unary(UnaryOp::Neg, Expr::constant(7)), &Env::root())
                .unwrap(),
            Value::Int(-7)
        );
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let err = Evaluator::detached().eval(&c.expr(), &Env::root()).unwrap_err();
        assert!(matches!(err, GraftError::Evaluation(_)));
    }
}
