//! Composite key synthesis.
//!
//! A key over one component is that component. Several components form a
//! right-nested chain of fixed-arity [`Expr::Key`] levels: a level holds at
//! most [`MAX_KEY_ARITY`] slots, and when more components remain the last
//! slot holds a nested key of the rest. The parent-tagging and child-tagging
//! sides of a correlation both go through [`synthesize_key`], so keys built
//! from the same number of components always have the same shape.

use smallvec::SmallVec;

use crate::error::{GraftError, Result};
use crate::expr::{Expr, ExprRef};
use crate::value::Value;
use std::sync::Arc;

/// Slots per key level.
pub const MAX_KEY_ARITY: usize = 7;

/// Build a key expression from ordered components.
pub fn synthesize_key(components: &[ExprRef]) -> Result<ExprRef> {
    match components.len() {
        0 => Err(GraftError::Argument(
            "a key needs at least one component".into(),
        )),
        1 => Ok(components[0].clone()),
        n if n <= MAX_KEY_ARITY => Ok(Arc::new(Expr::Key(components.iter().cloned().collect()))),
        _ => {
            let head = MAX_KEY_ARITY - 1;
            let mut items: SmallVec<[ExprRef; MAX_KEY_ARITY]> =
                components[..head].iter().cloned().collect();
            items.push(synthesize_key(&components[head..])?);
            Ok(Arc::new(Expr::Key(items)))
        }
    }
}

/// Accessors reading each of `count` components back out of `key`.
pub fn key_component_paths(key: &ExprRef, count: usize) -> Vec<ExprRef> {
    let mut paths = Vec::with_capacity(count);
    push_paths(key, count, &mut paths);
    paths
}

fn push_paths(key: &ExprRef, count: usize, out: &mut Vec<ExprRef>) {
    match count {
        0 => {}
        1 => out.push(key.clone()),
        n if n <= MAX_KEY_ARITY => {
            out.extend((0..n).map(|index| Expr::key_item(key.clone(), index)));
        }
        n => {
            let head = MAX_KEY_ARITY - 1;
            out.extend((0..head).map(|index| Expr::key_item(key.clone(), index)));
            push_paths(&Expr::key_item(key.clone(), head), n - head, out);
        }
    }
}

/// Components of `key`, a key of `count` components.
///
/// Literal [`Expr::Key`] levels yield their items. Any other level yields
/// accessors into it, as [`key_component_paths`] does.
pub fn key_components(key: &ExprRef, count: usize) -> Vec<ExprRef> {
    let mut out = Vec::with_capacity(count);
    push_components(key, count, &mut out);
    out
}

fn push_components(key: &ExprRef, count: usize, out: &mut Vec<ExprRef>) {
    let Expr::Key(items) = &**key else {
        push_paths(key, count, out);
        return;
    };
    match count {
        0 => {}
        1 => out.push(key.clone()),
        n if n <= MAX_KEY_ARITY && items.len() == n => out.extend(items.iter().cloned()),
        n if n > MAX_KEY_ARITY && items.len() == MAX_KEY_ARITY => {
            let head = MAX_KEY_ARITY - 1;
            out.extend(items[..head].iter().cloned());
            push_components(&items[head], n - head, out);
        }
        _ => push_paths(key, count, out),
    }
}

/// Value-level mirror of [`synthesize_key`].
pub fn compose_key(components: &[Value]) -> Result<Value> {
    match components.len() {
        0 => Err(GraftError::Argument(
            "a key needs at least one component".into(),
        )),
        1 => Ok(components[0].clone()),
        n if n <= MAX_KEY_ARITY => Ok(Value::Key(Arc::from(components.to_vec()))),
        _ => {
            let head = MAX_KEY_ARITY - 1;
            let mut items = components[..head].to_vec();
            items.push(compose_key(&components[head..])?);
            Ok(Value::Key(Arc::from(items)))
        }
    }
}

/// Split a key value of `count` components back into its components.
pub fn decompose_key(key: &Value, count: usize) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(count);
    let mut level = key;
    let mut remaining = count;
    loop {
        match remaining {
            0 => return Ok(out),
            1 => {
                out.push(level.clone());
                return Ok(out);
            }
            n => {
                let Value::Key(items) = level else {
                    return Err(GraftError::Argument(format!(
                        "expected a key level with {} components, got {}",
                        n.min(MAX_KEY_ARITY),
                        level.kind()
                    )));
                };
                if n <= MAX_KEY_ARITY {
                    if items.len() != n {
                        return Err(GraftError::Argument(format!(
                            "key level has {} slots, expected {n}",
                            items.len()
                        )));
                    }
                    out.extend(items.iter().cloned());
                    return Ok(out);
                }
                if items.len() != MAX_KEY_ARITY {
                    return Err(GraftError::Argument(format!(
                        "key level has {} slots, expected {MAX_KEY_ARITY}",
                        items.len()
                    )));
                }
                out.extend(items[..MAX_KEY_ARITY - 1].iter().cloned());
                level = &items[MAX_KEY_ARITY - 1];
                remaining = n - (MAX_KEY_ARITY - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Env, Evaluator};

    fn constants(n: usize) -> Vec<ExprRef> {
        (0..n).map(|i| Expr::constant(i as i64)).collect()
    }

    fn depth(key: &ExprRef) -> usize {
        match &**key {
            Expr::Key(items) => 1 + items.last().map_or(0, depth),
            _ => 0,
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(synthesize_key(&[]), Err(GraftError::Argument(_))));
        assert!(compose_key(&[]).is_err());
    }

    #[test]
    fn single_component_is_unwrapped() {
        let component = Expr::constant(42);
        let key = synthesize_key(std::slice::from_ref(&component)).unwrap();
        assert!(Arc::ptr_eq(&key, &component));
    }

    #[test]
    fn nesting_shape() {
        assert_eq!(depth(&synthesize_key(&constants(7)).unwrap()), 1);
        assert_eq!(depth(&synthesize_key(&constants(8)).unwrap()), 2);
        assert_eq!(depth(&synthesize_key(&constants(13)).unwrap()), 2);
        assert_eq!(depth(&synthesize_key(&constants(14)).unwrap()), 3);
    }

    #[test]
    fn round_trip_through_paths() {
        let evaluator = Evaluator::detached();
        for n in 1..=20 {
            let components = constants(n);
            let key = synthesize_key(&components).unwrap();
            let key_value = evaluator.eval(&key, &Env::root()).unwrap();

            let paths = key_component_paths(&key, n);
            assert_eq!(paths.len(), n);
            for (i, path) in paths.iter().enumerate() {
                let value = evaluator.eval(path, &Env::root()).unwrap();
                assert_eq!(value, Value::Int(i as i64), "component {i} of {n}");
            }

            let decomposed = decompose_key(&key_value, n).unwrap();
            let expected: Vec<Value> = (0..n).map(|i| Value::Int(i as i64)).collect();
            assert_eq!(decomposed, expected);
            assert_eq!(compose_key(&expected).unwrap(), key_value);
            assert_eq!(key_components(&key, n), components);
        }
    }

    #[test]
    fn key_valued_last_component_stays_whole() {
        let inner = synthesize_key(&constants(2)).unwrap();
        let mut components = constants(6);
        components.push(inner.clone());
        let key = synthesize_key(&components).unwrap();

        let split = key_components(&key, 7);
        assert_eq!(split.len(), 7);
        assert!(Arc::ptr_eq(&split[6], &inner));
        assert_eq!(key_components(&inner, 1), vec![inner.clone()]);
    }

    #[test]
    fn opaque_keys_split_into_accessors() {
        let key = Expr::typed_constant(
            compose_key(&(0..9).map(Value::from).collect::<Vec<_>>()).unwrap(),
            synthesize_key(&constants(9)).unwrap().ty(),
        );
        let split = key_components(&key, 9);
        assert_eq!(split, key_component_paths(&key, 9));
        let evaluator = Evaluator::detached();
        let last = evaluator.eval(&split[8], &Env::root()).unwrap();
        assert_eq!(last, Value::Int(8));
    }

    #[test]
    fn equal_components_give_equal_keys() {
        let a = compose_key(&[Value::from(1), Value::from("a"), Value::Null]).unwrap();
        let b = compose_key(&[Value::from(1), Value::from("a"), Value::Null]).unwrap();
        let c = compose_key(&[Value::from(1), Value::from("b"), Value::Null]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
