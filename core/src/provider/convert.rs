//! Cached scalar conversions between value kinds.

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::{GraftError, Result};
use crate::value::{Value, ValueKind};

/// Converts a value of one kind into another.
pub type Converter = fn(Value) -> Result<Value>;

/// Converters keyed by `(source, target)` kind. Pairs with no conversion
/// are cached as misses too.
#[derive(Debug, Default)]
pub struct ConverterCache {
    cache: RwLock<HashMap<(ValueKind, ValueKind), Option<Converter>>>,
}

impl ConverterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, source: ValueKind, target: ValueKind) -> Option<Converter> {
        if let Some(hit) = self.cache.read().get(&(source, target)) {
            return *hit;
        }
        let built = build(source, target);
        *self.cache.write().entry((source, target)).or_insert(built)
    }

    /// Register `converter` for `(source, target)`, replacing any built-in
    /// conversion or cached miss.
    pub fn set(&self, source: ValueKind, target: ValueKind, converter: Converter) {
        self.cache.write().insert((source, target), Some(converter));
    }

    /// Number of cached pairs, misses included.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

fn build(source: ValueKind, target: ValueKind) -> Option<Converter> {
    use ValueKind::*;
    let converter: Converter = match (source, target) {
        (s, t) if s == t => identity,
        (Int, Float) => int_to_float,
        (Float, Int) => float_to_int,
        (Int, Bool) => int_to_bool,
        (Bool, Int) => bool_to_int,
        (Int | Float | Bool, Text) => scalar_to_text,
        (Text, Int) => text_to_int,
        (Text, Float) => text_to_float,
        (Text, Bool) => text_to_bool,
        (Text, Bytes) => text_to_bytes,
        (Bytes, Text) => bytes_to_text,
        _ => return None,
    };
    Some(converter)
}

fn mismatch(value: &Value, target: ValueKind) -> GraftError {
    GraftError::Conversion(format!("cannot convert {} to {target}", value.kind()))
}

fn identity(value: Value) -> Result<Value> {
    Ok(value)
}

fn int_to_float(value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Float(n as f64)),
        other => Err(mismatch(&other, ValueKind::Float)),
    }
}

fn float_to_int(value: Value) -> Result<Value> {
    match value {
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Value::Int(f as i64)),
        Value::Float(f) => Err(GraftError::Conversion(format!(
            "{f} is not an integral value"
        ))),
        other => Err(mismatch(&other, ValueKind::Int)),
    }
}

fn int_to_bool(value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Bool(n != 0)),
        other => Err(mismatch(&other, ValueKind::Bool)),
    }
}

fn bool_to_int(value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        other => Err(mismatch(&other, ValueKind::Int)),
    }
}

fn scalar_to_text(value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Text(compact_str::format_compact!("{n}"))),
        Value::Float(f) => Ok(Value::Text(compact_str::format_compact!("{f}"))),
        Value::Bool(b) => Ok(Value::Text(compact_str::format_compact!("{b}"))),
        other => Err(mismatch(&other, ValueKind::Text)),
    }
}

fn text_to_int(value: Value) -> Result<Value> {
    match &value {
        Value::Text(text) => text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| mismatch(&value, ValueKind::Int)),
        _ => Err(mismatch(&value, ValueKind::Int)),
    }
}

fn text_to_float(value: Value) -> Result<Value> {
    match &value {
        Value::Text(text) => text
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| mismatch(&value, ValueKind::Float)),
        _ => Err(mismatch(&value, ValueKind::Float)),
    }
}

fn text_to_bool(value: Value) -> Result<Value> {
    match value.as_str().map(str::trim) {
        Some(text) if text.eq_ignore_ascii_case("true") || text == "1" => Ok(Value::Bool(true)),
        Some(text) if text.eq_ignore_ascii_case("false") || text == "0" => Ok(Value::Bool(false)),
        _ => Err(mismatch(&value, ValueKind::Bool)),
    }
}

fn text_to_bytes(value: Value) -> Result<Value> {
    match value {
        Value::Text(text) => Ok(Value::Bytes(text.as_bytes().into())),
        other => Err(mismatch(&other, ValueKind::Bytes)),
    }
}

fn bytes_to_text(value: Value) -> Result<Value> {
    match &value {
        Value::Bytes(bytes) => core::str::from_utf8(bytes)
            .map(Value::from)
            .map_err(|e| GraftError::Conversion(e.to_string())),
        _ => Err(mismatch(&value, ValueKind::Text)),
    }
}
