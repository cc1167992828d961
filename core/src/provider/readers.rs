//! Field reader registration and lookup.
//!
//! A driver exposes named getters on its row type. When a provider is first
//! used, the driver binds getters to reader keys through a [`ReaderBinder`];
//! reads then walk a fallback chain of keys from most to least specific and
//! cache the getter each column shape resolved to.

use compact_str::CompactString;
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::convert::{Converter, ConverterCache};
use crate::error::{GraftError, Result};
use crate::value::{Record, Value, ValueKind};

/// Row access a driver exposes to the reader registry.
pub trait NativeRow: Send + Sync + 'static {
    fn column_count(&self) -> usize;

    fn column_name(&self, index: usize) -> &str;

    /// Declared type name of the column, empty when unknown.
    fn data_type_name(&self, index: usize) -> &str;

    /// Kind implied by the declared type.
    fn field_kind(&self, index: usize) -> ValueKind {
        ValueKind::from_data_type_name(self.data_type_name(index))
    }

    /// Driver-specific storage type of the current value, if the driver
    /// reports one.
    fn provider_field_type(&self, index: usize) -> Option<&str>;
}

/// A named getter on a driver row type.
pub struct ReaderMethod<R> {
    pub name: &'static str,
    pub read: fn(&R, usize) -> Result<Value>,
}

impl<R> Clone for ReaderMethod<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ReaderMethod<R> {}

impl<R> core::fmt::Debug for ReaderMethod<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReaderMethod").field("name", &self.name).finish()
    }
}

impl<R> ReaderMethod<R> {
    pub const fn new(name: &'static str, read: fn(&R, usize) -> Result<Value>) -> Self {
        Self { name, read }
    }
}

/// Key a getter is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReaderInfo {
    /// Driver storage type read into a specific target kind.
    ProviderToType {
        provider_type: CompactString,
        target: ValueKind,
    },
    /// Driver storage type, any target.
    ProviderField { provider_type: CompactString },
    /// Declared field kind, optionally narrowed by data type name.
    Field {
        field: ValueKind,
        data_type: Option<CompactString>,
    },
    /// Any column read into a specific target kind.
    ToType { target: ValueKind },
}

/// Column shape a resolved getter is cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Shape {
    provider_type: Option<CompactString>,
    field: ValueKind,
    data_type: CompactString,
    target: Option<ValueKind>,
}

/// Getters bound for one provider.
pub struct FieldReaders<R> {
    owner: CompactString,
    bound: HashMap<ReaderInfo, ReaderMethod<R>>,
    generic: Option<ReaderMethod<R>>,
    resolved: RwLock<HashMap<Shape, Option<ReaderMethod<R>>>>,
    converters: ConverterCache,
}

impl<R> core::fmt::Debug for FieldReaders<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FieldReaders")
            .field("owner", &self.owner)
            .field("bound", &self.bound.len())
            .field("generic", &self.generic)
            .finish_non_exhaustive()
    }
}

impl<R: NativeRow> FieldReaders<R> {
    pub fn new(owner: impl Into<CompactString>) -> Self {
        Self {
            owner: owner.into(),
            bound: HashMap::new(),
            generic: None,
            resolved: RwLock::new(HashMap::new()),
            converters: ConverterCache::default(),
        }
    }

    /// Number of bound reader keys.
    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.generic.is_none()
    }

    pub fn get(&self, info: &ReaderInfo) -> Option<&ReaderMethod<R>> {
        self.bound.get(info)
    }

    pub fn converters(&self) -> &ConverterCache {
        &self.converters
    }

    fn lookup(&self, shape: &Shape) -> Option<ReaderMethod<R>> {
        let mut chain: Vec<ReaderInfo> = Vec::with_capacity(5);
        if let Some(provider_type) = &shape.provider_type {
            if let Some(target) = shape.target {
                chain.push(ReaderInfo::ProviderToType {
                    provider_type: provider_type.clone(),
                    target,
                });
            }
            chain.push(ReaderInfo::ProviderField {
                provider_type: provider_type.clone(),
            });
        }
        if !shape.data_type.is_empty() {
            chain.push(ReaderInfo::Field {
                field: shape.field,
                data_type: Some(shape.data_type.clone()),
            });
        }
        chain.push(ReaderInfo::Field {
            field: shape.field,
            data_type: None,
        });
        if let Some(target) = shape.target {
            chain.push(ReaderInfo::ToType { target });
        }
        chain
            .iter()
            .find_map(|info| self.bound.get(info).copied())
            .or(self.generic)
    }

    fn resolve(&self, shape: Shape) -> Option<ReaderMethod<R>> {
        if let Some(hit) = self.resolved.read().get(&shape) {
            return *hit;
        }
        let method = self.lookup(&shape);
        self.resolved.write().entry(shape).or_insert(method);
        method
    }

    /// Read column `index` of `row`, converted to `target` when given.
    pub fn read(&self, row: &R, index: usize, target: Option<ValueKind>) -> Result<Value> {
        let shape = Shape {
            provider_type: row.provider_field_type(index).map(CompactString::from),
            field: row.field_kind(index),
            data_type: CompactString::from(row.data_type_name(index).to_ascii_lowercase()),
            target,
        };
        let method = self.resolve(shape).ok_or_else(|| {
            GraftError::Conversion(format!(
                "{} has no reader for column `{}`",
                self.owner,
                row.column_name(index)
            ))
        })?;
        let value = (method.read)(row, index)?;

        let Some(target) = target else {
            return Ok(value);
        };
        let source = value.kind();
        if value.is_null() || source == target {
            return Ok(value);
        }
        let convert = self.converters.get_or_build(source, target).ok_or_else(|| {
            GraftError::Conversion(format!(
                "no conversion from {source} to {target} for column `{}`",
                row.column_name(index)
            ))
        })?;
        convert(value)
    }

    /// Read a whole row as a record named `table`, each column converted to
    /// the kind its declared type implies.
    pub fn read_record(&self, table: &str, row: &R) -> Result<Value> {
        let mut record = Record::new(table);
        for index in 0..row.column_count() {
            let target = match row.field_kind(index) {
                _ if row.data_type_name(index).is_empty() => None,
                ValueKind::Null => None,
                kind => Some(kind),
            };
            record.push(row.column_name(index), self.read(row, index, target)?);
        }
        Ok(Value::record(record))
    }
}

/// Registration surface handed to a driver while its capabilities are
/// negotiated.
pub struct ReaderBinder<'a, R> {
    owner: &'a str,
    methods: &'a [ReaderMethod<R>],
    readers: &'a mut FieldReaders<R>,
}

impl<'a, R: NativeRow> ReaderBinder<'a, R> {
    pub fn new(owner: &'a str, methods: &'a [ReaderMethod<R>], readers: &'a mut FieldReaders<R>) -> Self {
        Self {
            owner,
            methods,
            readers,
        }
    }

    fn method(&self, name: &str, must_exist: bool) -> Result<Option<ReaderMethod<R>>> {
        match self.methods.iter().find(|method| method.name == name) {
            Some(method) => Ok(Some(*method)),
            None if must_exist => Err(GraftError::Binding {
                owner: self.owner.to_string(),
                member: name.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn bind(&mut self, info: ReaderInfo, name: &str, must_exist: bool) -> Result<bool> {
        match self.method(name, must_exist)? {
            Some(method) => {
                self.readers.bound.insert(info, method);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Bind `method` for columns declared as `field`, optionally only for
    /// the given data type name.
    pub fn set_field(
        &mut self,
        field: ValueKind,
        data_type_name: Option<&str>,
        method: &str,
        must_exist: bool,
    ) -> Result<bool> {
        let info = ReaderInfo::Field {
            field,
            data_type: data_type_name.map(|name| CompactString::from(name.to_ascii_lowercase())),
        };
        self.bind(info, method, must_exist)
    }

    /// Bind `method` for values the driver stores as `provider_type`.
    pub fn set_provider_field(&mut self, provider_type: &str, method: &str, must_exist: bool) -> Result<bool> {
        let info = ReaderInfo::ProviderField {
            provider_type: provider_type.into(),
        };
        self.bind(info, method, must_exist)
    }

    /// Bind `method` for any column read into `target`.
    pub fn set_to_type_field(&mut self, target: ValueKind, method: &str, must_exist: bool) -> Result<bool> {
        self.bind(ReaderInfo::ToType { target }, method, must_exist)
    }

    /// Bind `method` for `provider_type` values read into `target`.
    pub fn set_provider_to_type_field(
        &mut self,
        provider_type: &str,
        target: ValueKind,
        method: &str,
        must_exist: bool,
    ) -> Result<bool> {
        let info = ReaderInfo::ProviderToType {
            provider_type: provider_type.into(),
            target,
        };
        self.bind(info, method, must_exist)
    }

    /// Convert values of kind `source` with `converter` whenever `target` is
    /// requested.
    pub fn set_type_conversion(&mut self, source: ValueKind, target: ValueKind, converter: Converter) {
        self.readers.converters.set(source, target, converter);
    }

    /// Getter used when no key in the fallback chain is bound.
    pub fn set_generic(&mut self, method: &str, must_exist: bool) -> Result<bool> {
        match self.method(method, must_exist)? {
            Some(method) => {
                self.readers.generic = Some(method);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
