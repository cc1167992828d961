//! Provider binding.
//!
//! A driver plugs in through [`ProviderAdapter`]: it names its row type's
//! getters and binds them to reader keys once, when the provider is first
//! used. [`DynamicProvider`] caches the negotiated capabilities and opens
//! connections; [`ProviderRegistry`] resolves providers by name.

mod convert;
pub mod memory;
mod readers;

pub use convert::{Converter, ConverterCache};
pub use readers::{FieldReaders, NativeRow, ReaderBinder, ReaderInfo, ReaderMethod};

use compact_str::CompactString;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use crate::error::{GraftError, Result};
use crate::exec::{AsyncConnection, Connection};
use crate::graft_trace_provider;

/// Driver-specific hooks.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Native row type the driver reads from.
    type Row: NativeRow;

    /// Name the provider is registered under.
    fn name(&self) -> &str;

    fn connection_type_name(&self) -> &str;

    fn reader_type_name(&self) -> &str;

    /// Getters available on [`Self::Row`].
    fn reader_methods(&self) -> Vec<ReaderMethod<Self::Row>>;

    /// Bind field readers. Runs once per provider, on first use.
    fn on_connection_type_created(&self, binder: &mut ReaderBinder<'_, Self::Row>) -> Result<()>;

    /// Open a blocking connection.
    fn open(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<Self::Row>>,
    ) -> Result<Box<dyn Connection>>;

    /// Open an async connection.
    fn open_async(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<Self::Row>>,
    ) -> Result<Box<dyn AsyncConnection>> {
        let _ = (connection_string, readers);
        Err(GraftError::ExecutionError(format!(
            "provider `{}` has no async connections",
            self.name()
        )))
    }
}

/// Object-safe provider surface.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn connection_type_name(&self) -> &str;

    fn reader_type_name(&self) -> &str;

    fn create_connection(&self, connection_string: &str) -> Result<Box<dyn Connection>>;

    fn create_async_connection(&self, connection_string: &str) -> Result<Box<dyn AsyncConnection>>;
}

/// A provider over an adapter, with capabilities negotiated on first use.
pub struct DynamicProvider<A: ProviderAdapter> {
    adapter: A,
    capabilities: OnceLock<Arc<FieldReaders<A::Row>>>,
}

impl<A: ProviderAdapter> core::fmt::Debug for DynamicProvider<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DynamicProvider")
            .field("name", &self.adapter.name())
            .field("negotiated", &self.capabilities.get().is_some())
            .finish()
    }
}

impl<A: ProviderAdapter> DynamicProvider<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            capabilities: OnceLock::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Field readers for this provider, negotiating them on first call.
    ///
    /// A failed negotiation is not cached; the next call retries.
    pub fn capabilities(&self) -> Result<Arc<FieldReaders<A::Row>>> {
        if let Some(readers) = self.capabilities.get() {
            return Ok(readers.clone());
        }
        let owner = self.adapter.reader_type_name();
        let methods = self.adapter.reader_methods();
        let mut readers = FieldReaders::new(owner);
        self.adapter
            .on_connection_type_created(&mut ReaderBinder::new(owner, &methods, &mut readers))?;
        graft_trace_provider!("negotiated", self.adapter.name());
        Ok(self.capabilities.get_or_init(|| Arc::new(readers)).clone())
    }
}

impl<A: ProviderAdapter> DataProvider for DynamicProvider<A> {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    fn connection_type_name(&self) -> &str {
        self.adapter.connection_type_name()
    }

    fn reader_type_name(&self) -> &str {
        self.adapter.reader_type_name()
    }

    fn create_connection(&self, connection_string: &str) -> Result<Box<dyn Connection>> {
        let readers = self.capabilities()?;
        self.adapter.open(connection_string, readers)
    }

    fn create_async_connection(&self, connection_string: &str) -> Result<Box<dyn AsyncConnection>> {
        let readers = self.capabilities()?;
        self.adapter.open_async(connection_string, readers)
    }
}

/// Providers by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<CompactString, Arc<dyn DataProvider>>>,
}

impl core::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own name, replacing any previous one.
    pub fn register(&self, provider: Arc<dyn DataProvider>) {
        let name = CompactString::from(provider.name());
        graft_trace_provider!("registered", name);
        self.providers.write().insert(name, provider);
    }

    /// Wrap `adapter` in a [`DynamicProvider`] and register it.
    pub fn register_adapter<A: ProviderAdapter>(&self, adapter: A) {
        self.register(Arc::new(DynamicProvider::new(adapter)));
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DataProvider>> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GraftError::UnknownProvider(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<CompactString> {
        let mut names: Vec<_> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryAdapter, MemoryDatabase};
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inner: MemoryAdapter,
        negotiations: Arc<AtomicUsize>,
    }

    impl ProviderAdapter for Counting {
        type Row = <MemoryAdapter as ProviderAdapter>::Row;

        fn name(&self) -> &str {
            "counting"
        }

        fn connection_type_name(&self) -> &str {
            self.inner.connection_type_name()
        }

        fn reader_type_name(&self) -> &str {
            self.inner.reader_type_name()
        }

        fn reader_methods(&self) -> Vec<ReaderMethod<Self::Row>> {
            self.inner.reader_methods()
        }

        fn on_connection_type_created(&self, binder: &mut ReaderBinder<'_, Self::Row>) -> Result<()> {
            self.negotiations.fetch_add(1, Ordering::SeqCst);
            self.inner.on_connection_type_created(binder)
        }

        fn open(
            &self,
            connection_string: &str,
            readers: Arc<FieldReaders<Self::Row>>,
        ) -> Result<Box<dyn Connection>> {
            self.inner.open(connection_string, readers)
        }
    }

    #[test]
    fn capabilities_are_negotiated_once() {
        let db = Arc::new(MemoryDatabase::new());
        db.create_table("numbers", &[("n", "INTEGER")]);
        db.insert("numbers", vec![Value::Int(1)]).unwrap();

        let negotiations = Arc::new(AtomicUsize::new(0));
        let provider = DynamicProvider::new(Counting {
            inner: MemoryAdapter::new().with_database("main", db),
            negotiations: negotiations.clone(),
        });
        for _ in 0..3 {
            let mut conn = provider.create_connection("main").unwrap();
            assert_eq!(conn.fetch_table("numbers").unwrap().len(), 1);
        }
        assert_eq!(negotiations.load(Ordering::SeqCst), 1);
        assert!(matches!(
            provider.create_async_connection("main"),
            Err(GraftError::ExecutionError(_))
        ));
    }

    #[test]
    fn unknown_provider_is_reported() {
        let registry = ProviderRegistry::new();
        registry.register_adapter(MemoryAdapter::new());
        assert!(registry.contains("memory"));
        assert_eq!(registry.names(), vec![CompactString::from("memory")]);
        match registry.resolve("oracle") {
            Err(GraftError::UnknownProvider(name)) => assert_eq!(name, "oracle"),
            other => panic!("unexpected: {:?}", other.map(|p| p.name().to_string())),
        }
    }
}
