//! Driver registration
//!
//! A [`DriverRegistry`] maps driver names to [`TxDriver`]s. Tests that want
//! to reason about their drivers independently create their own registry;
//! [`register`] and [`open`] use one process-wide instance.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use crate::backends::{Backend, BackendRegistry};
use crate::config::TxDbConfig;
use crate::conn::Connection;
use crate::driver::TxDriver;
use crate::error::{TxDbError, TxDbResult};
use crate::options::ConnOption;

static GLOBAL: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::new);

/// Named transactional drivers
pub struct DriverRegistry {
    drivers: DashMap<String, TxDriver>,
    backends: RwLock<BackendRegistry>,
}

impl DriverRegistry {
    /// Create a registry that knows the built-in backends
    pub fn new() -> Self {
        Self::with_backends(BackendRegistry::with_builtin(Default::default()))
    }

    pub fn with_backends(backends: BackendRegistry) -> Self {
        Self {
            drivers: DashMap::new(),
            backends: RwLock::new(backends),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static DriverRegistry {
        &GLOBAL
    }

    /// Make a backend available under a kind name
    pub fn register_backend(&self, kind: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends.write().register(kind, backend);
    }

    /// Register a driver name for a backend kind and data source name.
    ///
    /// An empty `kind` is detected from the scheme of `dsn`. Nothing is
    /// opened until the first [`DriverRegistry::open`].
    pub fn register(&self, name: &str, kind: &str, dsn: &str, options: Vec<ConnOption>) -> TxDbResult<TxDriver> {
        let backend = self.backends.read().resolve(kind, dsn)?;
        self.insert(name, TxDriver::new(backend, dsn, options))
    }

    /// Register a driver configured by a [`TxDbConfig`].
    ///
    /// The configured pool settings replace those of backends that pool
    /// connections; other backends are used as registered.
    pub fn register_with_config(&self, name: &str, kind: &str, dsn: &str, config: &TxDbConfig) -> TxDbResult<TxDriver> {
        let backend = self.backends.read().resolve(kind, dsn)?;
        let backend = backend.with_pool(config.get_pool()).unwrap_or(backend);
        self.insert(name, TxDriver::new(backend, dsn, config.options()))
    }

    fn insert(&self, name: &str, driver: TxDriver) -> TxDbResult<TxDriver> {
        match self.drivers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TxDbError::DuplicateDriver(name.to_string())),
            Entry::Vacant(entry) => {
                info!("Registered driver '{}' ({})", name, driver.backend_kind());
                entry.insert(driver.clone());
                Ok(driver)
            }
        }
    }

    pub fn driver(&self, name: &str) -> Option<TxDriver> {
        self.drivers.get(name).map(|driver| driver.clone())
    }

    /// Open `identifier` on the driver registered as `name`
    pub async fn open(&self, name: &str, identifier: &str) -> TxDbResult<Connection> {
        let driver = self
            .driver(name)
            .ok_or_else(|| TxDbError::UnknownDriver(name.to_string()))?;
        driver.open(identifier).await
    }

    pub fn driver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a driver on the process-wide registry
pub fn register(name: &str, kind: &str, dsn: &str, options: Vec<ConnOption>) -> TxDbResult<TxDriver> {
    DriverRegistry::global().register(name, kind, dsn, options)
}

/// Open a logical connection on the process-wide registry
pub async fn open(name: &str, identifier: &str) -> TxDbResult<Connection> {
    DriverRegistry::global().open(name, identifier).await
}
