//! Driver catalog for explicit dependency injection.
//!
//! The [`DriverCatalog`] maps URL schemes to backend kinds and backend kinds
//! to a dialect plus a connector. It is explicitly constructed and handed to
//! the transfer engine rather than living in a global, so tests can build
//! catalogs with fake connectors.
//!
//! # Design Rationale
//!
//! - **No global state**: registration happens in `with_builtins()` or by the caller
//! - **Capabilities without connecting**: the dialect answers capability
//!   questions, so a job can fail fast before opening a connection
//! - **Feature-gated**: MySQL is registered only with the `mysql` feature

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::config::{ConnectionDescriptor, DbKind};
use crate::drivers::{DialectImpl, MssqlAdapter, PostgresAdapter};
#[cfg(feature = "mysql")]
use crate::drivers::MysqlAdapter;
use crate::error::{Result, TransferError};

use super::traits::{Capabilities, DatabaseAdapter, Dialect};

/// Opens an adapter for a descriptor.
pub type Connector = Arc<
    dyn Fn(ConnectionDescriptor) -> BoxFuture<'static, Result<Box<dyn DatabaseAdapter>>>
        + Send
        + Sync,
>;

/// Wrap an async constructor as a [`Connector`].
pub fn connector<F, Fut, A>(open: F) -> Connector
where
    F: Fn(ConnectionDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<A>> + Send + 'static,
    A: DatabaseAdapter + 'static,
{
    Arc::new(move |descriptor: ConnectionDescriptor| {
        let opening = open(descriptor);
        async move {
            let adapter = opening.await?;
            Ok::<_, TransferError>(Box::new(adapter) as Box<dyn DatabaseAdapter>)
        }
        .boxed()
    })
}

#[derive(Clone)]
struct DriverEntry {
    dialect: DialectImpl,
    connector: Connector,
}

/// Registry of backend drivers.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = DriverCatalog::with_builtins();
/// let caps = catalog.capabilities(DbKind::Mssql)?;
/// let mut adapter = catalog.connect_url("postgres://loader@localhost/warehouse").await?;
/// ```
#[derive(Clone, Default)]
pub struct DriverCatalog {
    schemes: HashMap<String, DbKind>,
    drivers: HashMap<DbKind, DriverEntry>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with every compiled-in driver registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();

        catalog.register(
            DbKind::Postgres,
            &["postgresql", "postgres", "pg"],
            DialectImpl::Postgres(crate::drivers::PostgresDialect::new()),
            connector(PostgresAdapter::connect),
        );

        #[cfg(feature = "mysql")]
        catalog.register(
            DbKind::Mysql,
            &["mysql", "mariadb"],
            DialectImpl::Mysql(crate::drivers::MysqlDialect::new()),
            connector(MysqlAdapter::connect),
        );

        catalog.register(
            DbKind::Mssql,
            &["mssql", "mssqls", "sqlserver"],
            DialectImpl::Mssql(crate::drivers::MssqlDialect::new()),
            connector(MssqlAdapter::connect),
        );

        catalog
    }

    /// Register (or replace) a driver and the URL schemes that select it.
    pub fn register(
        &mut self,
        kind: DbKind,
        schemes: &[&str],
        dialect: DialectImpl,
        connector: Connector,
    ) {
        debug!("Registering {} driver", kind);
        for scheme in schemes {
            self.schemes.insert(scheme.to_ascii_lowercase(), kind);
        }
        self.drivers.insert(kind, DriverEntry { dialect, connector });
    }

    /// Whether a driver is registered for `kind`.
    pub fn has_driver(&self, kind: DbKind) -> bool {
        self.drivers.contains_key(&kind)
    }

    /// The backend a URL scheme selects.
    pub fn kind_for_scheme(&self, scheme: &str) -> Result<DbKind> {
        self.schemes
            .get(&scheme.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| {
                TransferError::Config(format!("no driver registered for scheme '{}'", scheme))
            })
    }

    fn entry(&self, kind: DbKind) -> Result<&DriverEntry> {
        self.drivers.get(&kind).ok_or_else(|| {
            TransferError::unsupported(kind.name(), "no driver registered for this backend")
        })
    }

    pub fn dialect(&self, kind: DbKind) -> Result<&DialectImpl> {
        Ok(&self.entry(kind)?.dialect)
    }

    pub fn capabilities(&self, kind: DbKind) -> Result<Capabilities> {
        Ok(self.entry(kind)?.dialect.capabilities())
    }

    /// Open a connection for `descriptor`.
    pub async fn connect(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseAdapter>> {
        let connector = self.entry(descriptor.kind())?.connector.clone();
        connector(descriptor).await
    }

    /// Parse `url` and open a connection. The URL scheme must be registered.
    pub async fn connect_url(&self, url: &str) -> Result<Box<dyn DatabaseAdapter>> {
        let descriptor = self.parse_url(url)?;
        self.connect(descriptor).await
    }

    /// Parse a connection URL whose scheme is registered in this catalog.
    pub fn parse_url(&self, url: &str) -> Result<ConnectionDescriptor> {
        let scheme = url.split("://").next().unwrap_or_default();
        self.kind_for_scheme(scheme)?;
        ConnectionDescriptor::from_url(url)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.schemes.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Remove every registration.
    pub fn clear(&mut self) {
        self.schemes.clear();
        self.drivers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::UpsertSupport;
    use crate::drivers::PostgresDialect;

    fn failing_connector() -> Connector {
        connector(|descriptor: ConnectionDescriptor| async move {
            Err::<PostgresAdapter, _>(TransferError::connection(
                "refused",
                format!("test connector for {}", descriptor.kind()),
            ))
        })
    }

    #[test]
    fn test_builtins_register_schemes() {
        let catalog = DriverCatalog::with_builtins();
        assert_eq!(catalog.kind_for_scheme("pg").unwrap(), DbKind::Postgres);
        assert_eq!(catalog.kind_for_scheme("MSSQLS").unwrap(), DbKind::Mssql);
        assert!(catalog.kind_for_scheme("oracle").is_err());
        assert!(catalog.has_driver(DbKind::Postgres));
        #[cfg(feature = "mysql")]
        assert_eq!(catalog.kind_for_scheme("mariadb").unwrap(), DbKind::Mysql);
    }

    #[test]
    fn test_capabilities_without_connecting() {
        let catalog = DriverCatalog::with_builtins();
        assert_eq!(
            catalog.capabilities(DbKind::Postgres).unwrap().upsert,
            UpsertSupport::Native
        );
        let mssql = catalog.capabilities(DbKind::Mssql).unwrap();
        assert_eq!(mssql.upsert, UpsertSupport::Unsupported);
        assert!(!mssql.stream_source);
    }

    #[test]
    fn test_clear_and_register() {
        let mut catalog = DriverCatalog::with_builtins();
        catalog.clear();
        assert!(catalog.schemes().is_empty());
        assert!(matches!(
            catalog.capabilities(DbKind::Postgres),
            Err(TransferError::Unsupported { .. })
        ));

        catalog.register(
            DbKind::Postgres,
            &["pg"],
            DialectImpl::Postgres(PostgresDialect::new()),
            failing_connector(),
        );
        assert_eq!(catalog.schemes(), vec!["pg".to_string()]);
        assert!(catalog.parse_url("postgres://localhost/db").is_err());
        assert!(catalog.parse_url("pg://localhost/db").is_ok());
    }

    #[tokio::test]
    async fn test_connect_uses_registered_connector() {
        let mut catalog = DriverCatalog::new();
        catalog.register(
            DbKind::Postgres,
            &["pg"],
            DialectImpl::Postgres(PostgresDialect::new()),
            failing_connector(),
        );
        let err = catalog.connect_url("pg://localhost/db").await.err().unwrap();
        assert!(matches!(err, TransferError::Connection { .. }));
    }
}
