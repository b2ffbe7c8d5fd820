use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Conventions, DatabaseRegistry, Error, LeaseClient, Result};

/// Entry point for identifier generation across databases.
///
/// Owns one [`DatabaseRegistry`] per database, created on first use. Call
/// [`Self::shutdown`] when the owning client is disposed so unused ranges are
/// handed back to the server.
///
/// Shutdown forgets every registry it returned ranges for, so a later call
/// starts over with fresh leases. Handles obtained earlier through
/// [`Self::for_database`] keep drawing from their old, already returned
/// ranges and must not be used after shutdown.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use ferroid_hilo::{ClientRegistry, Conventions, MemoryLeaseServer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferroid_hilo::Result<()> {
/// let registry = ClientRegistry::new(
///     Arc::new(MemoryLeaseServer::new("A")),
///     Arc::new(Conventions::new().with_default_database("northwind")),
/// );
///
/// assert_eq!(registry.id_for(None, "Users").await?, "users/1-A");
/// assert_eq!(registry.id_for(Some("archive"), "Users").await?, "users/1-A");
/// assert_eq!(registry.next_id_for(None, "Users").await?, 2);
///
/// registry.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ClientRegistry<C> {
    client: Arc<C>,
    conventions: Arc<Conventions>,
    databases: RwLock<HashMap<String, Arc<DatabaseRegistry<C>>>>,
    creation: Mutex<()>,
}

impl<C: LeaseClient> ClientRegistry<C> {
    pub fn new(client: Arc<C>, conventions: Arc<Conventions>) -> Self {
        Self {
            client,
            conventions,
            databases: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    pub fn conventions(&self) -> &Arc<Conventions> {
        &self.conventions
    }

    /// Generates a document identifier for `collection` in `database`, or in
    /// the default database if `database` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDatabase`] if no database can be resolved, or any
    /// error from the underlying allocator.
    pub async fn id_for(&self, database: Option<&str>, collection: &str) -> Result<String> {
        self.for_database(database)?.id_for(collection).await
    }

    /// Like [`Self::id_for`] but returns only the numeric part.
    ///
    /// # Errors
    ///
    /// See [`Self::id_for`].
    pub async fn next_id_for(&self, database: Option<&str>, collection: &str) -> Result<i64> {
        self.for_database(database)?.next_id_for(collection).await
    }

    /// Resolves the effective database and returns its registry, creating it
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDatabase`] if `database` is `None` (or empty) and
    /// no default database is configured.
    pub fn for_database(&self, database: Option<&str>) -> Result<Arc<DatabaseRegistry<C>>> {
        let database = self
            .conventions
            .effective_database(database)
            .ok_or(Error::NoDatabase)?;

        if let Some(registry) = self.databases.read().get(database) {
            return Ok(Arc::clone(registry));
        }

        let _creation = self.creation.lock();
        if let Some(registry) = self.databases.read().get(database) {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(DatabaseRegistry::new(
            database,
            Arc::clone(&self.client),
            Arc::clone(&self.conventions),
        ));
        self.databases
            .write()
            .insert(database.to_owned(), Arc::clone(&registry));
        Ok(registry)
    }

    /// The registry of `database`, if one was created.
    pub fn database(&self, database: &str) -> Option<Arc<DatabaseRegistry<C>>> {
        self.databases.read().get(database).cloned()
    }

    /// Returns the unused ranges held for every database. A failing database
    /// never prevents the others from being released.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn return_all_unused_ranges(&self) {
        let registries: Vec<_> = self.databases.read().values().cloned().collect();
        Self::return_ranges(registries).await;
    }

    /// Disposal hook for the owning client. Safe to call more than once.
    ///
    /// Unregisters every database before returning its ranges, so nothing
    /// handed back to the server can be drawn from again through this
    /// registry.
    pub async fn shutdown(&self) {
        let registries: Vec<_> = {
            let _creation = self.creation.lock();
            self.databases.write().drain().map(|(_, registry)| registry).collect()
        };

        #[cfg(feature = "tracing")]
        let count = registries.len();

        Self::return_ranges(registries).await;

        #[cfg(feature = "tracing")]
        tracing::info!(databases = count, "returned unused ranges");
    }

    async fn return_ranges(registries: Vec<Arc<DatabaseRegistry<C>>>) {
        for registry in registries {
            if let Err(_err) = registry.return_all_unused_ranges().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    database = registry.database(),
                    error = %_err,
                    "failed to return unused ranges"
                );
            }
        }
    }
}

impl<C> core::fmt::Debug for ClientRegistry<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("conventions", &self.conventions)
            .field("databases", &self.databases.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLeaseClient;

    fn registry(
        client: &Arc<MockLeaseClient>,
        conventions: Conventions,
    ) -> ClientRegistry<MockLeaseClient> {
        ClientRegistry::new(Arc::clone(client), Arc::new(conventions))
    }

    #[tokio::test]
    async fn resolves_effective_database() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new().with_default_database("main"));

        registry.id_for(None, "users").await?;
        registry.id_for(Some("archive"), "users").await?;
        registry.id_for(Some(""), "orders").await?;

        let databases: Vec<_> = client.requests().into_iter().map(|(db, _)| db).collect();
        assert_eq!(databases, ["main", "archive", "main"]);

        assert!(registry.database("main").is_some());
        assert!(registry.database("archive").is_some());
        assert!(registry.database("other").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_database_is_an_error() {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new());

        assert_eq!(registry.id_for(None, "users").await, Err(Error::NoDatabase));
        assert_eq!(client.acquisitions(), 0);
    }

    #[tokio::test]
    async fn same_database_shares_one_registry() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new().with_default_database("main"));

        let a = registry.for_database(None)?;
        let b = registry.for_database(Some("main"))?;
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(registry.id_for(None, "users").await?, "users/1-A");
        assert_eq!(registry.id_for(Some("main"), "users").await?, "users/2-A");
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new().with_default_database("main"));

        // Nothing allocated yet.
        registry.shutdown().await;
        registry.shutdown().await;
        assert!(client.releases().is_empty());

        registry.id_for(None, "users").await?;
        registry.shutdown().await;
        registry.shutdown().await;
        assert_eq!(client.releases().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn ids_after_shutdown_come_from_a_fresh_lease() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new().with_default_database("main"));

        assert_eq!(registry.id_for(None, "users").await?, "users/1-A");
        let before = registry.for_database(None)?;
        registry.shutdown().await;

        assert!(registry.database("main").is_none());
        assert_eq!(client.releases()[0].1.last, 1);

        // The returned tail 2..=10 is never drawn from again.
        assert_eq!(registry.id_for(None, "users").await?, "users/11-A");
        assert_eq!(client.acquisitions(), 2);
        assert!(!Arc::ptr_eq(&before, &registry.for_database(None)?));
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_continues_past_failing_databases() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let registry = registry(&client, Conventions::new());

        registry.id_for(Some("one"), "users").await?;
        registry.id_for(Some("two"), "users").await?;
        registry.id_for(Some("three"), "orders").await?;

        client.fail_releases(true);
        registry.return_all_unused_ranges().await;

        let mut released: Vec<_> = client.releases().into_iter().map(|(db, _)| db).collect();
        released.sort();
        assert_eq!(released, ["one", "three", "two"]);
        Ok(())
    }
}
