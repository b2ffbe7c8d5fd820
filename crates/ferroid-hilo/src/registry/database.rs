use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Conventions, LeaseClient, Result, TagAllocator};

/// The allocators of one database, keyed by tag.
///
/// Lookups of an existing allocator only take a shared read lock. Creation is
/// double-checked under a registry-wide mutex so at most one allocator ever
/// exists per tag.
///
/// When the identity-parts separator in the [`Conventions`] changes, every
/// allocator is evicted on the next call and its unused range returned; new
/// allocators are built lazily with the new separator.
pub struct DatabaseRegistry<C> {
    database: String,
    client: Arc<C>,
    conventions: Arc<Conventions>,
    allocators: RwLock<HashMap<String, TagAllocator<C>>>,
    separator: RwLock<String>,
    creation: Mutex<()>,
}

impl<C: LeaseClient> DatabaseRegistry<C> {
    pub fn new(database: impl Into<String>, client: Arc<C>, conventions: Arc<Conventions>) -> Self {
        let separator = conventions.identity_parts_separator();
        Self {
            database: database.into(),
            client,
            conventions,
            allocators: RwLock::new(HashMap::new()),
            separator: RwLock::new(separator),
            creation: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Generates a document identifier (e.g. `users/1-A`) for `collection`.
    ///
    /// # Errors
    ///
    /// Fails if the allocator cannot be constructed or its renewal fails.
    pub async fn id_for(&self, collection: &str) -> Result<String> {
        self.allocator_for(collection)
            .await?
            .generate_document_id()
            .await
    }

    /// Like [`Self::id_for`] but returns only the numeric part.
    ///
    /// # Errors
    ///
    /// See [`Self::id_for`].
    pub async fn next_id_for(&self, collection: &str) -> Result<i64> {
        Ok(self.allocator_for(collection).await?.next_id().await?.id)
    }

    /// Resolves (creating if needed) the allocator serving `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the derived tag or the current
    /// separator is empty.
    ///
    /// [`Error::InvalidArgument`]: crate::Error::InvalidArgument
    pub async fn allocator_for(&self, collection: &str) -> Result<TagAllocator<C>> {
        self.refresh_separator().await;
        let tag = self.conventions.tag_for(collection);
        self.get_or_create(tag)
    }

    /// The allocator currently registered for `tag`, if any.
    pub fn allocator(&self, tag: &str) -> Option<TagAllocator<C>> {
        self.allocators.read().get(tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.allocators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocators.read().is_empty()
    }

    /// Returns the unused range of every allocator, one after the other.
    ///
    /// Every allocator is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure once all allocators have been tried.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(database = %self.database))
    )]
    pub async fn return_all_unused_ranges(&self) -> Result<()> {
        let allocators: Vec<_> = self.allocators.read().values().cloned().collect();

        let mut first_err = None;
        for allocator in allocators {
            if let Err(err) = allocator.return_unused_range().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(tag = allocator.tag(), error = %err, "failed to return unused range");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn get_or_create(&self, tag: String) -> Result<TagAllocator<C>> {
        if let Some(allocator) = self.allocators.read().get(&tag) {
            return Ok(allocator.clone());
        }

        let _creation = self.creation.lock();
        if let Some(allocator) = self.allocators.read().get(&tag) {
            return Ok(allocator.clone());
        }

        let allocator = TagAllocator::new(
            self.database.clone(),
            tag.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.conventions),
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(database = %self.database, tag = %tag, "created allocator");

        self.allocators.write().insert(tag, allocator.clone());
        Ok(allocator)
    }

    /// Evicts every allocator if the separator changed since the last call.
    async fn refresh_separator(&self) {
        let current = self.conventions.identity_parts_separator();
        if *self.separator.read() == current {
            return;
        }

        let evicted: Vec<TagAllocator<C>> = {
            let _creation = self.creation.lock();
            let mut cached = self.separator.write();
            if *cached == current {
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::info!(
                database = %self.database,
                from = %cached.as_str(),
                to = %current,
                "identity parts separator changed, evicting allocators"
            );

            *cached = current;
            self.allocators.write().drain().map(|(_, a)| a).collect()
        };

        for allocator in evicted {
            if let Err(_err) = allocator.return_unused_range().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(tag = allocator.tag(), error = %_err, "failed to return unused range of evicted allocator");
            }
        }
    }
}

impl<C> core::fmt::Debug for DatabaseRegistry<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("database", &self.database)
            .field("tags", &self.allocators.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::mock::MockLeaseClient;
    use futures::future::join_all;

    fn registry(client: &Arc<MockLeaseClient>) -> (DatabaseRegistry<MockLeaseClient>, Arc<Conventions>) {
        let conventions = Arc::new(Conventions::new());
        let registry = DatabaseRegistry::new("db", Arc::clone(client), Arc::clone(&conventions));
        (registry, conventions)
    }

    #[tokio::test]
    async fn generates_ids_per_collection() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10).with_ranges([(1, 10), (1, 10)]));
        let (registry, _) = registry(&client);

        assert_eq!(registry.id_for("Users").await?, "users/1-A");
        assert_eq!(registry.id_for("users").await?, "users/2-A");
        assert_eq!(registry.id_for("LineItems").await?, "LineItems/1-A");
        assert_eq!(registry.next_id_for("users").await?, 3);

        assert_eq!(registry.len(), 2);
        assert!(registry.allocator("users").is_some());
        assert!(registry.allocator("Users").is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_resolution_creates_one_allocator() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(1000));
        let (registry, _) = registry(&client);
        let registry = Arc::new(registry);

        let tasks = (0..32).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.allocator_for("users").await })
        });

        let allocators = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Result<Vec<_>>>()?;

        let first = &allocators[0];
        assert!(allocators.iter().all(|a| a.ptr_eq(first)));
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn separator_change_rebuilds_allocators() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let (registry, conventions) = registry(&client);

        assert_eq!(registry.id_for("users").await?, "users/1-A");
        let before = registry.allocator("users").unwrap();

        conventions.set_identity_parts_separator("|");
        let id = registry.id_for("users").await?;
        let after = registry.allocator("users").unwrap();

        assert!(!before.ptr_eq(&after));
        assert_eq!(id, "users|11-A");

        let releases = client.releases();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].1.tag, "users");
        assert_eq!((releases[0].1.last, releases[0].1.end), (1, 10));

        let requests = client.requests();
        assert_eq!(requests.last().unwrap().1.identity_parts_separator, "|");
        Ok(())
    }

    #[tokio::test]
    async fn separator_change_ignores_release_failures() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let (registry, conventions) = registry(&client);
        registry.id_for("users").await?;
        registry.id_for("orders").await?;

        client.fail_releases(true);
        conventions.set_identity_parts_separator("-");

        assert_eq!(registry.id_for("users").await?, "users-21-A");
        assert_eq!(client.releases().len(), 2);
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_separator_is_rejected() {
        let client = Arc::new(MockLeaseClient::new(10));
        let (registry, conventions) = registry(&client);

        conventions.set_identity_parts_separator("");
        let err = registry.id_for("users").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn return_all_attempts_every_allocator() -> Result<()> {
        let client = Arc::new(MockLeaseClient::new(10));
        let (registry, _) = registry(&client);

        // Nothing registered: no-op, twice.
        registry.return_all_unused_ranges().await?;
        registry.return_all_unused_ranges().await?;
        assert!(client.releases().is_empty());

        registry.id_for("users").await?;
        registry.id_for("orders").await?;
        registry.id_for("companies").await?;

        client.fail_releases(true);
        let err = registry.return_all_unused_ranges().await.unwrap_err();
        assert!(matches!(err, Error::Release { .. }));
        assert_eq!(client.releases().len(), 3);
        Ok(())
    }
}
