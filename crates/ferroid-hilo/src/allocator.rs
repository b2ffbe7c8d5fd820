use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::FutureExt;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    conventions::Conventions,
    error::{Error, Result},
    protocol::{LeaseClient, LeaseRequest, LeaseResponse, ReleaseRequest},
    range::Range,
    renewal::{Renewal, RenewalSlot},
};

/// An identifier drawn from a lease, together with the server node that
/// issued the lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NextId {
    pub id: i64,
    pub server_tag: String,
}

/// Everything learned from one lease response.
///
/// Replaced as a whole on every successful renewal, so readers never see a
/// range paired with another lease's prefix or batch size.
#[derive(Debug)]
pub struct Lease {
    range: Range,
    prefix: String,
    last_batch_size: i64,
    last_range_at: Option<DateTime<Utc>>,
}

impl Lease {
    fn initial() -> Self {
        Self {
            range: Range::empty(),
            prefix: String::new(),
            last_batch_size: 0,
            last_range_at: None,
        }
    }

    fn from_response(response: LeaseResponse) -> Result<Self> {
        if response.high < response.low {
            return Err(Error::MalformedLease {
                reason: format!(
                    "high ({}) is below low ({})",
                    response.high, response.low
                ),
            });
        }

        Ok(Self {
            range: Range::new(response.low, response.high, response.server_tag),
            prefix: response.prefix,
            last_batch_size: response.last_size,
            last_range_at: Some(response.last_range_at),
        })
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn server_tag(&self) -> &str {
        self.range.server_tag()
    }

    pub fn last_batch_size(&self) -> i64 {
        self.last_batch_size
    }

    /// `None` until the first lease has been granted.
    pub fn last_range_at(&self) -> Option<DateTime<Utc>> {
        self.last_range_at
    }

    pub fn is_leased(&self) -> bool {
        self.last_range_at.is_some()
    }
}

struct Inner<C> {
    database: String,
    tag: String,
    client: Arc<C>,
    conventions: Arc<Conventions>,
    lease: ArcSwap<Lease>,
    pending: RenewalSlot,
}

impl<C: LeaseClient> Inner<C> {
    fn lease(&self) -> Arc<Lease> {
        self.lease.load_full()
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(database = %self.database, tag = %self.tag))
    )]
    async fn renew(self: Arc<Self>) -> Result<()> {
        let current = self.lease();
        let request = LeaseRequest {
            tag: self.tag.clone(),
            last_batch_size: current.last_batch_size,
            last_range_at: current.last_range_at,
            identity_parts_separator: self.conventions.identity_parts_separator(),
            last_max: current.range.max(),
        };

        let response = match self.client.acquire(&self.database, request).await {
            Ok(response) => response,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "lease acquisition failed");
                return Err(err);
            }
        };

        let next = Lease::from_response(response)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            low = next.range.min(),
            high = next.range.max(),
            server_tag = next.server_tag(),
            "leased new range"
        );

        self.lease.store(Arc::new(next));
        Ok(())
    }
}

/// Hands out identifiers for one tag of one database from leased ranges.
///
/// The fast path is an atomic load of the current lease followed by a single
/// atomic increment on its [`Range`]; it never takes a lock. When
/// the range runs out, exactly one caller asks the server for the next lease
/// while every other caller that ran out waits for that same request instead
/// of issuing its own.
///
/// Cloning is cheap and yields a handle to the same allocator.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use ferroid_hilo::{Conventions, MemoryLeaseServer, TagAllocator};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferroid_hilo::Result<()> {
/// let server = Arc::new(MemoryLeaseServer::new("A"));
/// let allocator = TagAllocator::new("northwind", "users", server, Arc::new(Conventions::new()))?;
///
/// assert_eq!(allocator.generate_document_id().await?, "users/1-A");
/// assert_eq!(allocator.generate_document_id().await?, "users/2-A");
/// # Ok(())
/// # }
/// ```
pub struct TagAllocator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for TagAllocator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: LeaseClient> TagAllocator<C> {
    /// Creates an allocator that has not leased anything yet; the first call
    /// to [`Self::next_id`] requests the first range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the database, the tag or the
    /// configured identity-parts separator is empty.
    pub fn new(
        database: impl Into<String>,
        tag: impl Into<String>,
        client: Arc<C>,
        conventions: Arc<Conventions>,
    ) -> Result<Self> {
        let database = database.into();
        let tag = tag.into();

        if database.is_empty() {
            return Err(Error::invalid_argument("database must not be empty"));
        }
        if tag.is_empty() {
            return Err(Error::invalid_argument("tag must not be empty"));
        }
        if conventions.identity_parts_separator().is_empty() {
            return Err(Error::invalid_argument(
                "identity parts separator must not be empty",
            ));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                database,
                tag,
                client,
                conventions,
                lease: ArcSwap::from_pointee(Lease::initial()),
                pending: RenewalSlot::default(),
            }),
        })
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Snapshot of the current lease.
    pub fn lease(&self) -> Arc<Lease> {
        self.inner.lease()
    }

    /// Returns the next identifier, leasing a new range first if the current
    /// one is used up.
    ///
    /// # Errors
    ///
    /// Returns the lease client's error if this caller ran a renewal and it
    /// failed. Callers that merely waited on someone else's failed renewal
    /// retry instead of failing.
    pub async fn next_id(&self) -> Result<NextId> {
        let inner = &self.inner;
        loop {
            let observed = inner.lease();
            if let Some(id) = observed.range.increment() {
                return Ok(NextId {
                    id,
                    server_tag: observed.range.server_tag().to_owned(),
                });
            }

            let observed_pending = inner.pending.load();
            if let Some(pending) = &observed_pending {
                let _ = pending.wait().await;
                if !Arc::ptr_eq(&inner.lease(), &observed) {
                    continue;
                }
            }

            let renewal = Renewal::new(Arc::clone(inner).renew().boxed());
            match inner
                .pending
                .compare_and_set(&observed_pending, Arc::clone(&renewal))
            {
                // Ours to run. Loop without re-checking the range so a
                // failure always goes through a fresh compare-and-set.
                Ok(()) => renewal.wait().await?,
                Err(installed) => {
                    if let Some(installed) = installed {
                        let _ = installed.wait().await;
                    }
                }
            }
        }
    }

    /// `{prefix}{id}-{server_tag}`, using the most recently learned prefix.
    pub fn format_document_id(&self, id: i64, server_tag: &str) -> String {
        format!("{}{}-{}", self.inner.lease().prefix, id, server_tag)
    }

    /// Returns a complete document identifier such as `users/42-A`.
    ///
    /// # Errors
    ///
    /// See [`Self::next_id`].
    pub async fn generate_document_id(&self) -> Result<String> {
        let NextId { id, server_tag } = self.next_id().await?;
        Ok(self.format_document_id(id, &server_tag))
    }

    /// Tells the server which part of the current range was never handed
    /// out so it can be reissued. Does nothing if no range was ever leased.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Release`] if the request failed. Callers treat this
    /// as best effort.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(database = %self.inner.database, tag = %self.inner.tag))
    )]
    pub async fn return_unused_range(&self) -> Result<()> {
        let lease = self.inner.lease();
        if !lease.is_leased() {
            return Ok(());
        }

        let request = ReleaseRequest {
            tag: self.inner.tag.clone(),
            last: lease.range.current(),
            end: lease.range.max(),
        };
        self.inner.client.release(&self.inner.database, request).await
    }

    /// `true` if both handles point at the same allocator.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C> core::fmt::Debug for TagAllocator<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagAllocator")
            .field("database", &self.inner.database)
            .field("tag", &self.inner.tag)
            .field("lease", &*self.inner.lease.load())
            .finish_non_exhaustive()
    }
}
