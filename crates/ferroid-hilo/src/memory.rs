use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::{LeaseClient, LeaseRequest, LeaseResponse, ReleaseRequest, Result};

/// Size of the first lease handed to a tag.
pub const DEFAULT_INITIAL_BATCH_SIZE: i64 = 32;

/// Upper bound on the adaptive lease size.
pub const DEFAULT_MAX_BATCH_SIZE: i64 = 1024 * 1024;

/// Leases renewed faster than this are doubled in size.
pub const DEFAULT_GROWTH_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct TagState {
    /// Highest id ever handed out for this tag.
    high: i64,
}

/// An in-process [`LeaseClient`] that plays the server's role.
///
/// Hands out disjoint, ascending ranges per `(database, tag)`. A tag that
/// renews quickly gets a lease twice the size of its previous one; a tag that
/// has been idle longer than the growth window starts over at the initial
/// size. A returned range whose `end` is still the latest one handed out is
/// rewound so the tail is reissued.
///
/// Useful for tests, benchmarks and single-process deployments.
///
/// # Example
/// ```
/// use ferroid_hilo::{LeaseClient, LeaseRequest, MemoryLeaseServer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferroid_hilo::Result<()> {
/// let server = MemoryLeaseServer::new("A");
/// let request = LeaseRequest {
///     tag: "users".into(),
///     last_batch_size: 0,
///     last_range_at: None,
///     identity_parts_separator: "/".into(),
///     last_max: 0,
/// };
/// let lease = server.acquire("northwind", request).await?;
/// assert_eq!((lease.low, lease.high), (1, 32));
/// assert_eq!(lease.prefix, "users/");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryLeaseServer {
    server_tag: String,
    initial_batch_size: i64,
    max_batch_size: i64,
    growth_window: Duration,
    tags: Mutex<HashMap<(String, String), TagState>>,
}

impl MemoryLeaseServer {
    pub fn new(server_tag: impl Into<String>) -> Self {
        Self {
            server_tag: server_tag.into(),
            initial_batch_size: DEFAULT_INITIAL_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            growth_window: DEFAULT_GROWTH_WINDOW,
            tags: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_initial_batch_size(mut self, size: i64) -> Self {
        self.initial_batch_size = size.max(1);
        self
    }

    pub fn with_max_batch_size(mut self, size: i64) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_growth_window(mut self, window: Duration) -> Self {
        self.growth_window = window;
        self
    }

    /// Highest id handed out so far for `tag` in `database`.
    pub fn high_watermark(&self, database: &str, tag: &str) -> i64 {
        self.tags
            .lock()
            .get(&(database.to_owned(), tag.to_owned()))
            .map_or(0, |state| state.high)
    }

    fn batch_size(&self, request: &LeaseRequest) -> i64 {
        let recent = request.last_range_at.is_some_and(|at| {
            Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|elapsed| elapsed < self.growth_window)
        });

        let size = if recent && request.last_batch_size > 0 {
            request.last_batch_size.saturating_mul(2)
        } else {
            self.initial_batch_size
        };
        size.clamp(1, self.max_batch_size.max(self.initial_batch_size))
    }
}

impl LeaseClient for MemoryLeaseServer {
    async fn acquire(&self, database: &str, request: LeaseRequest) -> Result<LeaseResponse> {
        let size = self.batch_size(&request);

        let (low, high) = {
            let mut tags = self.tags.lock();
            let state = tags
                .entry((database.to_owned(), request.tag.clone()))
                .or_default();
            let low = state.high.max(request.last_max) + 1;
            let high = low + size - 1;
            state.high = high;
            (low, high)
        };

        Ok(LeaseResponse {
            prefix: format!("{}{}", request.tag, request.identity_parts_separator),
            low,
            high,
            last_size: size,
            server_tag: self.server_tag.clone(),
            last_range_at: Utc::now(),
        })
    }

    async fn release(&self, database: &str, request: ReleaseRequest) -> Result<()> {
        let mut tags = self.tags.lock();
        if let Some(state) = tags.get_mut(&(database.to_owned(), request.tag)) {
            // Only the most recent lease can be rewound; anything older has
            // already been superseded.
            if state.high == request.end && request.last < request.end {
                state.high = request.last;
            }
        }
        Ok(())
    }
}
