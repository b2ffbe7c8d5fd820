//! A scripted [`LeaseClient`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::{Error, LeaseClient, LeaseRequest, LeaseResponse, ReleaseRequest, Result};

pub(crate) struct MockLeaseClient {
    server_tag: String,
    batch: i64,
    delay: Duration,
    next_low: Mutex<i64>,
    scripted: Mutex<VecDeque<(i64, i64)>>,
    failures_left: AtomicUsize,
    fail_releases: AtomicBool,
    acquisitions: AtomicUsize,
    requests: Mutex<Vec<(String, LeaseRequest)>>,
    releases: Mutex<Vec<(String, ReleaseRequest)>>,
}

impl MockLeaseClient {
    /// Hands out consecutive ranges of `batch` ids starting at 1.
    pub(crate) fn new(batch: i64) -> Self {
        Self {
            server_tag: "A".into(),
            batch,
            delay: Duration::ZERO,
            next_low: Mutex::new(1),
            scripted: Mutex::new(VecDeque::new()),
            failures_left: AtomicUsize::new(0),
            fail_releases: AtomicBool::new(false),
            acquisitions: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
        }
    }

    /// Serves these `(low, high)` pairs first, in order.
    pub(crate) fn with_ranges(mut self, ranges: impl IntoIterator<Item = (i64, i64)>) -> Self {
        self.scripted = Mutex::new(ranges.into_iter().collect());
        self
    }

    /// Sleeps before answering, so concurrent callers pile up behind one
    /// renewal.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_server_tag(mut self, server_tag: &str) -> Self {
        self.server_tag = server_tag.into();
        self
    }

    /// The next `n` acquisitions fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<(String, LeaseRequest)> {
        self.requests.lock().clone()
    }

    pub(crate) fn releases(&self) -> Vec<(String, ReleaseRequest)> {
        self.releases.lock().clone()
    }
}

impl LeaseClient for MockLeaseClient {
    async fn acquire(&self, database: &str, request: LeaseRequest) -> Result<LeaseResponse> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push((database.to_owned(), request.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::transport("server unavailable"));
        }

        let scripted = self.scripted.lock().pop_front();
        let (low, high) = scripted.unwrap_or_else(|| {
            let mut next_low = self.next_low.lock();
            let low = *next_low;
            *next_low += self.batch;
            (low, low + self.batch - 1)
        });

        Ok(LeaseResponse {
            prefix: format!("{}{}", request.tag, request.identity_parts_separator),
            low,
            high,
            last_size: high - low + 1,
            server_tag: self.server_tag.clone(),
            last_range_at: Utc::now(),
        })
    }

    async fn release(&self, database: &str, request: ReleaseRequest) -> Result<()> {
        self.releases.lock().push((database.to_owned(), request));
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(Error::release("server unavailable"));
        }
        Ok(())
    }
}
