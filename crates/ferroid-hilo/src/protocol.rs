//! # Lease protocol
//!
//! The two requests an allocator sends to the server, their wire encoding,
//! and the [`LeaseClient`] trait a transport implements to carry them.
//!
//! ## Acquisition
//!
//! `GET /databases/{db}/hilo/next?tag=..&lastBatchSize=..&lastRangeAt=..&identityPartsSeparator=..&lastMax=..`
//!
//! A read: re-sending the same `lastMax` after a client-side timeout simply
//! yields the next unconsumed range. The JSON answer decodes into
//! [`LeaseResponse`].
//!
//! ## Return
//!
//! `PUT /databases/{db}/hilo/return?tag=..&last=..&end=..`
//!
//! A write with no meaningful body. Lets the server hand the unused tail of a
//! range to another client.

use core::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parameters of a lease acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub tag: String,
    /// Size of the previous lease; the server uses it to size the next one.
    pub last_batch_size: i64,
    /// When the previous lease was granted. `None` if never leased.
    pub last_range_at: Option<DateTime<Utc>>,
    pub identity_parts_separator: String,
    /// Upper bound of the exhausted range, a low watermark for the server.
    pub last_max: i64,
}

impl LeaseRequest {
    /// Query string, without the leading `?`.
    pub fn to_query(&self) -> String {
        let last_range_at = self
            .last_range_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_default();

        let mut query = String::new();
        push_param(&mut query, "tag", &self.tag);
        push_param(&mut query, "lastBatchSize", &self.last_batch_size.to_string());
        push_param(&mut query, "lastRangeAt", &last_range_at);
        push_param(
            &mut query,
            "identityPartsSeparator",
            &self.identity_parts_separator,
        );
        push_param(&mut query, "lastMax", &self.last_max.to_string());
        query
    }

    /// Request path relative to the server's base URL.
    pub fn path(&self, database: &str) -> String {
        format!(
            "/databases/{}/hilo/next?{}",
            encode(database),
            self.to_query()
        )
    }
}

/// The server's answer to a [`LeaseRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseResponse {
    /// Prepended to every identifier formatted from this lease.
    pub prefix: String,
    pub low: i64,
    pub high: i64,
    /// Batch size to report back on the next request.
    pub last_size: i64,
    /// The server node that issued the lease.
    pub server_tag: String,
    pub last_range_at: DateTime<Utc>,
}

/// Parameters of a range return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub tag: String,
    /// The cursor position at the time of return.
    pub last: i64,
    /// Upper bound of the range being returned.
    pub end: i64,
}

impl ReleaseRequest {
    pub fn to_query(&self) -> String {
        let mut query = String::new();
        push_param(&mut query, "tag", &self.tag);
        push_param(&mut query, "last", &self.last.to_string());
        push_param(&mut query, "end", &self.end.to_string());
        query
    }

    pub fn path(&self, database: &str) -> String {
        format!(
            "/databases/{}/hilo/return?{}",
            encode(database),
            self.to_query()
        )
    }
}

/// The transport used to reach the server.
///
/// Implementations map failures to [`Error::Transport`] (acquisition) or
/// [`Error::Release`] (return). Retries and topology handling, if any, live
/// behind this trait; the allocator only sees the final outcome.
///
/// [`Error::Transport`]: crate::Error::Transport
/// [`Error::Release`]: crate::Error::Release
pub trait LeaseClient: Send + Sync + 'static {
    /// Leases the next range for `request.tag` in `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be completed.
    fn acquire(
        &self,
        database: &str,
        request: LeaseRequest,
    ) -> impl Future<Output = Result<LeaseResponse>> + Send;

    /// Hands the unused tail of a range back to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be completed. Callers treat
    /// this as best effort.
    fn release(
        &self,
        database: &str,
        request: ReleaseRequest,
    ) -> impl Future<Output = Result<()>> + Send;
}

fn push_param(query: &mut String, key: &str, value: &str) {
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(key);
    query.push('=');
    query.push_str(&encode(value));
}

/// Everything outside the RFC 3986 unreserved set is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}
