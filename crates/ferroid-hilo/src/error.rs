//! Error types for HiLo identifier allocation.
//!
//! Every fallible operation in this crate returns [`Error`]. The type is
//! `Clone` because a single renewal result is shared by every caller that
//! joined it.
//!
//! ## Error Cases
//! - `InvalidArgument`: an allocator was constructed with an empty tag or an
//!   empty identity-parts separator.
//! - `NoDatabase`: no database was given and no default is configured.
//! - `Transport`: the lease client failed to acquire a new range.
//! - `MalformedLease`: the server answered with an unusable range.
//! - `Release`: returning an unused range to the server failed.

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `ferroid-hilo` can produce.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Rejected at construction time; never retried.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No explicit database was supplied and the conventions carry no
    /// default.
    #[error("No database was specified and no default database is configured")]
    NoDatabase,

    /// The lease client could not acquire a range (network or server error).
    #[error("Lease transport error: {context}")]
    Transport { context: String },

    /// The server returned a range that cannot be used (e.g. `high < low`).
    #[error("Malformed lease: {reason}")]
    MalformedLease { reason: String },

    /// Returning an unused range failed. Always best effort.
    #[error("Failed to return unused range: {context}")]
    Release { context: String },
}

impl Error {
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
        }
    }

    pub fn release(context: impl Into<String>) -> Self {
        Self::Release {
            context: context.into(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}
