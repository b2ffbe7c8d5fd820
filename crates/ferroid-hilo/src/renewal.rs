//! Single-flight coordination for lease renewals.
//!
//! A [`Renewal`] wraps a boxed future in [`Shared`], so it does nothing until
//! first awaited and every awaiting caller observes the same memoized result.
//! A [`RenewalSlot`] holds the most recently installed renewal and only lets a
//! new one in through a compare-and-set keyed on the renewal the caller last
//! saw, compared by `Arc` identity.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::Result;

pub(crate) struct Renewal {
    task: Shared<BoxFuture<'static, Result<()>>>,
}

impl Renewal {
    pub(crate) fn new(task: BoxFuture<'static, Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            task: task.shared(),
        })
    }

    /// Drives the renewal (or joins it if someone else already is) and
    /// returns its memoized outcome.
    pub(crate) async fn wait(&self) -> Result<()> {
        self.task.clone().await
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.peek().is_some()
    }
}

impl core::fmt::Debug for Renewal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Renewal")
            .field("finished", &self.is_finished())
            .finish()
    }
}

pub(crate) type Pending = Option<Arc<Renewal>>;

#[derive(Debug, Default)]
pub(crate) struct RenewalSlot {
    // Never held across an await.
    current: Mutex<Pending>,
}

impl RenewalSlot {
    pub(crate) fn load(&self) -> Pending {
        self.current.lock().clone()
    }

    /// Installs `next` if the slot still holds `expected`. On failure returns
    /// whatever is installed now.
    pub(crate) fn compare_and_set(
        &self,
        expected: &Pending,
        next: Arc<Renewal>,
    ) -> core::result::Result<(), Pending> {
        let mut current = self.current.lock();
        if same(&current, expected) {
            *current = Some(next);
            Ok(())
        } else {
            Err(current.clone())
        }
    }
}

fn same(a: &Pending, b: &Pending) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
