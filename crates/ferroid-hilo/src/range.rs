use portable_atomic::{AtomicI64, Ordering};

/// A leased interval `[min, max]` of identifiers plus the cursor used to hand
/// them out locally.
///
/// The bounds never change once the range exists. The cursor starts at
/// `min - 1` and is advanced by exactly one per allocation with an atomic
/// fetch-and-add, so every caller that is handed a value owns it exclusively.
///
/// Callers keep advancing the cursor after exhaustion. The raw cursor may
/// therefore wrap when `max` sits next to `i64::MAX`; a wrapped cursor is
/// below the starting value and still reads as exhausted.
///
/// A range is never reused after exhaustion; the owning allocator replaces it
/// with a fresh one built from the next lease.
///
/// # Example
/// ```
/// use ferroid_hilo::Range;
///
/// let range = Range::new(1, 3, "A");
/// assert_eq!(range.increment(), Some(1));
/// assert_eq!(range.increment(), Some(2));
/// assert_eq!(range.increment(), Some(3));
/// assert!(range.is_exhausted());
/// assert_eq!(range.increment(), None);
/// ```
#[derive(Debug)]
pub struct Range {
    min: i64,
    max: i64,
    #[cfg(feature = "cache-padded")]
    cursor: crossbeam_utils::CachePadded<AtomicI64>,
    #[cfg(not(feature = "cache-padded"))]
    cursor: AtomicI64,
    server_tag: String,
}

impl Range {
    /// Creates a range over `[min, max]` issued by the server node
    /// `server_tag`.
    pub fn new(min: i64, max: i64, server_tag: impl Into<String>) -> Self {
        let cursor = Self::start_of(min);
        Self {
            min,
            max,
            #[cfg(feature = "cache-padded")]
            cursor: crossbeam_utils::CachePadded::new(AtomicI64::new(cursor)),
            #[cfg(not(feature = "cache-padded"))]
            cursor: AtomicI64::new(cursor),
            server_tag: server_tag.into(),
        }
    }

    #[inline]
    fn start_of(min: i64) -> i64 {
        min.saturating_sub(1)
    }

    /// The placeholder held by an allocator that has not leased yet. Its
    /// first increment already lands past `max`.
    pub fn empty() -> Self {
        Self::new(1, 0, String::new())
    }

    /// Advances the cursor and returns the value it now points at, or `None`
    /// if the range is exhausted.
    ///
    /// Never panics and never hands out a value outside `[min, max]`, even
    /// when `max` is `i64::MAX`.
    #[inline]
    pub fn increment(&self) -> Option<i64> {
        // `fetch_add` wraps on overflow instead of panicking.
        let prev = self.cursor.fetch_add(1, Ordering::AcqRel);
        (prev >= Self::start_of(self.min) && prev < self.max).then(|| prev + 1)
    }

    /// Cheap pre-check: `true` once the cursor has reached `max`.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.current() >= self.max
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// The last value handed out (or `min - 1` if none has been). Capped at
    /// `max` once the range is exhausted.
    pub fn current(&self) -> i64 {
        let raw = self.cursor.load(Ordering::Acquire);
        if raw < Self::start_of(self.min) {
            // wrapped past i64::MAX
            self.max
        } else {
            raw.min(self.max)
        }
    }

    pub fn server_tag(&self) -> &str {
        &self.server_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread::scope;

    #[test]
    fn cursor_starts_before_min() {
        let range = Range::new(10, 20, "A");
        assert_eq!(range.current(), 9);
        assert!(!range.is_exhausted());
        assert_eq!(range.increment(), Some(10));
    }

    #[test]
    fn empty_range_is_exhausted_immediately() {
        let range = Range::empty();
        assert!(range.is_exhausted());
        assert_eq!(range.increment(), None);
        assert_eq!(range.current(), range.max());
    }

    #[test]
    fn exhaustion_is_reported_at_max() {
        let range = Range::new(1, 2, "A");
        range.increment();
        assert!(!range.is_exhausted());
        range.increment();
        assert!(range.is_exhausted());
    }

    #[test]
    fn range_ending_at_i64_max_never_wraps_back_in() {
        let range = Range::new(i64::MAX - 1, i64::MAX, "A");
        assert_eq!(range.increment(), Some(i64::MAX - 1));
        assert_eq!(range.increment(), Some(i64::MAX));

        // The raw cursor wraps here; every later call must still see an
        // exhausted range.
        for _ in 0..4 {
            assert_eq!(range.increment(), None);
            assert!(range.is_exhausted());
            assert_eq!(range.current(), i64::MAX);
        }
    }

    #[test]
    fn concurrent_increments_never_collide() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1024;

        let range = Arc::new(Range::new(1, (THREADS * PER_THREAD) as i64, "A"));
        let seen = parking_lot::Mutex::new(HashSet::with_capacity(THREADS * PER_THREAD));

        scope(|s| {
            for _ in 0..THREADS {
                let range = Arc::clone(&range);
                let seen = &seen;
                s.spawn(move || {
                    let mut local = Vec::with_capacity(PER_THREAD);
                    let mut last = 0;
                    for _ in 0..PER_THREAD {
                        let id = range.increment().unwrap();
                        assert!(id > last, "ids must increase per observer");
                        assert!(id >= range.min() && id <= range.max());
                        last = id;
                        local.push(id);
                    }
                    let mut seen = seen.lock();
                    for id in local {
                        assert!(seen.insert(id));
                    }
                });
            }
        });

        assert_eq!(seen.lock().len(), THREADS * PER_THREAD);
        assert!(range.is_exhausted());
        assert_eq!(range.increment(), None);
    }
}
