use std::sync::Arc;

use parking_lot::RwLock;

/// Default separator between the parts of a document identifier.
pub const DEFAULT_IDENTITY_PARTS_SEPARATOR: &str = "/";

/// Maps a collection name to the tag an allocator is keyed on.
pub type TagTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Client-wide conventions consulted by the allocators.
///
/// The identity-parts separator can be changed at runtime. Database
/// registries notice the change on their next call and rebuild their
/// allocators so new leases are requested with the new separator.
///
/// # Example
/// ```
/// use ferroid_hilo::Conventions;
///
/// let conventions = Conventions::new().with_default_database("northwind");
/// assert_eq!(conventions.identity_parts_separator(), "/");
/// assert_eq!(conventions.tag_for("Users"), "users");
/// assert_eq!(conventions.tag_for("LineItems"), "LineItems");
///
/// conventions.set_identity_parts_separator("|");
/// assert_eq!(conventions.identity_parts_separator(), "|");
/// ```
pub struct Conventions {
    identity_parts_separator: RwLock<String>,
    default_database: Option<String>,
    transform_tag: TagTransform,
}

impl Conventions {
    pub fn new() -> Self {
        Self {
            identity_parts_separator: RwLock::new(DEFAULT_IDENTITY_PARTS_SEPARATOR.to_owned()),
            default_database: None,
            transform_tag: Arc::new(default_tag_transform),
        }
    }

    /// Database used when a caller does not name one.
    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = Some(database.into());
        self
    }

    pub fn with_identity_parts_separator(self, separator: impl Into<String>) -> Self {
        *self.identity_parts_separator.write() = separator.into();
        self
    }

    /// Replaces the collection name → tag derivation.
    pub fn with_tag_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform_tag = Arc::new(transform);
        self
    }

    pub fn identity_parts_separator(&self) -> String {
        self.identity_parts_separator.read().clone()
    }

    pub fn set_identity_parts_separator(&self, separator: impl Into<String>) {
        *self.identity_parts_separator.write() = separator.into();
    }

    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    /// Picks the database a request runs against: the explicit one if given,
    /// otherwise the configured default.
    pub fn effective_database<'a>(&'a self, database: Option<&'a str>) -> Option<&'a str> {
        database
            .filter(|db| !db.is_empty())
            .or(self.default_database())
    }

    pub fn tag_for(&self, collection: &str) -> String {
        (self.transform_tag)(collection)
    }
}

impl Default for Conventions {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Conventions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Conventions")
            .field("identity_parts_separator", &*self.identity_parts_separator.read())
            .field("default_database", &self.default_database)
            .finish_non_exhaustive()
    }
}

/// Lower-cases names with at most one upper-case letter (`Users` →
/// `users`); keeps the rest (`LineItems`) as they are.
pub fn default_tag_transform(collection: &str) -> String {
    let upper = collection.chars().filter(|c| c.is_uppercase()).count();
    if upper <= 1 {
        collection.to_lowercase()
    } else {
        collection.to_owned()
    }
}
