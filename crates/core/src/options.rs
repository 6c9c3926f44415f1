//! Options controlling how a document is opened.

/// Default capacity of the decoded-object cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// What to do when a single object cannot be decoded because of an
/// unsupported filter or crypt method, or a bad `/Length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Propagate the error to the caller.
    #[default]
    Strict,
    /// Log the failure and report the object as skipped.
    SkipObject,
}

/// Options for [`DocumentContext::open`](crate::document::DocumentContext::open).
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Password tried against the standard security handler.
    pub password: String,

    /// Handling of per-object decode failures.
    pub error_policy: ErrorPolicy,

    /// Rebuild the cross-reference map by scanning for `N G obj` headers
    /// when the `startxref` chain cannot be read.
    pub recover_xref: bool,

    /// Maximum number of decoded objects kept in memory. 0 disables caching.
    pub cache_capacity: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            password: String::new(),
            error_policy: ErrorPolicy::Strict,
            recover_xref: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the password for encrypted PDFs.
    pub fn password(mut self, pwd: &str) -> Self {
        self.password = pwd.to_string();
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Enables the `N G obj` scan when the xref chain is unreadable.
    pub fn recover_xref(mut self, enabled: bool) -> Self {
        self.recover_xref = enabled;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
