//! Server-wide options.

use stratus_middleware::FilterDescriptor;

/// Configuration shared by every handler a server builds.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Send unhandled error text to callers instead of a generic status.
    pub return_error_detail: bool,

    /// Maximum length in bytes of a returned error detail.
    pub max_error_detail_len: usize,

    /// Filters applied to every service method.
    pub global_filters: Vec<FilterDescriptor>,

    /// Filters applied to every hub method.
    pub global_hub_filters: Vec<FilterDescriptor>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            return_error_detail: false,
            max_error_detail_len: 5000,
            global_filters: Vec::new(),
            global_hub_filters: Vec::new(),
        }
    }
}

impl ServerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return unhandled error details to callers.
    #[must_use]
    pub fn with_error_detail(mut self, enabled: bool) -> Self {
        self.return_error_detail = enabled;
        self
    }

    /// Cap the length of returned error details.
    #[must_use]
    pub fn with_max_error_detail_len(mut self, len: usize) -> Self {
        self.max_error_detail_len = len;
        self
    }

    /// Add a filter applied to every service method.
    #[must_use]
    pub fn with_global_filter(mut self, filter: FilterDescriptor) -> Self {
        self.global_filters.push(filter);
        self
    }

    /// Add a filter applied to every hub method.
    #[must_use]
    pub fn with_global_hub_filter(mut self, filter: FilterDescriptor) -> Self {
        self.global_hub_filters.push(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServerOptions::default();
        assert!(!options.return_error_detail);
        assert_eq!(options.max_error_detail_len, 5000);
        assert!(options.global_filters.is_empty());
        assert!(options.global_hub_filters.is_empty());
    }
}
