//! Per-session backend affinity

use crate::backends::{BackendList, join_origin};

/// Remembers which backend answered the most recent successful request.
///
/// Follow-up operations (result downloads, status queries) must target the
/// instance that holds the generated artifact, since backend instances do
/// not necessarily share storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSession {
    last_used: Option<String>,
}

impl BackendSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Origin that served the most recent successful request
    pub fn last_used(&self) -> Option<&str> {
        self.last_used.as_deref()
    }

    /// Record a successful response from `origin`
    pub fn record_success(&mut self, origin: &str) {
        self.last_used = Some(origin.to_string());
    }

    /// Origin that follow-up requests should address: the last-used backend,
    /// else the primary candidate, else the empty (same-origin) origin.
    pub fn affinity<'a>(&'a self, backends: &'a BackendList) -> &'a str {
        self.last_used()
            .or_else(|| backends.primary())
            .unwrap_or("")
    }

    /// Build the URL of a server-provided path on the affine backend
    pub fn download_url(&self, backends: &BackendList, path: &str) -> String {
        if is_absolute(path) {
            return path.to_string();
        }
        join_origin(self.affinity(backends), path)
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
