//! Backend candidate resolution
//!
//! The candidate list is resolved once, before any request is made, from
//! (in priority order):
//! - an injected runtime list of origins
//! - a single runtime override
//! - the origin configured at build time (`QFAZ_BUILD_BACKEND_URL`)
//!
//! An empty list is not an error: it means a single attempt using
//! same-origin relative paths.

use tracing::debug;

/// Origin baked in at compile time, if any
pub const BUILD_BACKEND_URL: Option<&str> = option_env!("QFAZ_BUILD_BACKEND_URL");

/// Path prefix under which every backend exposes its API
pub const API_PREFIX: &str = "/api";

/// Raw configuration sources consulted during resolution
#[derive(Debug, Clone, Default)]
pub struct BackendSources {
    /// Ordered list of origins injected at runtime
    pub runtime_list: Option<Vec<String>>,
    /// Single origin injected at runtime
    pub runtime_url: Option<String>,
    /// Origin configured at build time
    pub build_url: Option<String>,
}

impl BackendSources {
    /// Sources with the compiled-in build-time origin pre-filled
    pub fn with_build_default() -> Self {
        Self {
            build_url: BUILD_BACKEND_URL.map(str::to_string),
            ..Default::default()
        }
    }
}

/// Ordered, immutable list of backend origins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendList {
    origins: Vec<String>,
}

impl BackendList {
    /// Resolve the candidate list from configuration sources
    pub fn resolve(sources: &BackendSources) -> Self {
        if let Some(list) = &sources.runtime_list
            && !list.is_empty()
        {
            debug!("Using runtime backend list ({} entries)", list.len());
            return Self {
                origins: list.clone(),
            };
        }

        let single = non_empty(sources.runtime_url.as_deref())
            .or_else(|| non_empty(sources.build_url.as_deref()))
            .unwrap_or("");

        if single.is_empty() {
            debug!("No backend configured, using same-origin relative paths");
            Self::default()
        } else {
            debug!("Using single backend: {}", single);
            Self {
                origins: vec![single.to_string()],
            }
        }
    }

    /// Build a list from already-resolved origins
    pub fn from_origins(origins: Vec<String>) -> Self {
        Self { origins }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// The primary (first) origin, if any
    pub fn primary(&self) -> Option<&str> {
        self.origins.first().map(String::as_str)
    }

    /// Origins to attempt, in order.
    ///
    /// An empty list yields one implicit candidate, the empty origin.
    pub fn candidates(&self) -> Vec<&str> {
        if self.origins.is_empty() {
            vec![""]
        } else {
            self.origins.iter().map(String::as_str).collect()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Join an origin and a path. An empty origin leaves the path relative.
pub fn join_origin(origin: &str, path: &str) -> String {
    if origin.is_empty() {
        path.to_string()
    } else {
        format!("{}{}", origin.trim_end_matches('/'), path)
    }
}

/// API base for an origin: `{origin}/api`, or `/api` for the empty origin
pub fn api_base(origin: &str) -> String {
    join_origin(origin, API_PREFIX)
}

/// Full API target for an endpoint on an origin
pub fn api_url(origin: &str, endpoint: &str) -> String {
    format!("{}{}", api_base(origin), endpoint)
}
