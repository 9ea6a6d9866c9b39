//! Endpoint registry and its backing stores

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use dynrest_common::error::{Error, Result};
use dynrest_common::types::{EndpointSpec, HttpMethod};

use crate::route::RouteMatcher;

/// Durable list of endpoint definitions
#[async_trait]
pub trait SpecStore: Send + Sync {
    /// All definitions, in registry order
    async fn list(&self) -> Result<Vec<EndpointSpec>>;

    /// Replace the whole list after checking it
    async fn save(&self, specs: Vec<EndpointSpec>) -> Result<()>;
}

/// Reject a list with duplicate names or structurally broken endpoints
pub fn check_specs(specs: &[EndpointSpec], api_root: &str) -> Result<()> {
    let mut problems = Vec::new();
    let mut names = HashSet::new();

    for spec in specs {
        if !names.insert(spec.name.to_lowercase()) {
            problems.push(format!("endpoint name '{}' is used more than once", spec.name));
        }
        problems.extend(
            spec.check(api_root)
                .into_iter()
                .map(|p| format!("endpoint '{}': {p}", spec.name)),
        );
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::EndpointMisconfigured(problems.join("; ")))
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Stores the endpoint list as one JSON array on disk
#[derive(Debug, Clone)]
pub struct FileSpecStore {
    path: PathBuf,
    api_root: String,
}

impl FileSpecStore {
    pub fn new(path: impl Into<PathBuf>, api_root: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            api_root: api_root.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpecStore for FileSpecStore {
    async fn list(&self) -> Result<Vec<EndpointSpec>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Endpoint file missing; registry is empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, specs: Vec<EndpointSpec>) -> Result<()> {
        check_specs(&specs, &self.api_root)?;
        let json = serde_json::to_string_pretty(&specs)?;

        // Write then rename so readers never see a partial file.
        let tmp_path = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        info!(path = %self.path.display(), count = specs.len(), "Saved endpoint definitions");
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps the endpoint list in memory; for tests and embedding
#[derive(Debug, Default)]
pub struct InMemorySpecStore {
    specs: RwLock<Vec<EndpointSpec>>,
    api_root: String,
}

impl InMemorySpecStore {
    pub fn new(api_root: impl Into<String>) -> Self {
        Self {
            specs: RwLock::new(Vec::new()),
            api_root: api_root.into(),
        }
    }

    /// Store preloaded with `specs`, checked like a save
    pub fn with_specs(api_root: impl Into<String>, specs: Vec<EndpointSpec>) -> Result<Self> {
        let store = Self::new(api_root);
        check_specs(&specs, &store.api_root)?;
        *store.specs.write() = specs;
        Ok(store)
    }
}

#[async_trait]
impl SpecStore for InMemorySpecStore {
    async fn list(&self) -> Result<Vec<EndpointSpec>> {
        Ok(self.specs.read().clone())
    }

    async fn save(&self, specs: Vec<EndpointSpec>) -> Result<()> {
        check_specs(&specs, &self.api_root)?;
        *self.specs.write() = specs;
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A resolved request: the endpoint and its path captures
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub spec: &'a EndpointSpec,
    pub captures: HashMap<String, String>,
}

/// Snapshot of the endpoint list used for one request
#[derive(Debug)]
pub struct EndpointRegistry {
    routes: Vec<(EndpointSpec, RouteMatcher)>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn from_specs(specs: Vec<EndpointSpec>) -> Self {
        let routes = specs
            .into_iter()
            .filter(EndpointSpec::is_active)
            .map(|spec| {
                let matcher = RouteMatcher::compile(&spec.url_pattern);
                (spec, matcher)
            })
            .collect();
        Self { routes }
    }

    /// Read the current list from `store`
    pub async fn load(store: &dyn SpecStore) -> Result<Self> {
        Ok(Self::from_specs(store.list().await?))
    }

    /// First active endpoint, in registry order, whose method and URL
    /// template both match
    #[must_use]
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|(spec, _)| spec.method == method)
            .find_map(|(spec, matcher)| {
                matcher
                    .matches(path)
                    .map(|captures| RouteMatch { spec, captures })
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
