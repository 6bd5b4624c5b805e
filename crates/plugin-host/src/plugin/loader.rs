//! Plugin Module Loading
//!
//! A [`ModuleLoader`] turns a descriptor's `functionFilePath` into source
//! text, and the [`ModuleCache`] makes sure each location is evaluated by the
//! JS worker at most once for the lifetime of the process.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::js::WorkerError;

/// Errors producing module source
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Unsupported module location: {0}")]
    UnsupportedLocation(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors importing a module through the cache
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Source text for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    /// Name the module is declared under in the JS runtime. Relative
    /// `import` statements inside the module resolve against it.
    pub name: String,
    pub code: String,
}

/// Resolves plugin module locations to source text
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, location: &str) -> Result<ModuleSource, LoaderError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// File Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Loads modules from disk. Relative locations resolve against `root`.
#[derive(Debug, Clone)]
pub struct FileModuleLoader {
    root: PathBuf,
}

impl FileModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a location to a path. `file://` URLs are accepted; other schemes are not.
    pub fn resolve(&self, location: &str) -> Result<PathBuf, LoaderError> {
        let path = match location.strip_prefix("file://") {
            Some(stripped) => stripped,
            None if location.contains("://") => {
                return Err(LoaderError::UnsupportedLocation(location.to_string()));
            }
            None => location,
        };

        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

#[async_trait]
impl ModuleLoader for FileModuleLoader {
    async fn load(&self, location: &str) -> Result<ModuleSource, LoaderError> {
        let path = self.resolve(location)?;

        let code = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoaderError::NotFound(path.display().to_string())
            } else {
                LoaderError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        tracing::debug!(location, path = %path.display(), bytes = code.len(), "Loaded module source");

        Ok(ModuleSource {
            name: path.to_string_lossy().into_owned(),
            code,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static Loader
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory modules keyed by location. Counts every load it serves.
#[derive(Debug, Default)]
pub struct StaticModuleLoader {
    modules: DashMap<String, String>,
    loads: AtomicUsize,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, location: impl Into<String>, code: impl Into<String>) -> Self {
        self.insert(location, code);
        self
    }

    pub fn insert(&self, location: impl Into<String>, code: impl Into<String>) {
        self.modules.insert(location.into(), code.into());
    }

    /// Number of successful loads so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn load(&self, location: &str) -> Result<ModuleSource, LoaderError> {
        let code = self
            .modules
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoaderError::NotFound(location.to_string()))?;

        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModuleSource {
            name: location.to_string(),
            code,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Cache
// ─────────────────────────────────────────────────────────────────────────────

/// A module the JS worker has evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    /// `functionFilePath` the module was requested by
    pub location: String,
    /// Key of the module inside the JS runtime
    pub name: String,
    pub exports: Vec<String>,
}

/// Location to imported module. Entries are never evicted.
#[derive(Debug, Default)]
pub struct ModuleCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<LoadedModule>>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the module for `location`, running `init` if it has not been
    /// imported yet.
    ///
    /// Concurrent callers for the same location wait on a single `init`. A
    /// failed `init` is not remembered; the next caller tries again.
    pub async fn get_or_import<F, Fut, E>(&self, location: &str, init: F) -> Result<LoadedModule, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoadedModule, E>>,
    {
        let cell = self.cells.lock().entry(location.to_string()).or_default().clone();
        cell.get_or_try_init(init).await.cloned()
    }

    /// Whether `location` has been imported successfully
    pub fn contains(&self, location: &str) -> bool {
        self.cells
            .lock()
            .get(location)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of successfully imported modules
    pub fn len(&self) -> usize {
        self.cells.lock().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
