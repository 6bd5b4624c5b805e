//! Server Application State
//!
//! Owned stores shared by all handlers. Their lifetime is the server's.

use std::sync::Arc;

use crate::js::JsWorkerHandle;
use crate::plugin::{EnvironmentStore, ImportError, LoadedModule, ModuleCache, ModuleLoader, PluginRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Request path -> plugin descriptor
    registry: PluginRegistry,

    /// Uploaded environment variables
    environment: EnvironmentStore,

    /// Modules already evaluated by the worker
    modules: ModuleCache,

    loader: Arc<dyn ModuleLoader>,

    /// The JS thread every plugin runs on
    worker: JsWorkerHandle,
}

impl AppState {
    pub fn new(loader: Arc<dyn ModuleLoader>, worker: JsWorkerHandle) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry: PluginRegistry::new(),
                environment: EnvironmentStore::new(),
                modules: ModuleCache::new(),
                loader,
                worker,
            }),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    pub fn environment(&self) -> &EnvironmentStore {
        &self.inner.environment
    }

    pub fn modules(&self) -> &ModuleCache {
        &self.inner.modules
    }

    pub fn worker(&self) -> &JsWorkerHandle {
        &self.inner.worker
    }

    /// Load and evaluate the module at `location` unless that already happened
    pub async fn import_module(&self, location: &str) -> Result<LoadedModule, ImportError> {
        self.inner
            .modules
            .get_or_import(location, || async {
                let source = self.inner.loader.load(location).await?;
                let exports = self.inner.worker.import_module(&source.name, source.code).await?;
                tracing::info!(location, exports = ?exports, "Imported plugin module");

                Ok::<_, ImportError>(LoadedModule {
                    location: location.to_string(),
                    name: source.name,
                    exports,
                })
            })
            .await
    }
}
