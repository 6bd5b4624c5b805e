//! Plugin Bookkeeping
//!
//! Everything the dispatcher needs to know about plugins outside the JS
//! engine: which path maps to which module and export, what a request for each
//! event type must contain, and how module source is located and cached.

mod event;
mod loader;
mod registry;

pub use event::{first_missing, EventRequest, EventType, MissingField};
pub use loader::{
    FileModuleLoader, ImportError, LoadedModule, LoaderError, ModuleCache, ModuleLoader, ModuleSource,
    StaticModuleLoader,
};
pub use registry::{
    decode_path, EnvironmentStore, PluginDescriptor, PluginRegistry, RegistryError, PATH_TO_PLUGIN_INFO,
    PLUGIN_FIELDS,
};
