//! Plugin Host
//!
//! HTTP server that runs uploaded JavaScript plugins:
//! - Plugin registry and environment uploads
//! - Event schema validation per plugin event type
//! - Module loading with an at-most-once import cache
//! - QuickJS worker with a global-binding sandbox

// Layered host configuration
pub mod config;

// QuickJS runtime, worker thread and sandbox
pub mod js;

// Registry, event schemas and module loading
pub mod plugin;

// HTTP dispatcher
pub mod server;
