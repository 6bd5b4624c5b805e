//! JavaScript Runtime Integration
//!
//! Plugins are ES modules executed by QuickJS on a single worker thread.
//!
//! # Example
//!
//! ```javascript
//! // plugins/pages.js
//! export async function onPageGenerate(event) {
//!     console.log("generating", event.feature);
//!     return { site: event.site, pages: [] };
//! }
//! ```
//!
//! # Global Objects
//!
//! The context exposes the ECMAScript intrinsics plus worker-style globals
//! (`self`, `name`, `navigator`, `console`, `postMessage`, ...). Before every
//! plugin call the sandbox neutralizes whatever [`GLOBAL_POLICY`] denies:
//!
//! - denied functions (`eval`, `postMessage`, `queueMicrotask`, ...) throw
//!   `"<name> is not supported"` when called
//! - denied values (`navigator`, `onmessage`, ...) read as `undefined`

mod globals;
mod policy;
mod runtime;
mod sandbox;
mod worker;

pub use globals::register_worker_globals;
pub use policy::{GlobalPolicy, GLOBAL_POLICY};
pub use runtime::{JsError, JsResult, JsRuntime, RuntimeOptions};
pub use sandbox::{ActivationReport, PluginGlobalEnvironment, PropertyMeta, SandboxError};
pub use worker::{spawn_worker, JsWorkerHandle, WorkerError};
