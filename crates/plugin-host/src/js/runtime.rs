//! QuickJS Runtime Wrapper
//!
//! Owns the engine, the single plugin context and the namespaces of every
//! imported plugin module. Not `Send`: it lives on the worker thread.

use std::collections::HashMap;
use std::path::PathBuf;

use rquickjs::loader::{FileResolver, ScriptLoader};
use rquickjs::{
    CatchResultExt, Context, Ctx, Function, IntoJs, Module, Object, Persistent, Promise, Runtime,
    Value as JsValue,
};

use super::globals::register_worker_globals;
use super::policy::GlobalPolicy;
use super::sandbox::{PluginGlobalEnvironment, SandboxError};

/// Calls an export and settles to its JSON text. Sync throws and async
/// rejections both end up as a rejected promise.
const INVOKE_HELPER: &str = r#"
(fn, arg, name) => new Promise((resolve) => {
    if (typeof fn !== "function") {
        throw new TypeError(`export '${name}' is not a function`);
    }
    resolve(fn(arg));
}).then((value) => JSON.stringify(value === undefined ? null : value) ?? "null")
"#;

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur in the JavaScript runtime
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Failed to import {location}: {cause}")]
    Import { location: String, cause: String },

    #[error("Module not loaded: {0}")]
    ModuleMissing(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Assigning a global failed. The first `applied` entries were set.
    #[error("Failed to set global {key}: {cause}")]
    Global {
        key: String,
        applied: usize,
        cause: String,
    },

    #[error("Type conversion error: {0}")]
    Conversion(String),
}

pub type JsResult<T> = Result<T, JsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Options
// ─────────────────────────────────────────────────────────────────────────────

/// Settings applied when the runtime is created
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Value of the `name` worker global
    pub name: String,
    /// Base directory for resolving `import` statements inside plugins
    pub module_root: Option<PathBuf>,
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// A JavaScript runtime instance hosting plugin modules
pub struct JsRuntime {
    /// Module namespaces keyed by location. Declared first so the persistent
    /// handles drop before the context and runtime.
    modules: HashMap<String, Persistent<Object<'static>>>,
    context: Context,
    runtime: Runtime,
}

impl JsRuntime {
    /// Create a new JavaScript runtime with the worker globals installed
    pub fn new(options: &RuntimeOptions) -> JsResult<Self> {
        let runtime = Runtime::new().map_err(|e| JsError::RuntimeCreation(e.to_string()))?;

        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = options.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        let mut resolver = FileResolver::default();
        if let Some(root) = &options.module_root {
            resolver = resolver.with_path(root.to_string_lossy().into_owned());
        }
        runtime.set_loader(resolver, ScriptLoader::default());

        let context = Context::full(&runtime).map_err(|e| JsError::RuntimeCreation(e.to_string()))?;

        context.with(|ctx| {
            register_worker_globals(&ctx, &options.name)
                .catch(&ctx)
                .map_err(|e| JsError::RuntimeCreation(e.to_string()))
        })?;

        Ok(Self {
            modules: HashMap::new(),
            context,
            runtime,
        })
    }

    /// Declare and evaluate an ES module, keeping its namespace under `location`.
    ///
    /// Returns the module's export names. A location that is already loaded
    /// is not evaluated again; its existing exports are returned.
    pub fn import_module(&mut self, location: &str, source: &str) -> JsResult<Vec<String>> {
        let import_err = |cause: String| JsError::Import {
            location: location.to_string(),
            cause,
        };

        if let Some(namespace) = self.modules.get(location) {
            tracing::debug!(location, "Module already loaded, skipping evaluation");
            return self.context.with(|ctx| -> JsResult<Vec<String>> {
                let namespace = namespace
                    .clone()
                    .restore(&ctx)
                    .catch(&ctx)
                    .map_err(|e| import_err(e.to_string()))?;
                namespace
                    .keys::<String>()
                    .collect::<rquickjs::Result<Vec<_>>>()
                    .catch(&ctx)
                    .map_err(|e| import_err(e.to_string()))
            });
        }

        let (namespace, exports) = self.context.with(|ctx| {
            let (module, promise) = Module::declare(ctx.clone(), location, source)
                .and_then(|declared| declared.eval())
                .catch(&ctx)
                .map_err(|e| import_err(e.to_string()))?;

            // Top-level await and evaluation errors surface through the promise
            promise
                .finish::<()>()
                .catch(&ctx)
                .map_err(|e| import_err(e.to_string()))?;

            let namespace = module
                .namespace()
                .catch(&ctx)
                .map_err(|e| import_err(e.to_string()))?;
            let exports = namespace
                .keys::<String>()
                .collect::<rquickjs::Result<Vec<_>>>()
                .catch(&ctx)
                .map_err(|e| import_err(e.to_string()))?;

            Ok::<_, JsError>((Persistent::save(&ctx, namespace), exports))
        })?;

        self.modules.insert(location.to_string(), namespace);
        tracing::debug!(location, exports = ?exports, "Imported plugin module");

        Ok(exports)
    }

    /// Check if a module has been imported under `location`
    pub fn has_module(&self, location: &str) -> bool {
        self.modules.contains_key(location)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Assign each entry onto the global object, in map order.
    ///
    /// Stops at the first entry that cannot be set, e.g. a getter-only binding
    /// left by the sandbox. Entries before it stay assigned.
    pub fn set_globals(&self, vars: &serde_json::Map<String, serde_json::Value>) -> JsResult<()> {
        self.context.with(|ctx| -> JsResult<()> {
            let globals = ctx.globals();
            for (applied, (key, value)) in vars.iter().enumerate() {
                let global_err = |cause: String| JsError::Global {
                    key: key.clone(),
                    applied,
                    cause,
                };
                let js_value = json_to_js(&ctx, value).map_err(|e| global_err(e.to_string()))?;
                globals
                    .set(key.as_str(), js_value)
                    .catch(&ctx)
                    .map_err(|e| global_err(e.to_string()))?;
            }
            Ok(())
        })
    }

    /// Activate the sandbox, then call `function` exported by the module at
    /// `location` with `body`, waiting for it to settle.
    pub fn invoke(
        &self,
        location: &str,
        function: &str,
        body: &serde_json::Value,
        policy: &GlobalPolicy,
    ) -> JsResult<serde_json::Value> {
        let json = self.context.with(|ctx| -> JsResult<String> {
            // A fresh environment per call; overrides from earlier calls stay applied
            let env = PluginGlobalEnvironment::capture(&ctx)?;
            let report = env.activate(&ctx, policy)?;
            tracing::trace!(neutralized = report.total(), "Sandbox active");

            let namespace = self
                .modules
                .get(location)
                .ok_or_else(|| JsError::ModuleMissing(location.to_string()))?
                .clone()
                .restore(&ctx)
                .catch(&ctx)
                .map_err(|e| JsError::Plugin(e.to_string()))?;

            call_export(&ctx, &namespace, function, body)
        })?;

        serde_json::from_str(&json).map_err(|e| JsError::Conversion(e.to_string()))
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

fn call_export<'js>(
    ctx: &Ctx<'js>,
    namespace: &Object<'js>,
    function: &str,
    body: &serde_json::Value,
) -> JsResult<String> {
    let arg = json_to_js(ctx, body)?;

    let result = (|| -> rquickjs::Result<String> {
        let export: JsValue = namespace.get(function)?;
        let invoker: Function = ctx.eval(INVOKE_HELPER)?;
        let promise: Promise = invoker.call((export, arg, function))?;
        promise.finish::<String>()
    })();

    result
        .catch(ctx)
        .map_err(|e| JsError::Plugin(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a serde_json::Value to a JavaScript value
fn json_to_js<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> JsResult<JsValue<'js>> {
    match json {
        serde_json::Value::Null => Ok(JsValue::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => Ok(JsValue::new_int(ctx.clone(), i)),
                None => Ok(JsValue::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))),
            }
        }
        serde_json::Value::String(s) => s
            .as_str()
            .into_js(ctx)
            .map_err(|e| JsError::Conversion(e.to_string())),
        serde_json::Value::Array(arr) => {
            let js_arr = rquickjs::Array::new(ctx.clone())
                .map_err(|e| JsError::Conversion(e.to_string()))?;
            for (i, item) in arr.iter().enumerate() {
                let js_item = json_to_js(ctx, item)?;
                js_arr
                    .set(i, js_item)
                    .map_err(|e| JsError::Conversion(e.to_string()))?;
            }
            Ok(js_arr.into_value())
        }
        serde_json::Value::Object(obj) => {
            let js_obj = Object::new(ctx.clone()).map_err(|e| JsError::Conversion(e.to_string()))?;
            for (key, val) in obj {
                let js_val = json_to_js(ctx, val)?;
                js_obj
                    .set(key.as_str(), js_val)
                    .map_err(|e| JsError::Conversion(e.to_string()))?;
            }
            Ok(js_obj.into_value())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
