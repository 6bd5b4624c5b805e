//! Global Environment Sandbox
//!
//! Certain globals are not available on the platform's plugin worker and throw
//! if used (e.g. `postMessage`). The sandbox mimics that by overwriting every
//! denied binding on the context's global object: callables become an accessor
//! yielding a stub that throws, values become `undefined`.
//!
//! Overrides are applied in place to the one global object every plugin
//! shares, and there is no restore step. Activating again is a no-op for
//! bindings already neutralized.

use std::collections::HashMap;

use rquickjs::{CatchResultExt, Ctx, Function, Object, Value as JsValue};

use super::policy::GlobalPolicy;

/// Getter factory for denied callables. `name => getter => stub`.
const UNSUPPORTED_GETTER_FACTORY: &str =
    "(name) => () => () => { throw new Error(`${name} is not supported`); }";

/// Errors raised while capturing or activating the sandbox
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to capture global descriptors: {0}")]
    Capture(String),

    #[error("failed to override global '{name}': {cause}")]
    Define { name: String, cause: String },
}

/// Metadata of one global property at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMeta {
    pub configurable: bool,
    pub enumerable: bool,
    /// `None` for accessor properties
    pub writable: Option<bool>,
    pub accessor: bool,
}

/// Names neutralized by one activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Callables replaced by a throwing stub
    pub stubbed: Vec<String>,
    /// Values replaced by `undefined`
    pub cleared: Vec<String>,
}

impl ActivationReport {
    pub fn total(&self) -> usize {
        self.stubbed.len() + self.cleared.len()
    }
}

/// Snapshot of the global object's property metadata, plus the activation step.
///
/// Capturing only reads descriptors, so it never runs a getter and never
/// changes the global object.
#[derive(Debug, Clone, Default)]
pub struct PluginGlobalEnvironment {
    initial_properties: HashMap<String, PropertyMeta>,
}

impl PluginGlobalEnvironment {
    /// Capture the current own property descriptors of `globalThis`.
    pub fn capture(ctx: &Ctx<'_>) -> Result<Self, SandboxError> {
        let globals = ctx.globals();
        let descriptors: Object = object_static(ctx, "getOwnPropertyDescriptors")
            .and_then(|get_all| get_all.call((globals,)))
            .catch(ctx)
            .map_err(|e| SandboxError::Capture(e.to_string()))?;

        let mut initial_properties = HashMap::new();
        for prop in descriptors.props::<String, Object>() {
            let (name, desc) = prop
                .catch(ctx)
                .map_err(|e| SandboxError::Capture(e.to_string()))?;
            let meta = read_meta(&desc)
                .catch(ctx)
                .map_err(|e| SandboxError::Capture(format!("{name}: {e}")))?;
            initial_properties.insert(name, meta);
        }

        Ok(Self { initial_properties })
    }

    /// Captured metadata for a global, if it existed at capture time.
    pub fn initial(&self, name: &str) -> Option<&PropertyMeta> {
        self.initial_properties.get(name)
    }

    pub fn len(&self) -> usize {
        self.initial_properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initial_properties.is_empty()
    }

    /// Apply the overrides for every denied global present on `globalThis`.
    pub fn activate(&self, ctx: &Ctx<'_>, policy: &GlobalPolicy) -> Result<ActivationReport, SandboxError> {
        let globals = ctx.globals();
        let define = object_static(ctx, "defineProperty")
            .catch(ctx)
            .map_err(|e| SandboxError::Capture(e.to_string()))?;
        let factory: Function = ctx
            .eval(UNSUPPORTED_GETTER_FACTORY)
            .catch(ctx)
            .map_err(|e| SandboxError::Capture(e.to_string()))?;

        let mut report = ActivationReport::default();

        for name in policy.denied() {
            let define_err = |cause: String| SandboxError::Define {
                name: name.to_string(),
                cause,
            };

            if !globals.contains_key(name).catch(ctx).map_err(|e| define_err(e.to_string()))? {
                continue;
            }

            let current: JsValue = globals
                .get(name)
                .catch(ctx)
                .map_err(|e| define_err(e.to_string()))?;
            let callable = current.is_function();

            let desc = self
                .descriptor(ctx, &factory, name, callable)
                .catch(ctx)
                .map_err(|e| define_err(e.to_string()))?;

            define
                .call::<_, JsValue>((globals.clone(), name, desc))
                .catch(ctx)
                .map_err(|e| define_err(e.to_string()))?;

            if callable {
                report.stubbed.push(name.to_string());
            } else {
                report.cleared.push(name.to_string());
            }
        }

        tracing::debug!(
            stubbed = report.stubbed.len(),
            cleared = report.cleared.len(),
            "Applied global overrides"
        );

        Ok(report)
    }

    /// Build the replacement descriptor. Metadata not set by the override is
    /// inherited from the captured original.
    fn descriptor<'js>(
        &self,
        ctx: &Ctx<'js>,
        factory: &Function<'js>,
        name: &str,
        callable: bool,
    ) -> rquickjs::Result<Object<'js>> {
        let orig = self.initial(name);
        let desc = Object::new(ctx.clone())?;
        desc.set("configurable", orig.map(|m| m.configurable).unwrap_or(false))?;
        desc.set("enumerable", orig.map(|m| m.enumerable).unwrap_or(false))?;

        if callable {
            let getter: Function = factory.call((name,))?;
            desc.set("get", getter)?;
        } else {
            desc.set("value", JsValue::new_undefined(ctx.clone()))?;
            desc.set("writable", orig.and_then(|m| m.writable).unwrap_or(false))?;
        }

        Ok(desc)
    }
}

fn object_static<'js>(ctx: &Ctx<'js>, method: &str) -> rquickjs::Result<Function<'js>> {
    let object_ctor: Object = ctx.globals().get("Object")?;
    object_ctor.get(method)
}

fn read_meta(desc: &Object<'_>) -> rquickjs::Result<PropertyMeta> {
    Ok(PropertyMeta {
        configurable: desc.get::<_, Option<bool>>("configurable")?.unwrap_or(false),
        enumerable: desc.get::<_, Option<bool>>("enumerable")?.unwrap_or(false),
        writable: desc.get::<_, Option<bool>>("writable")?,
        accessor: desc.contains_key("get")? || desc.contains_key("set")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn context() -> (Runtime, Context) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let _: () = ctx
                .eval(
                    r#"
                    globalThis.postMessage = function (msg) { return msg; };
                    globalThis.navigator = { userAgent: "test" };
                    globalThis.console = { log: function () {} };
                    "#,
                )
                .unwrap();
        });
        (runtime, context)
    }

    #[test]
    fn test_capture_does_not_mutate() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            assert!(!env.is_empty());

            let meta = env.initial("postMessage").unwrap();
            assert!(meta.writable.is_some());
            assert!(!meta.accessor);

            let still_callable: bool = ctx.eval("typeof postMessage === 'function'").unwrap();
            assert!(still_callable);
            let eval_works: i32 = ctx.eval("eval('1 + 1')").unwrap();
            assert_eq!(eval_works, 2);
        });
    }

    #[test]
    fn test_denied_callables_throw() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let report = env.activate(&ctx, &GlobalPolicy::standard()).unwrap();

            assert!(report.stubbed.contains(&"eval".to_string()));
            assert!(report.stubbed.contains(&"postMessage".to_string()));

            let msg: String = ctx
                .eval("try { postMessage('x'); 'called' } catch (e) { e.message }")
                .unwrap();
            assert_eq!(msg, "postMessage is not supported");

            let msg: String = ctx
                .eval("try { eval('1'); 'called' } catch (e) { e.message }")
                .unwrap();
            assert_eq!(msg, "eval is not supported");
        });
    }

    #[test]
    fn test_denied_values_become_undefined() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let report = env.activate(&ctx, &GlobalPolicy::standard()).unwrap();

            assert_eq!(report.cleared, vec!["navigator".to_string()]);
            let undefined: bool = ctx
                .eval("'navigator' in globalThis && navigator === undefined")
                .unwrap();
            assert!(undefined);
        });
    }

    #[test]
    fn test_allowed_untouched() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            env.activate(&ctx, &GlobalPolicy::standard()).unwrap();

            let json: String = ctx.eval("JSON.stringify({ a: 1 })").unwrap();
            assert_eq!(json, r#"{"a":1}"#);
            let console_ok: bool = ctx.eval("typeof console.log === 'function'").unwrap();
            assert!(console_ok);
            let parsed: i32 = ctx.eval("parseInt('42')").unwrap();
            assert_eq!(parsed, 42);
        });
    }

    #[test]
    fn test_missing_globals_are_skipped() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let report = env.activate(&ctx, &GlobalPolicy::standard()).unwrap();

            assert!(!report.stubbed.contains(&"caches".to_string()));
            assert!(!report.cleared.contains(&"caches".to_string()));
            let absent: bool = ctx.eval("!('caches' in globalThis)").unwrap();
            assert!(absent);
        });
    }

    #[test]
    fn test_inherits_original_metadata() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let _: () = ctx
                .eval(
                    r#"
                    Object.defineProperty(globalThis, "reportError", {
                        value: function () {},
                        writable: true,
                        enumerable: false,
                        configurable: true,
                    });
                    Object.defineProperty(globalThis, "onmessage", {
                        value: null,
                        writable: false,
                        enumerable: true,
                        configurable: true,
                    });
                    "#,
                )
                .unwrap();

            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            env.activate(&ctx, &GlobalPolicy::standard()).unwrap();

            let stub: String = ctx
                .eval(
                    r#"
                    (() => {
                        const d = Object.getOwnPropertyDescriptor(globalThis, "reportError");
                        return [typeof d.get, d.enumerable, d.configurable].join(",");
                    })()
                    "#,
                )
                .unwrap();
            assert_eq!(stub, "function,false,true");

            let cleared: String = ctx
                .eval(
                    r#"
                    (() => {
                        const d = Object.getOwnPropertyDescriptor(globalThis, "onmessage");
                        return [d.value === undefined, d.writable, d.enumerable, d.configurable].join(",");
                    })()
                    "#,
                )
                .unwrap();
            assert_eq!(cleared, "true,false,true,true");
        });
    }

    #[test]
    fn test_activation_is_idempotent() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let describe = r#"
                ["eval", "postMessage", "navigator"].map((k) => {
                    const d = Object.getOwnPropertyDescriptor(globalThis, k);
                    return [k, typeof d.get, d.value === undefined, d.enumerable, d.configurable, d.writable].join(":");
                }).join("|")
            "#;

            let first = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let report_a = first.activate(&ctx, &GlobalPolicy::standard()).unwrap();
            let once: String = ctx.eval(describe).unwrap();

            let second = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let report_b = second.activate(&ctx, &GlobalPolicy::standard()).unwrap();
            let twice: String = ctx.eval(describe).unwrap();

            assert_eq!(once, twice);
            assert_eq!(report_a, report_b);

            let msg: String = ctx
                .eval("try { postMessage('x'); 'called' } catch (e) { e.message }")
                .unwrap();
            assert_eq!(msg, "postMessage is not supported");
        });
    }

    #[test]
    fn test_non_configurable_binding_fails() {
        let (_rt, context) = context();

        context.with(|ctx| {
            let _: () = ctx
                .eval(
                    r#"Object.defineProperty(globalThis, "pinned", { value: 1, configurable: false });"#,
                )
                .unwrap();

            let env = PluginGlobalEnvironment::capture(&ctx).unwrap();
            let policy = GlobalPolicy::from_table([("pinned", false)]);
            let err = env.activate(&ctx, &policy).unwrap_err();

            match err {
                SandboxError::Define { name, .. } => assert_eq!(name, "pinned"),
                other => panic!("unexpected error: {other}"),
            }
        });
    }
}
