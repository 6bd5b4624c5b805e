//! Worker Global Objects
//!
//! QuickJS only ships the ECMAScript intrinsics. Plugins are written against a
//! worker environment, so the host installs the worker-style globals here.
//! Several of them are denied by the policy and get neutralized by the sandbox
//! before any plugin runs.

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Result as JsResult};

/// Worker globals that are plain JavaScript.
const WORKER_PRELUDE: &str = r#"
(() => {
    const listeners = new Map();
    globalThis.self = globalThis;
    globalThis.onerror = null;
    globalThis.onmessage = null;
    globalThis.onmessageerror = null;
    globalThis.onunhandledrejection = null;
    globalThis.queueMicrotask = (callback) => {
        Promise.resolve().then(() => callback());
    };
    globalThis.addEventListener = (type, listener) => {
        if (!listeners.has(type)) listeners.set(type, new Set());
        listeners.get(type).add(listener);
    };
    globalThis.removeEventListener = (type, listener) => {
        listeners.get(type)?.delete(listener);
    };
    globalThis.dispatchEvent = (event) => {
        for (const listener of listeners.get(event?.type) ?? []) {
            listener.call(globalThis, event);
        }
        return true;
    };
})();
"#;

/// Register the worker globals on the context
pub fn register_worker_globals(ctx: &Ctx<'_>, worker_name: &str) -> JsResult<()> {
    let globals = ctx.globals();

    let _: () = ctx.eval(WORKER_PRELUDE)?;

    register_console(ctx)?;

    globals.set("name", worker_name)?;

    let navigator = Object::new(ctx.clone())?;
    navigator.set("userAgent", concat!("plugin-host/", env!("CARGO_PKG_VERSION")))?;
    navigator.set("hardwareConcurrency", 1)?;
    globals.set("navigator", navigator)?;

    globals.set(
        "reportError",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::error!(target: "plugin_host::js", "reportError: {}", join(&args));
        })?,
    )?;

    // There is no worker owner to receive messages, so they are dropped
    globals.set(
        "postMessage",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::debug!(target: "plugin_host::js", "postMessage dropped: {}", join(&args));
        })?,
    )?;

    globals.set(
        "close",
        Function::new(ctx.clone(), || {
            tracing::debug!(target: "plugin_host::js", "close() ignored");
        })?,
    )?;

    Ok(())
}

/// Register the console object with log, info, warn, error, debug methods
fn register_console(ctx: &Ctx<'_>) -> JsResult<()> {
    let console = Object::new(ctx.clone())?;

    console.set("log", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::info!(target: "plugin_host::js", "{}", join(&args));
    })?)?;

    console.set("info", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::info!(target: "plugin_host::js", "{}", join(&args));
    })?)?;

    console.set("warn", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::warn!(target: "plugin_host::js", "{}", join(&args));
    })?)?;

    console.set("error", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::error!(target: "plugin_host::js", "{}", join(&args));
    })?)?;

    console.set("debug", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::debug!(target: "plugin_host::js", "{}", join(&args));
    })?)?;

    ctx.globals().set("console", console)?;

    Ok(())
}

fn join(args: &Rest<Coerced<String>>) -> String {
    args.0
        .iter()
        .map(|arg| arg.0.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
