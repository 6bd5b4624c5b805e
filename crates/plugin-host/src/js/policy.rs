//! Global Access Policy
//!
//! Declares, per global binding name, whether plugin code may see it. The
//! table mirrors what the platform's plugin worker exposes and must be kept in
//! sync with it by hand; nothing here is derived from the running engine.

use std::borrow::Cow;

/// Allow/deny table for global bindings, in platform order.
pub static GLOBAL_POLICY: &[(&str, bool)] = &[
    // Global accessors
    ("self", true),
    ("globalThis", true),
    // Restricted features
    ("WebAssembly", false),
    ("eval", false),
    ("queueMicrotask", false),
    // Denied on the platform, which installs its own shims for these. The
    // host implementations behave the same, so they stay reachable here.
    ("fetch", true),
    ("setTimeout", true),
    ("setInterval", true),
    ("clearInterval", true),
    ("clearTimeout", true),
    ("addEventListener", true),
    ("removeEventListener", true),
    ("dispatchEvent", true),
    // Needed for local generation
    ("Deno", true),
    // Worker properties
    ("name", true),
    ("location", true),
    ("navigator", false),
    // Worker events and life-cycle control
    ("close", false),
    ("onerror", false),
    ("postMessage", false),
    ("onmessage", false),
    ("onmessageerror", false),
    ("reportError", false),
    ("onunhandledrejection", false),
    // Cache API would leak data between plugins
    ("caches", false),
    ("CacheStorage", false),
    ("Cache", false),
    // Primitive functions/properties
    ("parseInt", true),
    ("parseFloat", true),
    ("isNaN", true),
    ("isFinite", true),
    ("decodeURI", true),
    ("decodeURIComponent", true),
    ("encodeURI", true),
    ("encodeURIComponent", true),
    ("escape", true),
    ("unescape", true),
    ("atob", true),
    ("btoa", true),
    ("undefined", true),
    ("console", true),
    ("performance", true),
    ("crypto", true),
    ("NaN", true),
    ("Infinity", true),
    ("structuredClone", true),
    // Global types
    ("Symbol", true),
    ("Object", true),
    ("Function", true),
    ("String", true),
    ("Number", true),
    ("Boolean", true),
    ("Math", true),
    ("Date", true),
    ("RegExp", true),
    ("Error", true),
    ("EvalError", true),
    ("RangeError", true),
    ("ReferenceError", true),
    ("SyntaxError", true),
    ("TypeError", true),
    ("URIError", true),
    ("JSON", true),
    ("Array", true),
    ("Promise", true),
    ("ArrayBuffer", true),
    ("DataView", true),
    ("Int8Array", true),
    ("Uint8Array", true),
    ("Uint8ClampedArray", true),
    ("Int16Array", true),
    ("Uint16Array", true),
    ("Int32Array", true),
    ("Uint32Array", true),
    ("Float32Array", true),
    ("Float64Array", true),
    ("Intl", true),
    ("Map", true),
    ("WeakMap", true),
    ("Set", true),
    ("WeakSet", true),
    ("Proxy", true),
    ("Reflect", true),
    ("SharedArrayBuffer", true),
    ("Atomics", true),
    ("BigInt", true),
    ("BigInt64Array", true),
    ("BigUint64Array", true),
    ("AggregateError", true),
    ("WeakRef", true),
    ("FinalizationRegistry", true),
    ("AbortSignal", true),
    ("FileReader", true),
    ("ReadableStreamBYOBReader", true),
    ("ReadableStreamDefaultReader", true),
    ("ReadableStreamDefaultController", true),
    ("ReadableByteStreamController", true),
    ("ReadableStream", true),
    ("WritableStream", true),
    ("WritableStreamDefaultWriter", true),
    ("TransformStream", true),
    ("SubtleCrypto", true),
    ("CryptoKey", true),
    ("CryptoKeyPair", true),
    ("FormData", true),
    ("TextDecoder", true),
    ("TextEncoder", true),
    ("TextDecoderStream", true),
    ("TextEncoderStream", true),
    ("CountQueuingStrategy", true),
    ("ByteLengthQueuingStrategy", true),
    ("WritableStreamDefaultController", true),
    ("TransformStreamDefaultController", true),
    ("WorkerGlobalScope", true),
    ("WorkerNavigator", true),
    ("WorkerLocation", true),
    ("DedicatedWorkerGlobalScope", true),
    ("ErrorEvent", true),
    ("PromiseRejectionEvent", true),
    ("Worker", true),
    ("Performance", true),
    ("PerformanceEntry", true),
    ("PerformanceMark", true),
    ("PerformanceMeasure", true),
    ("CustomEvent", true),
    ("Headers", true),
    ("Request", true),
    ("Response", true),
    ("DOMException", true),
    ("Event", true),
    ("EventTarget", true),
    ("ProgressEvent", true),
    ("AbortController", true),
    ("Blob", true),
    ("File", true),
    ("ReadableStreamBYOBRequest", true),
    ("MessageEvent", true),
    ("MessageChannel", true),
    ("MessagePort", true),
    ("CompressionStream", true),
    ("DecompressionStream", true),
    ("CloseEvent", true),
    ("WebSocket", true),
    ("Crypto", true),
    ("URLSearchParams", true),
    ("URL", true),
    ("URLPattern", true),
];

/// An allow/deny table the sandbox enforces.
///
/// [`GlobalPolicy::standard`] is the platform table. Extra denies can be
/// layered on top, but nothing can re-allow a name the table denies.
#[derive(Debug, Clone)]
pub struct GlobalPolicy {
    entries: Vec<(Cow<'static, str>, bool)>,
}

impl GlobalPolicy {
    /// The platform policy.
    pub fn standard() -> Self {
        Self {
            entries: GLOBAL_POLICY
                .iter()
                .map(|(name, allowed)| (Cow::Borrowed(*name), *allowed))
                .collect(),
        }
    }

    /// Build a policy from an arbitrary table. Later duplicates override earlier ones.
    pub fn from_table<I, S>(table: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<Cow<'static, str>>,
    {
        let mut policy = Self { entries: Vec::new() };
        for (name, allowed) in table {
            policy.set(name.into(), allowed);
        }
        policy
    }

    /// Deny additional names on top of this policy.
    pub fn with_denied<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        for name in names {
            self.set(name.into(), false);
        }
        self
    }

    fn set(&mut self, name: Cow<'static, str>, allowed: bool) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = allowed,
            None => self.entries.push((name, allowed)),
        }
    }

    /// `Some(true)` if allowed, `Some(false)` if denied, `None` if not listed.
    pub fn is_allowed(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, allowed)| *allowed)
    }

    /// Names that must be neutralized.
    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, allowed)| !allowed)
            .map(|(name, _)| name.as_ref())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, allowed)| (name.as_ref(), *allowed))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_denies_worker_apis() {
        let policy = GlobalPolicy::standard();

        for name in ["eval", "WebAssembly", "postMessage", "caches", "navigator", "close"] {
            assert_eq!(policy.is_allowed(name), Some(false), "{name} should be denied");
        }
        for name in ["console", "JSON", "Promise", "fetch", "addEventListener"] {
            assert_eq!(policy.is_allowed(name), Some(true), "{name} should be allowed");
        }
        assert_eq!(policy.is_allowed("notAGlobal"), None);
    }

    #[test]
    fn test_table_has_no_duplicates() {
        let mut names: Vec<&str> = GLOBAL_POLICY.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_denied_count() {
        let policy = GlobalPolicy::standard();
        assert_eq!(policy.denied().count(), 14);
        assert_eq!(policy.len(), GLOBAL_POLICY.len());
    }

    #[test]
    fn test_with_denied_only_narrows() {
        let policy = GlobalPolicy::standard().with_denied(["fetch", "customThing"]);

        assert_eq!(policy.is_allowed("fetch"), Some(false));
        assert_eq!(policy.is_allowed("customThing"), Some(false));
        assert_eq!(policy.is_allowed("eval"), Some(false));
        assert_eq!(policy.len(), GLOBAL_POLICY.len() + 1);
    }

    #[test]
    fn test_from_table_last_write_wins() {
        let policy = GlobalPolicy::from_table([("a", true), ("b", false), ("a", false)]);
        assert_eq!(policy.is_allowed("a"), Some(false));
        assert_eq!(policy.denied().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
