//! Plugin Registry
//!
//! In-memory stores populated by the administrative upload endpoints: request
//! path to plugin descriptor, and environment variable name to value. Both
//! live for the lifetime of the server and are never persisted.

use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

use super::event::{first_missing, EventType, MissingField};

/// Fields every uploaded plugin entry must carry, in validation order.
pub const PLUGIN_FIELDS: &[&str] = &["functionFilePath", "functionName", "eventType"];

/// Top-level field of a plugin info upload.
pub const PATH_TO_PLUGIN_INFO: &str = "pathToPluginInfo";

/// Errors validating an upload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Missing(#[from] MissingField),

    #[error("Request body has invalid {field}: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// One deployable plugin: which module, which export, which event schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub function_file_path: String,
    pub function_name: String,
    /// The tag as uploaded. Resolved against the schema table at dispatch.
    pub event_type: Value,
    /// Any other fields sent with the entry
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginDescriptor {
    /// Validate one `pathToPluginInfo` entry.
    pub fn from_upload(info: &Value) -> Result<Self, RegistryError> {
        let obj = info.as_object().ok_or(MissingField(PLUGIN_FIELDS[0]))?;
        if let Some(field) = first_missing(info, PLUGIN_FIELDS) {
            return Err(MissingField(field).into());
        }

        let string_field = |field: &'static str| {
            obj.get(field)
                .and_then(coerce_to_string)
                .ok_or(RegistryError::InvalidField {
                    field,
                    expected: "string or scalar",
                })
        };

        let extra = obj
            .iter()
            .filter(|(key, _)| !PLUGIN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            function_file_path: string_field("functionFilePath")?,
            function_name: string_field("functionName")?,
            event_type: obj.get("eventType").cloned().unwrap_or(Value::Null),
            extra,
        })
    }

    /// The schema this plugin's requests are validated against, if the tag is known.
    pub fn resolve_event_type(&self) -> Option<EventType> {
        EventType::from_tag(&self.event_type)
    }
}

/// String form of a scalar, as JavaScript's `String(value)` renders it.
/// Arrays and objects have no useful string form and are rejected.
fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Some(i.to_string()),
            (_, Some(u), _) => Some(u.to_string()),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => Some((f as i64).to_string()),
            (_, _, Some(f)) => Some(f.to_string()),
            _ => None,
        },
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Request path to plugin descriptor. Last write wins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a descriptor, returning the one it replaced
    pub fn insert(&self, path: impl Into<String>, descriptor: PluginDescriptor) -> Option<Arc<PluginDescriptor>> {
        self.plugins.insert(path.into(), Arc::new(descriptor))
    }

    pub fn get(&self, path: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.get(path).map(|entry| entry.value().clone())
    }

    /// Look up a raw request path after URI-decoding it, so templated
    /// segments such as `{{entityId}}` match their registered form.
    pub fn resolve(&self, raw_path: &str) -> Option<Arc<PluginDescriptor>> {
        self.get(&decode_path(raw_path))
    }

    /// Apply a whole plugin info upload.
    ///
    /// Entries are stored one at a time in upload order. If one is invalid the
    /// upload stops there, and entries stored before it stay registered.
    pub fn apply_upload(&self, body: &Value) -> Result<usize, RegistryError> {
        if let Some(field) = first_missing(body, &[PATH_TO_PLUGIN_INFO]) {
            return Err(MissingField(field).into());
        }
        let entries = body
            .get(PATH_TO_PLUGIN_INFO)
            .and_then(Value::as_object)
            .ok_or(RegistryError::InvalidField {
                field: PATH_TO_PLUGIN_INFO,
                expected: "object",
            })?;

        let mut applied = 0;
        for (path, info) in entries {
            let descriptor = PluginDescriptor::from_upload(info)?;
            tracing::debug!(
                path = %path,
                module = %descriptor.function_file_path,
                function = %descriptor.function_name,
                "Registered plugin"
            );
            if self.insert(path.clone(), descriptor).is_some() {
                tracing::debug!(path = %path, "Replaced existing plugin");
            }
            applied += 1;
        }

        Ok(applied)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Characters `decodeURI` leaves escaped
const RESERVED: &[u8] = b";/?:@&=+$,#";

/// Percent-decode a request path the way `decodeURI` does: escapes of
/// reserved characters (`%2F`, `%3F`, `%23`, ...) stay as they are. Invalid
/// UTF-8 escapes leave the whole path untouched.
pub fn decode_path(raw: &str) -> Cow<'_, str> {
    if !raw.contains('%') {
        return Cow::Borrowed(raw);
    }

    let mut decoded = String::with_capacity(raw.len());
    let mut segment_start = 0;
    let mut cursor = 0;

    // Reserved escapes split the path; a multi-byte UTF-8 sequence never
    // contains one, so each segment decodes on its own
    while let Some(offset) = raw[cursor..].find('%') {
        let at = cursor + offset;
        match reserved_escape(&raw[at..]) {
            Some(escape) => {
                match urlencoding::decode(&raw[segment_start..at]) {
                    Ok(segment) => decoded.push_str(&segment),
                    Err(_) => return Cow::Borrowed(raw),
                }
                decoded.push_str(escape);
                cursor = at + escape.len();
                segment_start = cursor;
            }
            None => cursor = at + 1,
        }
    }

    match urlencoding::decode(&raw[segment_start..]) {
        Ok(segment) => decoded.push_str(&segment),
        Err(_) => return Cow::Borrowed(raw),
    }
    Cow::Owned(decoded)
}

/// The leading `%XX` of `s` if it encodes a reserved character
fn reserved_escape(s: &str) -> Option<&str> {
    let escape = s.get(..3)?;
    let byte = u8::from_str_radix(escape.get(1..)?, 16).ok()?;
    RESERVED.contains(&byte).then_some(escape)
}

/// Environment variables uploaded for plugins.
///
/// The values are also assigned onto the JS global object by the worker; this
/// store is the host-side record of what was applied.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    vars: DashMap<String, Value>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every pair, overwriting existing names. Returns how many were applied.
    pub fn apply<'a>(&self, vars: impl IntoIterator<Item = (&'a String, &'a Value)>) -> usize {
        let mut applied = 0;
        for (name, value) in vars {
            self.vars.insert(name.clone(), value.clone());
            applied += 1;
        }
        applied
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
