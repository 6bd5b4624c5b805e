//! Event Schema Table
//!
//! Every plugin is tagged with the event type it handles, and the tag decides
//! which fields a request body must carry. The field lists are a contract with
//! the services that originate these requests and must stay bit-exact with
//! them:
//!
//! - page-generate: `onpagegenerate` plugin arguments
//! - url-change: `onurlchange` plugin arguments
//! - api-request: the serving tier's plugin request JSON

use std::fmt;

use serde_json::Value;

/// A required field absent from a JSON body. Only the first one is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Request body is missing: {0}")]
pub struct MissingField(pub &'static str);

/// Return the first of `fields`, in order, that `body` does not contain.
///
/// A `null` value counts as present. A body that is not an object has every
/// field missing.
pub fn first_missing(body: &Value, fields: &[&'static str]) -> Option<&'static str> {
    let obj = body.as_object();
    fields
        .iter()
        .copied()
        .find(|field| obj.is_none_or(|o| !o.contains_key(*field)))
}

/// Event types a plugin can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Unknown,
    UrlChange,
    PageGenerate,
    Api,
}

const PAGE_GENERATE_FIELDS: &[&str] = &["feature", "streamOutput", "site"];

const URL_CHANGE_FIELDS: &[&str] = &[
    "url", "entityId", "locale", "feature", "path", "domains", "site",
];

const API_FIELDS: &[&str] = &[
    "userAgent",
    "headers",
    "method",
    "body",
    "site",
    "queryParams",
    "pathParams",
    "referrer",
    "referrerPolicy",
    "url",
    "cache",
];

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Unknown,
        EventType::UrlChange,
        EventType::PageGenerate,
        EventType::Api,
    ];

    /// Resolve an uploaded `eventType` tag.
    ///
    /// Accepts the numeric wire value (`0`..=`3`, in enum order), the
    /// upstream enum name, or the kebab-case name.
    pub fn from_tag(tag: &Value) -> Option<Self> {
        match tag {
            Value::Number(n) => match integral(n)? {
                0 => Some(Self::Unknown),
                1 => Some(Self::UrlChange),
                2 => Some(Self::PageGenerate),
                3 => Some(Self::Api),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "Event_UNKNOWN_EVENT" | "unknown" => Some(Self::Unknown),
                "Event_ON_URL_CHANGE" | "url-change" => Some(Self::UrlChange),
                "Event_ON_PAGE_GENERATE" | "page-generate" => Some(Self::PageGenerate),
                "Event_API" | "api-request" => Some(Self::Api),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UrlChange => "url-change",
            Self::PageGenerate => "page-generate",
            Self::Api => "api-request",
        }
    }

    /// Fields a request body must contain, in validation order.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Unknown => &[],
            Self::UrlChange => URL_CHANGE_FIELDS,
            Self::PageGenerate => PAGE_GENERATE_FIELDS,
            Self::Api => API_FIELDS,
        }
    }

    /// Validate `body` for this event type and borrow its required fields.
    pub fn parse_request<'a>(&self, body: &'a Value) -> Result<EventRequest<'a>, MissingField> {
        let obj = body.as_object();
        let field = |name: &'static str| obj.and_then(|o| o.get(name)).ok_or(MissingField(name));

        // Field order below is the validation order
        Ok(match self {
            Self::Unknown => EventRequest::Unknown,
            Self::PageGenerate => EventRequest::PageGenerate {
                feature: field("feature")?,
                stream_output: field("streamOutput")?,
                site: field("site")?,
            },
            Self::UrlChange => EventRequest::UrlChange {
                url: field("url")?,
                entity_id: field("entityId")?,
                locale: field("locale")?,
                feature: field("feature")?,
                path: field("path")?,
                domains: field("domains")?,
                site: field("site")?,
            },
            Self::Api => EventRequest::Api {
                user_agent: field("userAgent")?,
                headers: field("headers")?,
                method: field("method")?,
                body: field("body")?,
                site: field("site")?,
                query_params: field("queryParams")?,
                path_params: field("pathParams")?,
                referrer: field("referrer")?,
                referrer_policy: field("referrerPolicy")?,
                url: field("url")?,
                cache: field("cache")?,
            },
        })
    }
}

/// A non-negative whole number, including float forms such as `2.0`
fn integral(n: &serde_json::Number) -> Option<u64> {
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
            .map(|f| f as u64)
    })
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request body that passed validation, one variant per event type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRequest<'a> {
    Unknown,
    PageGenerate {
        feature: &'a Value,
        stream_output: &'a Value,
        site: &'a Value,
    },
    UrlChange {
        url: &'a Value,
        entity_id: &'a Value,
        locale: &'a Value,
        feature: &'a Value,
        path: &'a Value,
        domains: &'a Value,
        site: &'a Value,
    },
    Api {
        user_agent: &'a Value,
        headers: &'a Value,
        method: &'a Value,
        body: &'a Value,
        site: &'a Value,
        query_params: &'a Value,
        path_params: &'a Value,
        referrer: &'a Value,
        referrer_policy: &'a Value,
        url: &'a Value,
        cache: &'a Value,
    },
}

impl EventRequest<'_> {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Unknown => EventType::Unknown,
            Self::PageGenerate { .. } => EventType::PageGenerate,
            Self::UrlChange { .. } => EventType::UrlChange,
            Self::Api { .. } => EventType::Api,
        }
    }

    pub fn site(&self) -> Option<&Value> {
        match self {
            Self::Unknown => None,
            Self::PageGenerate { site, .. } | Self::UrlChange { site, .. } | Self::Api { site, .. } => {
                Some(*site)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_body(event_type: EventType) -> Value {
        let obj: serde_json::Map<String, Value> = event_type
            .required_fields()
            .iter()
            .map(|f| (f.to_string(), json!(format!("{f}-value"))))
            .collect();
        Value::Object(obj)
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(EventType::from_tag(&json!(0)), Some(EventType::Unknown));
        assert_eq!(EventType::from_tag(&json!(1)), Some(EventType::UrlChange));
        assert_eq!(EventType::from_tag(&json!(2)), Some(EventType::PageGenerate));
        assert_eq!(EventType::from_tag(&json!(3)), Some(EventType::Api));
        assert_eq!(EventType::from_tag(&json!("Event_ON_PAGE_GENERATE")), Some(EventType::PageGenerate));
        assert_eq!(EventType::from_tag(&json!("url-change")), Some(EventType::UrlChange));

        assert_eq!(EventType::from_tag(&json!(2.0)), Some(EventType::PageGenerate));
        assert_eq!(EventType::from_tag(&json!(0.0)), Some(EventType::Unknown));
        assert_eq!(EventType::from_tag(&json!(2.5)), None);
        assert_eq!(EventType::from_tag(&json!(-1.0)), None);

        assert_eq!(EventType::from_tag(&json!(4)), None);
        assert_eq!(EventType::from_tag(&json!(-1)), None);
        assert_eq!(EventType::from_tag(&json!("ON_SOMETHING")), None);
        assert_eq!(EventType::from_tag(&json!(null)), None);
    }

    #[test]
    fn test_required_fields_contract() {
        assert_eq!(
            EventType::PageGenerate.required_fields(),
            &["feature", "streamOutput", "site"]
        );
        assert_eq!(
            EventType::UrlChange.required_fields(),
            &["url", "entityId", "locale", "feature", "path", "domains", "site"]
        );
        assert_eq!(
            EventType::Api.required_fields(),
            &[
                "userAgent", "headers", "method", "body", "site", "queryParams", "pathParams",
                "referrer", "referrerPolicy", "url", "cache"
            ]
        );
        assert!(EventType::Unknown.required_fields().is_empty());
    }

    #[test]
    fn test_first_missing_in_order() {
        let body = json!({ "url": "u", "locale": "en" });
        assert_eq!(first_missing(&body, URL_CHANGE_FIELDS), Some("entityId"));

        let body = json!({ "feature": null, "streamOutput": {}, "site": 1 });
        assert_eq!(first_missing(&body, PAGE_GENERATE_FIELDS), None);

        assert_eq!(first_missing(&json!([1, 2]), PAGE_GENERATE_FIELDS), Some("feature"));
        assert_eq!(first_missing(&json!("text"), &[]), None);
    }

    #[test]
    fn test_parse_request_matches_field_order() {
        for event_type in EventType::ALL {
            let full = full_body(event_type);
            let request = event_type.parse_request(&full).unwrap();
            assert_eq!(request.event_type(), event_type);

            // Removing any single field reports exactly that field
            for field in event_type.required_fields() {
                let mut body = full.clone();
                body.as_object_mut().unwrap().remove(*field);
                assert_eq!(event_type.parse_request(&body), Err(MissingField(*field)));
                assert_eq!(first_missing(&body, event_type.required_fields()), Some(*field));
            }
        }
    }

    #[test]
    fn test_parse_request_reports_first_only() {
        let body = json!({ "site": "s" });
        let err = EventType::PageGenerate.parse_request(&body).unwrap_err();
        assert_eq!(err, MissingField("feature"));
        assert_eq!(err.to_string(), "Request body is missing: feature");
    }

    #[test]
    fn test_site_accessor() {
        let body = full_body(EventType::Api);
        let request = EventType::Api.parse_request(&body).unwrap();
        assert_eq!(request.site(), Some(&json!("site-value")));
        assert_eq!(EventRequest::Unknown.site(), None);
    }
}
