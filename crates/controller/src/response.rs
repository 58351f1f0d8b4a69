//! Directives carried in ad response headers

use adslot_types::ResponseHeaders;
use std::collections::BTreeMap;
use tracing::warn;

/// Query id of the served ad
pub const QUERY_ID_HEADER: &str = "X-QQID";

/// `true` when the creative frame must be sandboxed
pub const SANDBOX_HEADER: &str = "amp-ff-sandbox";

/// JSON analytics configuration
pub const ANALYTICS_HEADER: &str = "X-AmpAnalytics";

/// `;`-separated `name=value` post-response feature flags
pub const FEATURES_HEADER: &str = "amp-ff-exps";

/// Feature flag that defers analytics insertion
pub const DISABLE_IMMEDIATE_FEATURE: &str = "avr_disable_immediate";

/// Parsed response directives
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseDirectives {
    pub query_id: Option<String>,
    pub sandbox: bool,
    pub analytics_config: Option<serde_json::Value>,
    pub features: BTreeMap<String, String>,
}

impl ResponseDirectives {
    pub fn from_headers(headers: &ResponseHeaders) -> Self {
        let query_id = headers
            .get(QUERY_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);

        let sandbox = headers
            .get(SANDBOX_HEADER)
            .is_some_and(|value| value.trim() == "true");

        let analytics_config = headers
            .get(ANALYTICS_HEADER)
            .and_then(parse_analytics_config);

        let features = headers
            .get(FEATURES_HEADER)
            .map(parse_features)
            .unwrap_or_default();

        Self {
            query_id,
            sandbox,
            analytics_config,
            features,
        }
    }

    /// Whether analytics insertion should wait for the frame
    pub fn defer_analytics(&self) -> bool {
        self.features.contains_key(DISABLE_IMMEDIATE_FEATURE)
    }
}

fn parse_analytics_config(raw: &str) -> Option<serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => {
            warn!("Analytics header is not a JSON object, ignoring");
            None
        }
        Err(e) => {
            warn!(error = %e, "Malformed analytics header, ignoring");
            None
        }
    }
}

fn parse_features(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_headers() {
        let directives = ResponseDirectives::from_headers(&ResponseHeaders::new());
        assert_eq!(directives, ResponseDirectives::default());
        assert!(!directives.defer_analytics());
    }

    #[test]
    fn test_all_directives() {
        let headers: ResponseHeaders = [
            ("X-QQID", "qid-42"),
            ("amp-ff-sandbox", "true"),
            ("X-AmpAnalytics", r#"{"url":["https://track.example/1"]}"#),
            ("amp-ff-exps", "avr_disable_immediate=1; other=2"),
        ]
        .into_iter()
        .collect();

        let directives = ResponseDirectives::from_headers(&headers);
        assert_eq!(directives.query_id.as_deref(), Some("qid-42"));
        assert!(directives.sandbox);
        assert_eq!(
            directives.analytics_config,
            Some(serde_json::json!({"url": ["https://track.example/1"]}))
        );
        assert_eq!(directives.features.get("other").map(String::as_str), Some("2"));
        assert!(directives.defer_analytics());
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let headers = ResponseHeaders::new().with("x-qqid", "abc");
        let directives = ResponseDirectives::from_headers(&headers);
        assert_eq!(directives.query_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_sandbox_requires_true() {
        let headers = ResponseHeaders::new().with(SANDBOX_HEADER, "1");
        assert!(!ResponseDirectives::from_headers(&headers).sandbox);
    }

    #[test]
    fn test_malformed_analytics_ignored() {
        let headers = ResponseHeaders::new().with(ANALYTICS_HEADER, "{not json");
        assert!(ResponseDirectives::from_headers(&headers).analytics_config.is_none());

        let headers = ResponseHeaders::new().with(ANALYTICS_HEADER, "[1,2]");
        assert!(ResponseDirectives::from_headers(&headers).analytics_config.is_none());
    }

    #[test]
    fn test_bare_feature_name() {
        let headers = ResponseHeaders::new().with(FEATURES_HEADER, "avr_disable_immediate");
        assert!(ResponseDirectives::from_headers(&headers).defer_analytics());
    }
}
