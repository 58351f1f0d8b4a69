//! Ad request assembly
//!
//! [`RequestBuilder`] turns the slot's placement, consent, shared page state
//! and identity token into an ordered parameter list and then into the
//! request URL. Absent values are omitted rather than sent empty.

use crate::config::ControllerConfig;
use crate::error::SlotResult;
use crate::placement::PlacementConfig;
use adslot_page::{SharedSlotParams, SlotExperiments};
use adslot_types::{ConsentTuple, ContainerType, IdentityToken, Size, ViewportGeometry};
use url::Url;

/// Error-hint parameter appended after a network failure
pub const ERROR_HINT_PARAM: &str = "aet";

/// Error-hint value for a network failure
pub const NETWORK_FAILURE_HINT: &str = "n";

/// Value of the `ptt` parameter
const PTT: &str = "13";

/// Value of the `is_amp` parameter
const IS_AMP: &str = "3";

/// Ordered, collision-free request parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestParams {
    /// Key/value pairs in insertion order
    entries: Vec<(&'static str, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter; `None` is skipped and the first write wins
    pub fn insert(&mut self, key: &'static str, value: Option<String>) {
        let Some(value) = value else {
            return;
        };
        if self.contains(key) {
            debug_assert!(false, "duplicate request parameter {}", key);
            tracing::error!(key, "Duplicate request parameter ignored");
            return;
        }
        self.entries.push((key, value));
    }

    /// Value of a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Parameter names in order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// Key/value pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one request is built from
#[derive(Debug, Clone)]
pub struct RequestInputs<'a> {
    /// Parsed placement attributes
    pub placement: &'a PlacementConfig,
    /// Consent state for this request
    pub consent: &'a ConsentTuple,
    /// Size sent on the wire
    pub size: Size,
    /// Hash of slot name, format and element fingerprint (`adk`)
    pub ad_key: &'a str,
    /// Pagination fields from the shared registry
    pub shared: &'a SharedSlotParams,
    /// Per-network request index (`ifi`)
    pub request_index: u64,
    /// Page correlator (`c`)
    pub correlator: u64,
    /// Page start time in milliseconds (`dt`)
    pub page_start_ms: u64,
    /// Viewport and screen geometry
    pub viewport: ViewportGeometry,
    /// Document URL (`url`)
    pub document_url: &'a str,
    /// Document referrer (`ref`)
    pub referrer: Option<&'a str>,
    /// Enclosing container types
    pub containers: &'a [ContainerType],
    /// Responsive format from the responsive collaborator
    pub rafmt: Option<String>,
    /// Measured size of a story ad (`spsa`)
    pub story_size: Option<Size>,
    /// Identity token, empty after a timeout
    pub identity: &'a IdentityToken,
    /// Experiment branches of the slot (`eid`)
    pub experiments: &'a SlotExperiments,
}

/// Builds request parameters and URLs for one endpoint
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    /// Ad server endpoint
    endpoint: String,
    /// Runtime version (`amp_v`)
    runtime_version: String,
    /// Length above which a warning is logged
    max_url_length: usize,
}

impl RequestBuilder {
    /// Builder for the configured endpoint
    ///
    /// An endpoint that does not parse is logged here; every request then
    /// fails URL assembly and the slot is released.
    pub fn new(config: &ControllerConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Ad endpoint unusable");
        }
        Self {
            endpoint: config.ad_endpoint.clone(),
            runtime_version: config.runtime_version.clone(),
            max_url_length: config.max_url_length,
        }
    }

    /// Assemble the ordered parameter list
    pub fn build(&self, inputs: &RequestInputs<'_>) -> RequestParams {
        let placement = inputs.placement;
        let consent = inputs.consent;
        let mut params = RequestParams::new();

        params.insert("client", Some(placement.client_id.clone()));
        params.insert("format", Some(inputs.size.format()));
        params.insert("w", Some(inputs.size.width.to_string()));
        params.insert("h", Some(inputs.size.height.to_string()));
        params.insert("ptt", Some(PTT.to_string()));
        params.insert("adtest", placement.adtest.then(|| "on".to_string()));
        params.insert("adk", Some(inputs.ad_key.to_string()));
        params.insert("output", Some("html".to_string()));
        params.insert("slotname", non_empty(&placement.slot_name));

        params.insert("pv", Some(inputs.shared.pv.to_string()));
        params.insert("prev_fmts", join_non_empty(&inputs.shared.prev_formats));
        params.insert("prev_slotnames", join_non_empty(&inputs.shared.prev_slot_names));
        params.insert("ifi", Some(inputs.request_index.to_string()));
        params.insert("c", Some(inputs.correlator.to_string()));
        params.insert("dt", Some(inputs.page_start_ms.to_string()));
        params.insert("is_amp", Some(IS_AMP.to_string()));
        params.insert("amp_v", non_empty(&self.runtime_version));
        params.insert("d_imp", Some("1".to_string()));

        let geometry = &inputs.viewport;
        params.insert("biw", Some(geometry.viewport.width.to_string()));
        params.insert("bih", Some(geometry.viewport.height.to_string()));
        params.insert("u_w", Some(geometry.screen.width.to_string()));
        params.insert("u_h", Some(geometry.screen.height.to_string()));
        params.insert("scr_x", Some(geometry.scroll_x.to_string()));
        params.insert("scr_y", Some(geometry.scroll_y.to_string()));
        params.insert("url", non_empty(inputs.document_url));
        params.insert("ref", inputs.referrer.and_then(non_empty));

        params.insert("act", container_types(inputs.containers));
        let sticky = inputs.containers.contains(&ContainerType::StickyAd);
        params.insert("sac", Some(if sticky { "1" } else { "0" }.to_string()));
        params.insert("rafmt", inputs.rafmt.clone());
        params.insert("spsa", inputs.story_size.map(|size| size.format()));

        let identity = inputs.identity;
        params.insert("adsid", identity.token.clone());
        params.insert("jar", identity.jar.clone());
        params.insert("pucrd", identity.pucrd.clone());

        params.insert(
            "npa",
            consent
                .state
                .requires_non_personalized()
                .then(|| "1".to_string()),
        );
        params.insert(
            "gdpr",
            consent
                .gdpr_applies
                .map(|applies| if applies { "1" } else { "0" }.to_string()),
        );
        params.insert("gdpr_consent", consent.consent_string.clone());
        params.insert("addtl_consent", consent.additional_consent.clone());

        params.insert("channel", placement.channel.clone());
        params.insert("hl", placement.language.clone());
        params.insert("host", placement.host.clone());
        params.insert("h_ch", placement.host_channel.clone());
        params.insert("to", placement.tag_origin.clone());
        params.insert("crui", placement.matched_content.ui_type.clone());
        params.insert("cr_row", placement.matched_content.rows.map(|n| n.to_string()));
        params.insert("cr_col", placement.matched_content.columns.map(|n| n.to_string()));
        params.insert("pwprc", placement.package_code.clone());
        params.insert("eid", inputs.experiments.eid());

        params
    }

    /// Encode parameters onto the endpoint
    pub fn to_url(&self, params: &RequestParams) -> SlotResult<String> {
        let url = Url::parse_with_params(&self.endpoint, params.iter())?;
        let url = String::from(url);
        if url.len() > self.max_url_length {
            tracing::warn!(
                length = url.len(),
                max = self.max_url_length,
                "Request URL exceeds maximum length"
            );
        }
        Ok(url)
    }

    /// Append an error hint unless one is present or the URL would grow too long
    pub fn append_error_hint(&self, url: String, hint: &str) -> String {
        let present = url.contains(&format!("?{}=", ERROR_HINT_PARAM))
            || url.contains(&format!("&{}=", ERROR_HINT_PARAM));
        if present {
            return url;
        }

        let appended = format!("{}&{}={}", url, ERROR_HINT_PARAM, hint);
        if appended.len() > self.max_url_length {
            tracing::debug!("Skipping error hint, URL at maximum length");
            return url;
        }
        appended
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn join_non_empty(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(","))
}

fn container_types(containers: &[ContainerType]) -> Option<String> {
    let mut tags: Vec<&str> = containers.iter().map(ContainerType::tag).collect();
    tags.sort_unstable();
    tags.dedup();
    (!tags.is_empty()).then(|| tags.join(","))
}
