//! Placement configuration parsed from the slot element's attributes

use crate::error::ValidationError;
use adslot_page::SlotAttributes;
use adslot_types::Size;
use std::collections::BTreeMap;

pub const ATTR_CLIENT: &str = "data-ad-client";
pub const ATTR_SLOT: &str = "data-ad-slot";
pub const ATTR_WIDTH: &str = "width";
pub const ATTR_HEIGHT: &str = "height";
pub const ATTR_CHANNEL: &str = "data-ad-channel";
pub const ATTR_LANGUAGE: &str = "data-language";
pub const ATTR_HOST: &str = "data-ad-host";
pub const ATTR_HOST_CHANNEL: &str = "data-ad-host-channel";
pub const ATTR_TAG_ORIGIN: &str = "data-tag-origin";
pub const ATTR_MATCHED_CONTENT_UI_TYPE: &str = "data-matched-content-ui-type";
pub const ATTR_MATCHED_CONTENT_ROWS: &str = "data-matched-content-rows-num";
pub const ATTR_MATCHED_CONTENT_COLUMNS: &str = "data-matched-content-columns-num";
pub const ATTR_PACKAGE: &str = "data-package";
pub const ATTR_ADTEST: &str = "data-adtest";
pub const ATTR_NPA_ON_UNKNOWN_CONSENT: &str = "data-npa-on-unknown-consent";
pub const ATTR_BLOCK_ON_CONSENT: &str = "data-block-on-consent";
pub const ATTR_STORY: &str = "amp-story";

/// Consent policy used when `data-block-on-consent` has no value
pub const DEFAULT_CONSENT_POLICY: &str = "default";

/// A width or height attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    /// Not set
    #[default]
    Unset,
    /// Fixed pixel value
    Pixels(u32),
    /// `auto`, `fluid` or a percentage; resolved by layout
    Auto,
}

impl Dimension {
    fn parse(name: &str, raw: Option<&str>) -> Result<Self, ValidationError> {
        let value = match raw.map(str::trim) {
            None | Some("") => return Ok(Dimension::Unset),
            Some(value) => value,
        };

        if value.eq_ignore_ascii_case("auto")
            || value.eq_ignore_ascii_case("fluid")
            || value.ends_with('%')
        {
            return Ok(Dimension::Auto);
        }

        value
            .strip_suffix("px")
            .unwrap_or(value)
            .parse::<u32>()
            .map(Dimension::Pixels)
            .map_err(|_| ValidationError::InvalidAttribute {
                name: name.to_string(),
                value: value.to_string(),
            })
    }

    pub fn pixels(&self) -> Option<u32> {
        match self {
            Dimension::Pixels(px) => Some(*px),
            _ => None,
        }
    }
}

/// Matched-content layout hints
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchedContent {
    pub ui_type: Option<String>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
}

/// Validated slot configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlacementConfig {
    /// Publisher client id (required)
    pub client_id: String,
    /// Publisher slot name; empty when unnamed
    pub slot_name: String,
    pub width: Dimension,
    pub height: Dimension,
    pub channel: Option<String>,
    pub language: Option<String>,
    pub host: Option<String>,
    pub host_channel: Option<String>,
    pub tag_origin: Option<String>,
    pub matched_content: MatchedContent,
    pub package_code: Option<String>,
    /// Test traffic flag
    pub adtest: bool,
    /// Request non-personalized ads when consent is unknown
    pub npa_on_unknown_consent: bool,
    /// Single-page story ad
    pub story_ad: bool,
    /// Consent policy the identity fetch is gated on
    pub consent_policy: Option<String>,
}

impl PlacementConfig {
    /// Parse and validate an attribute map
    pub fn from_attributes(attrs: &BTreeMap<String, String>) -> Result<Self, ValidationError> {
        let get = |name: &str| {
            attrs
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(String::from)
        };

        let client_id = get(ATTR_CLIENT).ok_or(ValidationError::MissingClient)?;

        let width = Dimension::parse(ATTR_WIDTH, attrs.get(ATTR_WIDTH).map(String::as_str))?;
        let height = Dimension::parse(ATTR_HEIGHT, attrs.get(ATTR_HEIGHT).map(String::as_str))?;

        let count = |name: &str| -> Result<Option<u32>, ValidationError> {
            get(name)
                .map(|raw| {
                    raw.parse::<u32>()
                        .map_err(|_| ValidationError::InvalidAttribute {
                            name: name.to_string(),
                            value: raw.clone(),
                        })
                })
                .transpose()
        };

        let matched_content = MatchedContent {
            ui_type: get(ATTR_MATCHED_CONTENT_UI_TYPE),
            rows: count(ATTR_MATCHED_CONTENT_ROWS)?,
            columns: count(ATTR_MATCHED_CONTENT_COLUMNS)?,
        };

        let consent_policy = attrs.get(ATTR_BLOCK_ON_CONSENT).map(|value| {
            let value = value.trim();
            if value.is_empty() {
                DEFAULT_CONSENT_POLICY.to_string()
            } else {
                value.to_string()
            }
        });

        Ok(Self {
            client_id,
            slot_name: get(ATTR_SLOT).unwrap_or_default(),
            width,
            height,
            channel: get(ATTR_CHANNEL),
            language: get(ATTR_LANGUAGE),
            host: get(ATTR_HOST),
            host_channel: get(ATTR_HOST_CHANNEL),
            tag_origin: get(ATTR_TAG_ORIGIN),
            matched_content,
            package_code: get(ATTR_PACKAGE),
            adtest: get(ATTR_ADTEST).is_some_and(|v| v.eq_ignore_ascii_case("on")),
            npa_on_unknown_consent: get(ATTR_NPA_ON_UNKNOWN_CONSENT).as_deref() == Some("true"),
            story_ad: attrs.contains_key(ATTR_STORY),
            consent_policy,
        })
    }

    /// Size from explicit pixel attributes, when both are present
    pub fn explicit_size(&self) -> Option<Size> {
        Some(Size::new(self.width.pixels()?, self.height.pixels()?))
    }

    /// Attributes consulted by experiment eligibility predicates
    pub fn slot_attributes(&self, has_responsive: bool) -> SlotAttributes {
        SlotAttributes {
            explicit_width: self.width.pixels(),
            explicit_height: self.height.pixels(),
            has_responsive,
            is_story_ad: self.story_ad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_placement() {
        let config = PlacementConfig::from_attributes(&attrs(&[(ATTR_CLIENT, "ca-pub-123")]))
            .expect("valid");
        assert_eq!(config.client_id, "ca-pub-123");
        assert_eq!(config.slot_name, "");
        assert_eq!(config.width, Dimension::Unset);
        assert!(!config.adtest);
        assert!(config.consent_policy.is_none());
        assert!(config.explicit_size().is_none());
    }

    #[test]
    fn test_missing_client_rejected() {
        let result = PlacementConfig::from_attributes(&attrs(&[(ATTR_SLOT, "top")]));
        assert_eq!(result, Err(ValidationError::MissingClient));

        let result = PlacementConfig::from_attributes(&attrs(&[(ATTR_CLIENT, "  ")]));
        assert_eq!(result, Err(ValidationError::MissingClient));
    }

    #[test]
    fn test_full_placement() {
        let config = PlacementConfig::from_attributes(&attrs(&[
            (ATTR_CLIENT, "ca-pub-123"),
            (ATTR_SLOT, "top"),
            (ATTR_WIDTH, "300"),
            (ATTR_HEIGHT, "250px"),
            (ATTR_CHANNEL, "c1+c2"),
            (ATTR_LANGUAGE, "fr"),
            (ATTR_MATCHED_CONTENT_UI_TYPE, "image_stacked"),
            (ATTR_MATCHED_CONTENT_ROWS, "2"),
            (ATTR_MATCHED_CONTENT_COLUMNS, "3"),
            (ATTR_ADTEST, "on"),
            (ATTR_NPA_ON_UNKNOWN_CONSENT, "true"),
            (ATTR_BLOCK_ON_CONSENT, ""),
        ]))
        .expect("valid");

        assert_eq!(config.slot_name, "top");
        assert_eq!(config.explicit_size(), Some(Size::new(300, 250)));
        assert_eq!(config.channel.as_deref(), Some("c1+c2"));
        assert_eq!(config.matched_content.rows, Some(2));
        assert_eq!(config.matched_content.columns, Some(3));
        assert!(config.adtest);
        assert!(config.npa_on_unknown_consent);
        assert_eq!(config.consent_policy.as_deref(), Some(DEFAULT_CONSENT_POLICY));
    }

    #[test]
    fn test_relative_dimensions() {
        let config = PlacementConfig::from_attributes(&attrs(&[
            (ATTR_CLIENT, "ca-pub-1"),
            (ATTR_WIDTH, "100%"),
            (ATTR_HEIGHT, "auto"),
        ]))
        .expect("valid");
        assert_eq!(config.width, Dimension::Auto);
        assert_eq!(config.height, Dimension::Auto);

        let eligibility = config.slot_attributes(false);
        assert_eq!(eligibility.explicit_width, None);
        assert_eq!(eligibility.explicit_height, None);
    }

    #[test]
    fn test_garbage_dimension_rejected() {
        let result = PlacementConfig::from_attributes(&attrs(&[
            (ATTR_CLIENT, "ca-pub-1"),
            (ATTR_WIDTH, "wide"),
        ]));
        assert!(matches!(
            result,
            Err(ValidationError::InvalidAttribute { ref name, .. }) if name == ATTR_WIDTH
        ));
    }

    #[test]
    fn test_garbage_row_count_rejected() {
        let result = PlacementConfig::from_attributes(&attrs(&[
            (ATTR_CLIENT, "ca-pub-1"),
            (ATTR_MATCHED_CONTENT_ROWS, "two"),
        ]));
        assert!(matches!(result, Err(ValidationError::InvalidAttribute { .. })));
    }

    #[test]
    fn test_story_and_npa_flags() {
        let config = PlacementConfig::from_attributes(&attrs(&[
            (ATTR_CLIENT, "ca-pub-1"),
            (ATTR_STORY, ""),
            (ATTR_NPA_ON_UNKNOWN_CONSENT, "yes"),
        ]))
        .expect("valid");
        assert!(config.story_ad);
        assert!(!config.npa_on_unknown_consent);
        assert!(config.slot_attributes(true).is_story_ad);
    }
}
