//! Placement fingerprinting
//!
//! A slot's ad key must stay stable across page loads as long as the
//! placement does not move in the document. It is derived from the slot
//! name, the requested format and a structural fingerprint of the element's
//! ancestry, folded through a 32-bit string hash.

use serde::{Deserialize, Serialize};

/// Maximum number of ancestry levels included in a fingerprint
pub const MAX_FINGERPRINT_DEPTH: usize = 25;

/// Preceding siblings examined when computing a sibling index
const MAX_SIBLINGS_EXAMINED: usize = 25;

/// Sibling indices at or above this are dropped
const MAX_SIBLING_INDEX: usize = 100;

/// Initial value of the string hash
const HASH_SEED: u32 = 5381;

/// One element on the path from the slot up to the document root
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementNode {
    /// Tag name
    pub tag: String,
    /// Element id attribute, if any
    pub id: Option<String>,
    /// Tag names of preceding element siblings, nearest first
    pub preceding_siblings: Vec<String>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set preceding siblings, nearest first
    pub fn with_preceding_siblings<I, S>(mut self, siblings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preceding_siblings = siblings.into_iter().map(Into::into).collect();
        self
    }

    /// `.N` where N counts same-tag siblings before this one
    ///
    /// Empty when the parent is too crowded for the index to be stable.
    fn sibling_index(&self) -> String {
        let mut examined = 0;
        let mut same_tag = 0;
        for sibling in self.preceding_siblings.iter().take(MAX_SIBLINGS_EXAMINED) {
            examined += 1;
            if sibling.eq_ignore_ascii_case(&self.tag) {
                same_tag += 1;
            }
        }

        if examined < MAX_SIBLINGS_EXAMINED && same_tag < MAX_SIBLING_INDEX {
            format!(".{}", same_tag)
        } else {
            String::new()
        }
    }

    fn fingerprint_part(&self) -> String {
        let mut part = self.tag.to_ascii_lowercase();
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            part.push('/');
            part.push_str(id);
        }
        part.push_str(&self.sibling_index());
        part
    }
}

/// Structural fingerprint of an ancestry path, slot element first
pub fn dom_fingerprint(path: &[ElementNode]) -> String {
    path.iter()
        .take(MAX_FINGERPRINT_DEPTH)
        .map(ElementNode::fingerprint_part)
        .collect::<Vec<_>>()
        .join(",")
}

/// 32-bit djb2-xor hash over UTF-16 code units, as an unsigned decimal
pub fn string_hash32(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(HASH_SEED, |hash, unit| hash.wrapping_mul(33) ^ u32::from(unit));
    hash.to_string()
}

/// Stable key for a placement
pub fn ad_key(slot_name: &str, format: &str, path: &[ElementNode]) -> String {
    string_hash32(&format!("{}:{}:{}", slot_name, format, dom_fingerprint(path)))
}
