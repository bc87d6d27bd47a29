//! Case definitions and their plain-text interchange format.
//!
//! A case is one master tag (the carton or tote) plus the product tags that
//! should travel with it. The text format is line based:
//!
//! ```text
//! # outbound order 1182
//! MASTER E2801160600002084E2C1234
//! E2801160600002084E2C0001
//! E2801160600002084E2C0002
//!
//! MASTER: E2801160600002084E2C5678
//! E2801160600002084E2C0003
//! ```
//!
//! `MASTER` is matched case-insensitively and may be followed by whitespace
//! or a colon. Lines starting with `#` are comments. Product lines that appear
//! before the first marker are ignored. A product tag that would read back as
//! a comment or a marker cannot be written, so [`Case::new`] rejects it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TagId;

/// Marker token that starts a new case in the text format.
pub const MASTER_MARKER: &str = "MASTER";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaseError {
    #[error("master tag must not be empty")]
    EmptyMasterTag,
    #[error("tag {0} is not a product tag of this case")]
    NotAProductTag(String),
    #[error("product tag '{0}' would be read back as a comment or marker")]
    ReservedProductTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub master_tag: TagId,
    #[serde(default)]
    pub product_tags: Vec<TagId>,
    #[serde(default)]
    pub expired_product_tags: Vec<TagId>,
}

impl Case {
    /// Build a case with a fresh opaque id.
    pub fn new(
        master_tag: impl Into<String>,
        product_tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, CaseError> {
        let master_tag = master_tag.into().trim().to_owned();
        if master_tag.is_empty() {
            return Err(CaseError::EmptyMasterTag);
        }
        let product_tags: Vec<TagId> = product_tags
            .into_iter()
            .map(|t| t.into().trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(reserved) = product_tags
            .iter()
            .find(|t| t.starts_with('#') || strip_marker(t).is_some())
        {
            return Err(CaseError::ReservedProductTag(reserved.clone()));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            master_tag,
            product_tags,
            expired_product_tags: Vec::new(),
        })
    }

    /// Every tag that must be read for this case to be complete: the master
    /// first, then product tags in listed order. Trimmed, empties dropped,
    /// duplicates collapsed.
    pub fn expected_tags(&self) -> Vec<TagId> {
        let mut expected: Vec<TagId> = Vec::with_capacity(self.product_tags.len() + 1);
        for tag in std::iter::once(&self.master_tag).chain(self.product_tags.iter()) {
            let tag = tag.trim();
            if !tag.is_empty() && !expected.iter().any(|t| t == tag) {
                expected.push(tag.to_owned());
            }
        }
        expected
    }

    pub fn is_expired(&self) -> bool {
        !self.expired_product_tags.is_empty()
    }

    pub fn is_product_expired(&self, tag: &str) -> bool {
        let tag = tag.trim();
        self.expired_product_tags.iter().any(|t| t.trim() == tag)
    }

    /// Flip the expired flag for one product tag. Returns the new flag value.
    pub fn toggle_expired(&mut self, tag: &str) -> Result<bool, CaseError> {
        let tag = tag.trim();
        if !self.product_tags.iter().any(|t| t.trim() == tag) {
            return Err(CaseError::NotAProductTag(tag.to_owned()));
        }
        if self.is_product_expired(tag) {
            self.expired_product_tags.retain(|t| t.trim() != tag);
            Ok(false)
        } else {
            self.expired_product_tags.push(tag.to_owned());
            Ok(true)
        }
    }
}

fn strip_marker(line: &str) -> Option<&str> {
    let head = line.get(..MASTER_MARKER.len())?;
    if !head.eq_ignore_ascii_case(MASTER_MARKER) {
        return None;
    }
    let rest = &line[MASTER_MARKER.len()..];
    if rest.is_empty() {
        return Some(rest);
    }
    if let Some(after_colon) = rest.strip_prefix(':') {
        return Some(after_colon.trim());
    }
    if rest.starts_with(char::is_whitespace) {
        return Some(rest.trim());
    }
    None
}

/// Parse the text format. Cases whose marker carries no tag are skipped.
/// A document without any marker parses to an empty list.
pub fn parse_cases(text: &str) -> Vec<Case> {
    let mut cases: Vec<Case> = Vec::new();
    // None while outside a case (before the first marker or after an empty one).
    let mut current: Option<Case> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(master) = strip_marker(line) {
            cases.extend(current.take());
            let master = master.split_whitespace().next().unwrap_or("");
            current = Case::new(master, Vec::<String>::new()).ok();
            continue;
        }
        if let Some(case) = current.as_mut() {
            case.product_tags.push(line.to_owned());
        }
    }
    cases.extend(current);
    cases
}

/// Render cases in the text format. Expired flags are not part of the format.
pub fn format_cases(cases: &[Case]) -> String {
    let mut out = String::new();
    for (i, case) in cases.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(MASTER_MARKER);
        out.push(' ');
        out.push_str(case.master_tag.trim());
        out.push('\n');
        for tag in &case.product_tags {
            out.push_str(tag.trim());
            out.push('\n');
        }
    }
    out
}
