//! Tag identifier extraction from loosely-structured payloads.
//!
//! Readers and gateways push JSON in whatever shape they like. The walk
//! below prefers well-known key names, then falls back to progressively
//! looser guesses. It never fails: an unrecognized shape is simply "no tag".

use serde_json::{Map, Value};

use crate::TagId;

/// Keys checked, in order, for a direct string tag id on an object.
pub const PRIORITY_KEYS: [&str; 6] = ["epc", "tagId", "tag_id", "id", "tagEPC", "EPC"];

/// Keys that always get their own step in the object walk and are skipped by
/// the catch-all value scan. `tags` is skipped only when it is an array.
const NESTED_KEYS: [&str; 2] = ["tag", "data"];

/// Shortest id that [`extract_all_tag_ids`] will accept.
pub const MIN_ACCEPTED_LEN: usize = 4;

/// Shortest string that counts as EPC-shaped.
const MIN_EPC_LEN: usize = 6;

/// Returns true when `s` is at least six characters of hex digits and hyphens.
pub fn looks_like_epc(s: &str) -> bool {
    s.chars().count() >= MIN_EPC_LEN && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Find the first tag id anywhere in `payload`.
pub fn extract_first_tag_id(payload: &Value) -> Option<TagId> {
    match payload {
        Value::Null => None,
        Value::String(s) => from_str(s),
        Value::Array(items) => items.iter().find_map(extract_first_tag_id),
        Value::Object(map) => from_object(map),
        Value::Bool(_) | Value::Number(_) => None,
    }
}

/// Every distinct tag id in `payload`, in discovery order.
///
/// The whole payload contributes at most one id; a top-level `tags` array
/// contributes at most one more per element. Ids shorter than
/// [`MIN_ACCEPTED_LEN`] are dropped.
pub fn extract_all_tag_ids(payload: &Value) -> Vec<TagId> {
    let mut found: Vec<TagId> = Vec::new();
    let mut accept = |id: Option<TagId>| {
        if let Some(id) = id
            && id.chars().count() >= MIN_ACCEPTED_LEN
            && !found.contains(&id)
        {
            found.push(id);
        }
    };

    accept(extract_first_tag_id(payload));

    if let Some(Value::Array(tags)) = payload.get("tags") {
        for tag in tags {
            accept(extract_first_tag_id(tag));
        }
    }

    found
}

fn from_str(s: &str) -> Option<TagId> {
    let trimmed = s.trim();
    if looks_like_epc(trimmed) {
        return Some(trimmed.to_owned());
    }
    // Anything non-empty is still a candidate.
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn from_object(map: &Map<String, Value>) -> Option<TagId> {
    for key in PRIORITY_KEYS {
        if let Some(Value::String(s)) = map.get(key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_owned());
            }
        }
    }

    if let Some(id) = map.get("tag").and_then(extract_first_tag_id) {
        return Some(id);
    }
    if let Some(Value::Array(tags)) = map.get("tags")
        && let Some(id) = tags.iter().find_map(extract_first_tag_id)
    {
        return Some(id);
    }
    if let Some(id) = map.get("data").and_then(extract_first_tag_id) {
        return Some(id);
    }

    map.iter()
        .filter(|(key, value)| {
            !NESTED_KEYS.contains(&key.as_str())
                && !(key.as_str() == "tags" && value.is_array())
        })
        .find_map(|(_, value)| extract_first_tag_id(value))
}
