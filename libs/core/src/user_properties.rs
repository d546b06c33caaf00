use std::collections::BTreeMap;

use serde_json::Value;

/// Computed user-property assignments keyed by property name, as produced by
/// the segmentation engine. Values are free-form JSON.
pub type UserPropertyAssignments = BTreeMap<String, Value>;

/// Resolves the channel identifier for `key` from the assignments.
///
/// Strings pass through; numbers are coerced to their string form (phone
/// numbers are sometimes ingested as integers). Anything else counts as a
/// missing identifier.
///
/// ```
/// use peregrine_core::identifier_for;
/// use serde_json::json;
///
/// let mut props = std::collections::BTreeMap::new();
/// props.insert("phone".to_string(), json!(15551234567u64));
/// assert_eq!(identifier_for(&props, "phone").as_deref(), Some("15551234567"));
/// assert_eq!(identifier_for(&props, "email"), None);
/// ```
pub fn identifier_for(assignments: &UserPropertyAssignments, key: &str) -> Option<String> {
    match assignments.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_scalar_identifiers() {
        let mut props = UserPropertyAssignments::new();
        props.insert("email".into(), json!({"nested": true}));
        props.insert("phone".into(), json!(["555"]));
        props.insert("deviceToken".into(), json!(""));
        assert_eq!(identifier_for(&props, "email"), None);
        assert_eq!(identifier_for(&props, "phone"), None);
        assert_eq!(identifier_for(&props, "deviceToken"), None);
    }
}
