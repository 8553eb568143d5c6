//! Provider continuation metadata.
//!
//! Each provider may hand back an opaque blob that lets it resume a specific
//! prior exchange (a chat id, a cursor, a conversation URL...). The domain
//! never interprets these blobs; it only carries, normalizes and merges them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Map of provider id → opaque continuation metadata (Value Object)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderContexts(BTreeMap<String, Value>);

impl ProviderContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a normalized map from stored values.
    ///
    /// Older records wrap the metadata as `{"meta": {...}}`; both shapes are
    /// accepted and unwrapped to the raw metadata. Empty entries are dropped.
    pub fn normalized<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let map = entries
            .into_iter()
            .filter_map(|(provider, value)| {
                let raw = unwrap_legacy_meta(value);
                (!is_empty_meta(&raw)).then_some((provider, raw))
            })
            .collect();
        Self(map)
    }

    /// Re-normalize values that may have been stored in the legacy shape.
    pub fn normalize(self) -> Self {
        Self::normalized(self.0)
    }

    pub fn get(&self, provider: &str) -> Option<&Value> {
        self.0.get(provider)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.0.contains_key(provider)
    }

    /// Insert metadata for a provider. Empty metadata is ignored so an absent
    /// value can never erase an existing one.
    pub fn insert(&mut self, provider: impl Into<String>, meta: Value) {
        if !is_empty_meta(&meta) {
            self.0.insert(provider.into(), meta);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the contexts of the given providers.
    pub fn filtered_to<'a, I>(&self, providers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: Vec<&str> = providers.into_iter().collect();
        Self(
            self.0
                .iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Shallow merge: `newer` entries win, entries absent from `newer` are kept.
    pub fn merged_with(&self, newer: &ProviderContexts) -> Self {
        let mut merged = self.0.clone();
        for (provider, meta) in &newer.0 {
            merged.insert(provider.clone(), meta.clone());
        }
        Self(merged)
    }
}

impl FromIterator<(String, Value)> for ProviderContexts {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self::normalized(iter)
    }
}

fn unwrap_legacy_meta(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("meta") => {
            map.remove("meta").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Whether a metadata blob carries nothing worth keeping.
pub fn is_empty_meta(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalizes_both_shapes() {
        let contexts = ProviderContexts::normalized([
            ("claude".to_string(), json!({"chatId": "c-1"})),
            ("gemini".to_string(), json!({"meta": {"cursor": 7}})),
            ("qwen".to_string(), json!({})),
            ("gpt".to_string(), Value::Null),
        ]);

        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts.get("claude"), Some(&json!({"chatId": "c-1"})));
        assert_eq!(contexts.get("gemini"), Some(&json!({"cursor": 7})));
        assert!(!contexts.contains("qwen"));
    }

    #[test]
    fn test_merge_new_wins_absent_kept() {
        let previous = ProviderContexts::normalized([
            ("a".to_string(), json!({"v": 1})),
            ("b".to_string(), json!({"v": 1})),
        ]);
        let newer = ProviderContexts::normalized([
            ("b".to_string(), json!({"v": 2})),
            ("c".to_string(), json!({"v": 2})),
        ]);

        let merged = previous.merged_with(&newer);
        assert_eq!(merged.get("a"), Some(&json!({"v": 1})));
        assert_eq!(merged.get("b"), Some(&json!({"v": 2})));
        assert_eq!(merged.get("c"), Some(&json!({"v": 2})));
    }

    #[test]
    fn test_insert_ignores_empty_meta() {
        let mut contexts = ProviderContexts::new();
        contexts.insert("a", json!({"v": 1}));
        contexts.insert("a", json!({}));
        assert_eq!(contexts.get("a"), Some(&json!({"v": 1})));
    }

    #[test]
    fn test_filtered_to() {
        let contexts = ProviderContexts::normalized([
            ("a".to_string(), json!({"v": 1})),
            ("b".to_string(), json!({"v": 1})),
        ]);
        let filtered = contexts.filtered_to(["b", "c"]);
        assert_eq!(filtered.providers().collect::<Vec<_>>(), vec!["b"]);
    }
}
