use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Value;

/// The fact set a decision is made against: field name to [`Value`].
///
/// Keys are kept ordered so that anything derived from a fact set
/// (premise keys, notes) comes out in the same order every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts {
    values: BTreeMap<String, Value>,
}

impl Facts {
    /// Create an empty fact set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact, builder style.
    #[must_use]
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.insert(field, value.into());
        self
    }

    /// Insert a fact, replacing any previous value for `field`.
    pub fn insert(&mut self, field: &str, value: Value) {
        self.values.insert(field.to_owned(), value);
    }

    /// Remove a fact, returning its value if it was present.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Field names in sorted order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a JSON object of facts, e.g. the body of a decide request.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the input is not an
    /// object of bools, numbers, strings and lists.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let facts = Facts::new().set("activity", "public_offer");
        assert_eq!(facts.get("activity"), Some(&Value::from("public_offer")));
        assert_eq!(facts.get("authorized"), None);
    }

    #[test]
    fn overwrite_value() {
        let facts = Facts::new().set("score", 10_i64).set("score", 20_i64);
        assert_eq!(facts.get("score"), Some(&Value::Int(20)));
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn fields_are_sorted() {
        let facts = Facts::new().set("b", 1_i64).set("a", 2_i64).set("c", 3_i64);
        assert_eq!(facts.fields().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_fact() {
        let mut facts = Facts::new().set("x", true);
        assert_eq!(facts.remove("x"), Some(Value::Bool(true)));
        assert!(facts.is_empty());
    }

    #[test]
    fn from_json_object() {
        let facts = Facts::from_json(
            r#"{"activity": "public_offer", "authorized": false, "reserve_ratio": 1.05,
                "investor_types": ["retail"]}"#,
        )
        .unwrap();
        assert_eq!(facts.get("authorized"), Some(&Value::Bool(false)));
        assert_eq!(facts.get("reserve_ratio"), Some(&Value::Float(1.05)));
        assert_eq!(
            facts.get("investor_types"),
            Some(&Value::from(vec!["retail"]))
        );
    }

    #[test]
    fn from_json_rejects_nested_objects() {
        assert!(Facts::from_json(r#"{"entity": {"kind": "casp"}}"#).is_err());
    }

    #[test]
    fn collect_from_pairs() {
        let facts: Facts = [("a", 1_i64), ("b", 2_i64)].into_iter().collect();
        assert_eq!(facts.len(), 2);
        assert!(facts.contains("b"));
    }
}
