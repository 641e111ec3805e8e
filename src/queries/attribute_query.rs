//! Projection specs.
//!
//! An [`AttributeQuery`] names the value attributes to fetch and, for each
//! relation attribute, a nested projection of the related record. The `&`
//! entry of a nested projection selects link-record attributes.
//!
//! JSON form, as accepted by [`AttributeQuery::from_json`]:
//!
//! ```json
//! ["name", "age", ["teams", ["name", ["&", ["role"]]]]]
//! ```
//!
//! `"*"` selects every value attribute.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;

use crate::value::LINK_KEY;

/// Every value attribute.
pub const ALL_VALUES: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeQuery {
    pub values: BTreeSet<String>,
    pub nested: BTreeMap<String, AttributeQuery>,
    /// Link-record projection (the `&` entry).
    pub link: Option<Box<AttributeQuery>>,
    /// Only link data is wanted; the related record contributes its id only.
    pub only_link: bool,
}

impl AttributeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value attribute, no relations.
    pub fn all() -> Self {
        Self::new().value(ALL_VALUES)
    }

    pub fn value(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into());
        self
    }

    pub fn values<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add a nested projection, merging with an existing one.
    pub fn nested(mut self, attribute: impl Into<String>, query: AttributeQuery) -> Self {
        let attribute = attribute.into();
        if attribute == LINK_KEY {
            return self.with_link(query);
        }
        let merged = match self.nested.remove(&attribute) {
            Some(existing) => existing.merge(&query),
            None => query,
        };
        self.nested.insert(attribute, merged);
        self
    }

    pub fn with_link(mut self, query: AttributeQuery) -> Self {
        let merged = match self.link.take() {
            Some(existing) => existing.merge(&query),
            None => query,
        };
        self.link = Some(Box::new(merged));
        self
    }

    pub fn only_link(mut self) -> Self {
        self.only_link = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.nested.is_empty() && self.link.is_none()
    }

    pub fn wants_all_values(&self) -> bool {
        self.values.contains(ALL_VALUES)
    }

    /// Union of two projections.
    ///
    /// Associative and idempotent: value sets are unioned, nested
    /// projections merged recursively, and `only_link` survives only when
    /// both sides ask for link data alone.
    pub fn merge(&self, other: &AttributeQuery) -> AttributeQuery {
        let mut out = self.clone();
        out.values.extend(other.values.iter().cloned());
        for (name, query) in &other.nested {
            let merged = match out.nested.get(name) {
                Some(existing) => existing.merge(query),
                None => query.clone(),
            };
            out.nested.insert(name.clone(), merged);
        }
        out.link = match (&self.link, &other.link) {
            (Some(a), Some(b)) => Some(Box::new(a.merge(b))),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        out.only_link = self.only_link && other.only_link;
        out
    }

    /// Parse the JSON array form. Returns `None` for malformed input.
    pub fn from_json(json: &JsonValue) -> Option<AttributeQuery> {
        let items = json.as_array()?;
        let mut query = AttributeQuery::new();
        for item in items {
            match item {
                JsonValue::String(name) => query.values.insert(name.clone()),
                JsonValue::Array(pair) if pair.len() == 2 => {
                    let name = pair[0].as_str()?;
                    let nested = AttributeQuery::from_json(&pair[1])?;
                    query = query.nested(name, nested);
                    true
                }
                _ => return None,
            };
        }
        Some(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn a() -> AttributeQuery {
        AttributeQuery::new()
            .value("name")
            .nested("teams", AttributeQuery::new().value("name"))
    }

    fn b() -> AttributeQuery {
        AttributeQuery::new()
            .value("age")
            .nested(
                "teams",
                AttributeQuery::new().with_link(AttributeQuery::new().value("role")),
            )
    }

    fn c() -> AttributeQuery {
        AttributeQuery::new().nested("friends", AttributeQuery::all()).only_link()
    }

    #[test]
    fn test_merge_is_idempotent() {
        for q in [a(), b(), c()] {
            assert_eq!(q.merge(&q), q);
        }
    }

    #[test]
    fn test_merge_is_associative() {
        assert_eq!(a().merge(&b()).merge(&c()), a().merge(&b().merge(&c())));
    }

    #[test]
    fn test_merge_unions_nested() {
        let merged = a().merge(&b());
        let teams = &merged.nested["teams"];
        assert!(teams.values.contains("name"));
        assert!(teams.link.as_ref().unwrap().values.contains("role"));
        assert_eq!(merged.values.len(), 2);
    }

    #[test]
    fn test_only_link_requires_both() {
        let link_only = AttributeQuery::new().only_link();
        assert!(link_only.merge(&link_only).only_link);
        assert!(!link_only.merge(&AttributeQuery::new()).only_link);
    }

    #[test]
    fn test_from_json() {
        let query =
            AttributeQuery::from_json(&json!(["name", ["teams", ["name", ["&", ["role"]]]]])).unwrap();
        let expected = AttributeQuery::new().value("name").nested(
            "teams",
            AttributeQuery::new()
                .value("name")
                .with_link(AttributeQuery::new().value("role")),
        );
        assert_eq!(query, expected);
        assert!(AttributeQuery::from_json(&json!([1])).is_none());
    }
}
