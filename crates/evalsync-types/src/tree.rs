//! JSON-like tree nodes with attachment references.
//!
//! Event payloads arrive as arbitrary JSON in which large content fields have
//! been de-duplicated into an out-of-band attachment table. A reference is
//! encoded on the wire as the reserved single-key mapping
//! `{"$attachment": "<id>"}`; [`Node`] models it as a first-class variant so
//! resolution is a tagged-union transform rather than runtime shape probing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::warn;

/// Reserved mapping key marking an attachment reference.
pub const ATTACHMENT_FIELD: &str = "$attachment";

/// A JSON-like value in which attachment references are explicit leaves.
///
/// Text is stored as `Arc<str>` so that substituting a resolved attachment
/// shares the table's content rather than copying it per reference site.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(Arc<str>),
    Sequence(Vec<Node>),
    Mapping(BTreeMap<String, Node>),
    /// Unresolved reference to an attachment id.
    Attachment(String),
}

impl Node {
    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Node::Text(value.into())
    }

    pub fn attachment(id: impl Into<String>) -> Self {
        Node::Attachment(id.into())
    }

    /// True if this node or any descendant is an unresolved reference.
    pub fn has_unresolved(&self) -> bool {
        match self {
            Node::Attachment(_) => true,
            Node::Sequence(items) => items.iter().any(Node::has_unresolved),
            Node::Mapping(map) => map.values().any(Node::has_unresolved),
            _ => false,
        }
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::Text(s.into()),
            Value::Array(items) => {
                Node::Sequence(items.into_iter().map(Node::from_value).collect())
            }
            Value::Object(map) => {
                // The reserved marker is only a reference when it is the sole
                // key and carries a string id.
                if map.len() == 1 {
                    if let Some(Value::String(id)) = map.get(ATTACHMENT_FIELD) {
                        return Node::Attachment(id.clone());
                    }
                }
                Node::Mapping(
                    map.into_iter()
                        .map(|(k, v)| (k, Node::from_value(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::Text(s) => Value::String(s.to_string()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Node::Attachment(id) => {
                let mut map = serde_json::Map::with_capacity(1);
                map.insert(ATTACHMENT_FIELD.to_string(), Value::String(id.clone()));
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::from_value(value)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::Text(s) => serializer.serialize_str(s),
            Node::Sequence(items) => items.serialize(serializer),
            Node::Mapping(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
            Node::Attachment(id) => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry(ATTACHMENT_FIELD, id)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Node::from_value(Value::deserialize(deserializer)?))
    }
}

/// Grow-only mapping from attachment id to de-duplicated content.
///
/// An id, once issued, is immutable: re-inserting it with different content
/// indicates a misbehaving server and is logged, with the first value kept.
#[derive(Debug, Clone, Default)]
pub struct AttachmentTable {
    content: HashMap<String, Arc<str>>,
}

impl AttachmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, content: impl Into<Arc<str>>) {
        let id = id.into();
        let content = content.into();
        match self.content.get(&id) {
            Some(existing) if **existing != *content => {
                warn!(id = %id, "conflicting content for existing attachment id; keeping first");
            }
            Some(_) => {}
            None => {
                self.content.insert(id, content);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<str>> {
        self.content.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.content.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_detects_attachment_marker() {
        let node = Node::from_value(json!({"$attachment": "att1"}));
        assert_eq!(node, Node::attachment("att1"));

        // extra keys demote the marker to an ordinary mapping
        let node = Node::from_value(json!({"$attachment": "att1", "other": 1}));
        assert!(matches!(node, Node::Mapping(_)));

        // non-string id is not a reference
        let node = Node::from_value(json!({"$attachment": 42}));
        assert!(matches!(node, Node::Mapping(_)));
    }

    #[test]
    fn test_round_trip_preserves_references() {
        let value = json!({
            "message": {"$attachment": "att1"},
            "items": [1, true, null, "literal"],
        });
        let node = Node::from_value(value.clone());
        assert_eq!(node.to_value(), value);

        let text = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&text).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_has_unresolved() {
        let node = Node::from_value(json!({"a": [{"$attachment": "x"}]}));
        assert!(node.has_unresolved());
        let node = Node::from_value(json!({"a": [1, 2]}));
        assert!(!node.has_unresolved());
    }

    #[test]
    fn test_attachment_table_is_grow_only() {
        let mut table = AttachmentTable::new();
        table.insert("a1", "hello");
        table.insert("a1", "world"); // conflicting re-insert keeps first
        assert_eq!(table.get("a1").map(|s| &**s), Some("hello"));
        assert_eq!(table.len(), 1);
    }
}
