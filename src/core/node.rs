//! Decoded unit of the binary tree.

use bytes::Bytes;
use std::collections::HashMap;

/// Ordered attribute map. Keys are unique; re-inserting a key replaces the
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Build from pairs in wire order in linear time. A repeated key keeps
    /// its first position and takes the last value.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(pairs.len());
        let mut entries: Vec<(String, String)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let existing = positions.get(&key).copied();
            match existing {
                Some(position) => entries[position].1 = value,
                None => {
                    positions.insert(key.clone(), entries.len());
                    entries.push((key, value));
                }
            }
        }
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes::from_pairs(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContent {
    /// Child nodes
    List(Vec<Node>),
    /// Opaque bytes, never string-decoded
    Bytes(Bytes),
    /// Token or string-encoded value
    Text(String),
}

/// A decoded node: description, optional attributes, optional content.
///
/// The description is never empty; the decoder rejects such input and the
/// constructor is the only way to build one outside this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    description: String,
    attributes: Option<Attributes>,
    content: Option<NodeContent>,
}

impl Node {
    /// Returns `None` if `description` is empty.
    pub fn new(description: impl Into<String>) -> Option<Self> {
        let description = description.into();
        if description.is_empty() {
            return None;
        }
        Some(Self {
            description,
            attributes: None,
            content: None,
        })
    }

    /// Empty attribute maps are stored as absent.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = (!attributes.is_empty()).then_some(attributes);
        self
    }

    pub fn with_content(mut self, content: NodeContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_children(self, children: Vec<Node>) -> Self {
        self.with_content(NodeContent::List(children))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref().and_then(|a| a.get(key))
    }

    pub fn content(&self) -> Option<&NodeContent> {
        self.content.as_ref()
    }

    /// Child nodes, or an empty slice if the content is not a list.
    pub fn children(&self) -> &[Node] {
        match &self.content {
            Some(NodeContent::List(children)) => children,
            _ => &[],
        }
    }

    /// Value of the `type` attribute, the secondary dispatch key.
    pub fn kind(&self) -> Option<&str> {
        self.attribute("type")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_description_rejected() {
        assert!(Node::new("").is_none());
        assert!(Node::new("response").is_some());
    }

    #[test]
    fn test_attributes_keep_order_and_replace() {
        let mut attrs = Attributes::new();
        attrs.insert("type", "chat");
        attrs.insert("jid", "123@c.us");
        attrs.insert("type", "contacts");
        let keys: Vec<_> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["type", "jid"]);
        assert_eq!(attrs.get("type"), Some("contacts"));
    }

    #[test]
    fn test_from_pairs_matches_insert() {
        let pairs = vec![
            ("type".to_string(), "chat".to_string()),
            ("jid".to_string(), "123@c.us".to_string()),
            ("type".to_string(), "contacts".to_string()),
        ];
        let mut inserted = Attributes::new();
        for (k, v) in pairs.clone() {
            inserted.insert(k, v);
        }
        assert_eq!(Attributes::from_pairs(pairs), inserted);
    }

    #[test]
    fn test_empty_attributes_stored_as_absent() {
        let node = Node::new("action")
            .unwrap()
            .with_attributes(Attributes::new());
        assert!(node.attributes().is_none());
        assert!(node.children().is_empty());
    }
}
