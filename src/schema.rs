//! Built-in module schema backing schema-driven completion.
//!
//! `data/modules.json` describes the symbol namespaces of the standard YARA
//! modules as a nested mapping: internal nodes map names to child nodes,
//! leaves carry a kind string (`"enum"`, `"property"`, `"method"`). The
//! schema is embedded at build time, decoded once per process, and shared
//! read-only across every connection.

use std::collections::BTreeMap;

use lsp_types::CompletionItemKind;
use once_cell::sync::Lazy;
use serde::Deserialize;

const MODULES_JSON: &str = include_str!("../data/modules.json");

static MODULES: Lazy<ModuleSchema> = Lazy::new(|| {
    serde_json::from_str(MODULES_JSON).expect("data/modules.json is not valid schema JSON")
});

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SchemaNode {
    Branch(BTreeMap<String, SchemaNode>),
    Leaf(String),
}

#[derive(Debug, Deserialize)]
pub struct ModuleSchema {
    #[serde(flatten)]
    roots: BTreeMap<String, SchemaNode>,
}

impl ModuleSchema {
    /// The process-wide schema instance.
    pub fn global() -> &'static ModuleSchema {
        &MODULES
    }

    /// Walk the tree along `path` segments. Stops with `None` as soon as a
    /// segment has no match, so an unknown root or a dead-end path produces
    /// no completion items at all.
    pub fn walk(&self, path: &[&str]) -> Option<&BTreeMap<String, SchemaNode>> {
        let mut node = &self.roots;
        let (last, parents) = path.split_last()?;
        for segment in parents {
            match node.get(*segment) {
                Some(SchemaNode::Branch(children)) => node = children,
                _ => return None,
            }
        }
        match node.get(*last) {
            Some(SchemaNode::Branch(children)) => Some(children),
            _ => None,
        }
    }
}

impl SchemaNode {
    /// Completion kind for one schema entry. Nested namespaces and
    /// unrecognized descriptors both fall back to the generic class kind.
    pub fn completion_kind(&self) -> CompletionItemKind {
        match self {
            SchemaNode::Branch(_) => CompletionItemKind::CLASS,
            SchemaNode::Leaf(kind) => match kind.to_ascii_lowercase().as_str() {
                "enum" => CompletionItemKind::ENUM,
                "property" => CompletionItemKind::PROPERTY,
                "method" => CompletionItemKind::METHOD,
                _ => CompletionItemKind::CLASS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_schema_decodes() {
        let schema = ModuleSchema::global();
        assert!(schema.walk(&["pe"]).is_some());
        assert!(schema.walk(&["cuckoo", "network"]).is_some());
    }

    #[test]
    fn unknown_segment_stops_the_walk() {
        let schema = ModuleSchema::global();
        assert!(schema.walk(&["nope"]).is_none());
        assert!(schema.walk(&["cuckoo", "nope"]).is_none());
        assert!(schema.walk(&[]).is_none());
    }

    #[test]
    fn leaf_kinds_map_to_completion_kinds() {
        assert_eq!(
            SchemaNode::Leaf("enum".into()).completion_kind(),
            CompletionItemKind::ENUM
        );
        assert_eq!(
            SchemaNode::Leaf("Method".into()).completion_kind(),
            CompletionItemKind::METHOD
        );
        assert_eq!(
            SchemaNode::Leaf("mystery".into()).completion_kind(),
            CompletionItemKind::CLASS
        );
        assert_eq!(
            SchemaNode::Branch(Default::default()).completion_kind(),
            CompletionItemKind::CLASS
        );
    }
}
