//! Attachment reference resolution for transcript payload trees.
//!
//! Event payloads arrive with large content fields de-duplicated into an
//! attachment table; [`resolve`] substitutes every reference the table can
//! satisfy and leaves the rest in place for a later pass. [`ResolvedDocument`]
//! supports that later pass incrementally: it records the path of each
//! reference the initial walk could not satisfy, and a subsequent attachment
//! batch revisits exactly those paths instead of re-walking resolved content.
//!
//! Resolution is pure and idempotent: a resolved tree contains no references,
//! so resolving it again is a no-op.

use evalsync_types::tree::{AttachmentTable, Node};

/// One step on the path from a tree root to a descendant node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Index(usize),
    Key(String),
}

/// Path from a tree root to a node, outermost step first.
pub type NodePath = Vec<Step>;

/// Resolve every satisfiable attachment reference in `node`, sharing the
/// table's content rather than copying it. Unsatisfiable references are left
/// untouched.
pub fn resolve(node: &Node, table: &AttachmentTable) -> Node {
    match node {
        Node::Attachment(id) => match table.get(id) {
            Some(content) => Node::Text(content.clone()),
            None => node.clone(),
        },
        Node::Sequence(items) => {
            Node::Sequence(items.iter().map(|item| resolve(item, table)).collect())
        }
        Node::Mapping(map) => Node::Mapping(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve(value, table)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A payload tree plus the paths of its still-unresolved references.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDocument {
    root: Node,
    unresolved: Vec<NodePath>,
}

impl ResolvedDocument {
    /// Take ownership of `node`, resolve what the table allows, and record
    /// the path of every reference that remains.
    pub fn new(mut node: Node, table: &AttachmentTable) -> Self {
        let mut unresolved = Vec::new();
        let mut path = NodePath::new();
        resolve_in_place(&mut node, table, &mut path, &mut unresolved);
        Self {
            root: node,
            unresolved,
        }
    }

    /// Revisit only the recorded unresolved paths with a (grown) table.
    /// Already-resolved content is not touched.
    pub fn apply_attachments(&mut self, table: &AttachmentTable) {
        let root = &mut self.root;
        self.unresolved.retain(|path| {
            let Some(node) = node_at_mut(root, path) else {
                return false;
            };
            if let Node::Attachment(id) = node {
                if let Some(content) = table.get(id) {
                    *node = Node::Text(content.clone());
                    return false;
                }
                return true;
            }
            false
        });
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Ids of the references still awaiting content.
    pub fn unresolved_ids(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .filter_map(|path| match node_at(&self.root, path) {
                Some(Node::Attachment(id)) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

fn resolve_in_place(
    node: &mut Node,
    table: &AttachmentTable,
    path: &mut NodePath,
    unresolved: &mut Vec<NodePath>,
) {
    match node {
        Node::Attachment(id) => match table.get(id) {
            Some(content) => *node = Node::Text(content.clone()),
            None => unresolved.push(path.clone()),
        },
        Node::Sequence(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                path.push(Step::Index(index));
                resolve_in_place(item, table, path, unresolved);
                path.pop();
            }
        }
        Node::Mapping(map) => {
            for (key, value) in map.iter_mut() {
                path.push(Step::Key(key.clone()));
                resolve_in_place(value, table, path, unresolved);
                path.pop();
            }
        }
        _ => {}
    }
}

fn node_at<'a>(mut node: &'a Node, path: &NodePath) -> Option<&'a Node> {
    for step in path {
        node = match (node, step) {
            (Node::Sequence(items), Step::Index(index)) => items.get(*index)?,
            (Node::Mapping(map), Step::Key(key)) => map.get(key)?,
            _ => return None,
        };
    }
    Some(node)
}

fn node_at_mut<'a>(mut node: &'a mut Node, path: &NodePath) -> Option<&'a mut Node> {
    for step in path {
        node = match (node, step) {
            (Node::Sequence(items), Step::Index(index)) => items.get_mut(*index)?,
            (Node::Mapping(map), Step::Key(key)) => map.get_mut(key)?,
            _ => return None,
        };
    }
    Some(node)
}
