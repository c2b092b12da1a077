//! Arena-backed owned trees of hydrated records

use std::collections::HashMap;

use generational_arena::{Arena, Index};
use termtree::Tree;
use tracing::instrument;

use crate::domain::entities::Record;
use crate::domain::value::EntityKey;

/// Tree node in the arena-based hierarchy structure.
#[derive(Debug)]
pub struct TreeNode {
    pub key: EntityKey,
    /// Hydrated row of this entity
    pub data: Record,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in insertion order
    pub children: Vec<Index>,
}

/// Owned tree assembled from query results.
///
/// Uses a generational arena for memory-safe node references. The `focus`
/// node is the entity the tree was requested for: the root of a descendants
/// tree, the deepest node of an ancestors chain.
#[derive(Debug)]
pub struct TreeArena {
    arena: Arena<TreeNode>,
    root: Option<Index>,
    focus: Option<Index>,
    by_key: HashMap<EntityKey, Index>,
}

impl Default for TreeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeArena {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            focus: None,
            by_key: HashMap::new(),
        }
    }

    #[instrument(level = "trace", skip(self, data))]
    pub fn insert_node(&mut self, key: EntityKey, data: Record, parent: Option<Index>) -> Index {
        let node = TreeNode {
            key: key.clone(),
            data,
            parent,
            children: Vec::new(),
        };
        let node_idx = self.arena.insert(node);

        if let Some(parent_idx) = parent {
            if let Some(parent) = self.arena.get_mut(parent_idx) {
                parent.children.push(node_idx);
            }
        } else {
            self.root = Some(node_idx);
        }
        self.by_key.insert(key, node_idx);

        node_idx
    }

    pub fn get_node(&self, idx: Index) -> Option<&TreeNode> {
        self.arena.get(idx)
    }

    pub fn root(&self) -> Option<Index> {
        self.root
    }

    pub fn root_node(&self) -> Option<&TreeNode> {
        self.root.and_then(|idx| self.get_node(idx))
    }

    pub fn focus(&self) -> Option<Index> {
        self.focus
    }

    pub fn focus_node(&self) -> Option<&TreeNode> {
        self.focus.and_then(|idx| self.get_node(idx))
    }

    pub fn set_focus(&mut self, idx: Index) {
        self.focus = Some(idx);
    }

    /// Node holding the entity with `key`.
    pub fn find(&self, key: &EntityKey) -> Option<Index> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Pre-order traversal, children left to right.
    pub fn iter(&self) -> TreeIterator<'_> {
        TreeIterator::new(self)
    }

    pub fn iter_postorder(&self) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self)
    }

    /// Number of levels; an empty tree has depth 0.
    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(Index, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((idx, level)) = stack.pop() {
            deepest = deepest.max(level);
            if let Some(node) = self.get_node(idx) {
                stack.extend(node.children.iter().map(|&child| (child, level + 1)));
            }
        }
        deepest
    }

    /// Records of the nodes without children.
    #[instrument(level = "debug", skip(self))]
    pub fn leaf_nodes(&self) -> Vec<&Record> {
        self.iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(_, node)| &node.data)
            .collect()
    }

    /// Every record below the root, in pre-order.
    pub fn descendants(&self) -> Vec<&Record> {
        self.iter().skip(1).map(|(_, node)| &node.data).collect()
    }

    /// Render with `label` applied to each record.
    pub fn to_termtree<F>(&self, label: F) -> Tree<String>
    where
        F: Fn(&TreeNode) -> String,
    {
        let mut built: HashMap<Index, Tree<String>> = HashMap::new();
        for (idx, node) in self.iter_postorder() {
            let leaves: Vec<Tree<String>> = node
                .children
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(idx, Tree::new(label(node)).with_leaves(leaves));
        }
        self.root
            .and_then(|root| built.remove(&root))
            .unwrap_or_else(|| Tree::new("Empty tree".to_string()))
    }
}

pub struct TreeIterator<'a> {
    arena: &'a TreeArena,
    stack: Vec<Index>,
}

impl<'a> TreeIterator<'a> {
    fn new(arena: &'a TreeArena) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = arena.root() {
            stack.push(root);
        }
        Self { arena, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.arena.get_node(current_idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current_idx, node));
            }
        }
        None
    }
}

pub struct PostOrderIterator<'a> {
    arena: &'a TreeArena,
    stack: Vec<(Index, bool)>,
}

impl<'a> PostOrderIterator<'a> {
    fn new(arena: &'a TreeArena) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = arena.root() {
            stack.push((root, false));
        }
        Self { arena, stack }
    }
}

impl<'a> Iterator for PostOrderIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current_idx, visited)) = self.stack.pop() {
            if let Some(node) = self.arena.get_node(current_idx) {
                if !visited {
                    self.stack.push((current_idx, true));
                    for &child in node.children.iter().rev() {
                        self.stack.push((child, false));
                    }
                } else {
                    return Some((current_idx, node));
                }
            }
        }
        None
    }
}
