use std::collections::HashMap;

use crate::{
    api::{Comment, CommentId},
    ReactionSummary,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    pub reactions: ReactionSummary,

    /// In creation order
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn new(comment: Comment, reactions: ReactionSummary) -> CommentNode {
        CommentNode {
            comment,
            reactions,
            replies: Vec::new(),
        }
    }
}

/// Nests a flat list of comments into reply trees, returning the roots
///
/// `nodes` must be sorted by creation date, and the output keeps that order
/// both among roots and within each reply list. Replies can come before
/// their parent in the input. Comments whose parent is not in `nodes` become
/// roots, as do comments whose parent links loop back onto themselves.
/// Duplicate ids keep their first occurrence.
pub fn build_tree(nodes: Vec<CommentNode>) -> Vec<CommentNode> {
    let mut index = HashMap::with_capacity(nodes.len());
    let mut slots = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        if index.contains_key(&node.comment.id) {
            tracing::warn!(id = ?node.comment.id, "duplicate comment in thread, ignoring it");
            continue;
        }
        node.replies.clear();
        index.insert(node.comment.id, slots.len());
        slots.push(Some(node));
    }

    let mut children = vec![Vec::new(); slots.len()];
    let mut roots = Vec::new();
    for (i, node) in slots.iter().enumerate() {
        let parent = node
            .as_ref()
            .and_then(|n| n.comment.parent_id)
            .and_then(|p| index.get(&p));
        match parent {
            Some(&p) if p != i => children[p].push(i),
            _ => roots.push(i),
        }
    }

    // Walk down from the roots, claiming each node for the first parent that
    // reaches it. Anything left unclaimed sits on a parent cycle.
    let mut claimed = vec![false; slots.len()];
    let mut tree_children = vec![Vec::new(); slots.len()];
    let mut preorder = Vec::with_capacity(slots.len());
    let mut walk = |root: usize, claimed: &mut Vec<bool>| {
        claimed[root] = true;
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            preorder.push(n);
            for &c in &children[n] {
                if !claimed[c] {
                    claimed[c] = true;
                    tree_children[n].push(c);
                    stack.push(c);
                }
            }
        }
    };
    for &r in &roots {
        walk(r, &mut claimed);
    }
    for i in 0..slots.len() {
        if !claimed[i] {
            tracing::warn!(
                id = ?slots[i].as_ref().map(|n| n.comment.id),
                "comment is part of a parent cycle, promoting it to root"
            );
            roots.push(i);
            walk(i, &mut claimed);
        }
    }
    roots.sort_unstable();

    // Children always come after their parent in preorder, so assembling in
    // reverse attaches complete subtrees
    for &n in preorder.iter().rev() {
        let replies = tree_children[n]
            .iter()
            .filter_map(|&c| slots[c].take())
            .collect::<Vec<_>>();
        if let Some(node) = slots[n].as_mut() {
            node.replies = replies;
        }
    }
    roots.into_iter().filter_map(|r| slots[r].take()).collect()
}

/// Pre-order traversal of the whole forest
pub fn flatten(tree: &[CommentNode]) -> Vec<&CommentNode> {
    let mut res = Vec::new();
    let mut stack = tree.iter().rev().collect::<Vec<_>>();
    while let Some(node) = stack.pop() {
        res.push(node);
        stack.extend(node.replies.iter().rev());
    }
    res
}

pub fn find_node<'a>(tree: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    flatten(tree).into_iter().find(|n| n.comment.id == *id)
}
