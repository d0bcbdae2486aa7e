//! Branch resolution over a loaded thread.
//!
//! A thread's messages form a tree via `parent_message_id`. The walk below
//! turns that tree into a single transcript path (active / selections modes)
//! or into the derived tree view. Pure logic; the store loads rows and hands
//! them here.

use crate::types::{Branch, ForkPoint, ThreadTree, ThreadTreeNode};
use skein_core::{CanonicalMessage, RunStatus};
use std::collections::HashMap;

/// A loaded message row plus the bits of its producing run the walk needs.
#[derive(Debug, Clone)]
pub(crate) struct MessageNode {
    pub message: CanonicalMessage,
    pub ordinal: i64,
    pub run_id: String,
    pub run_status: RunStatus,
}

/// Resolve a branch to indices into `nodes` (which must be in ascending
/// ordinal order).
pub(crate) fn resolve_branch(nodes: &[MessageNode], branch: &Branch) -> Vec<usize> {
    if matches!(branch, Branch::All) {
        return (0..nodes.len()).collect();
    }

    let by_id: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| (node.message.id.as_str(), idx))
        .collect();

    // Children grouped under the parent they fork from. A parent that is not
    // part of this thread (or a null parent) makes its children a root group;
    // the missing parent id still acts as the fork key for selections.
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut root_groups: Vec<(Option<&str>, Vec<usize>)> = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        match node.message.parent_message_id.as_deref() {
            Some(parent) if by_id.contains_key(parent) => {
                children.entry(parent).or_default().push(idx);
            }
            parent => {
                match root_groups.iter_mut().find(|(key, _)| *key == parent) {
                    Some((_, group)) => group.push(idx),
                    None => root_groups.push((parent, vec![idx])),
                }
            }
        }
    }
    // Root groups in order of their first (lowest-ordinal) member.
    root_groups.sort_by_key(|(_, group)| nodes[group[0]].ordinal);

    let mut path = Vec::new();
    for (fork_key, group) in &root_groups {
        let mut current = pick_child(nodes, group, *fork_key, branch);
        loop {
            path.push(current);
            let id = nodes[current].message.id.as_str();
            match children.get(id) {
                Some(kids) => current = pick_child(nodes, kids, Some(id), branch),
                None => break,
            }
        }
    }
    path
}

/// Choose one child at a fork. Children are in insertion (ordinal) order.
fn pick_child(
    nodes: &[MessageNode],
    candidates: &[usize],
    fork_key: Option<&str>,
    branch: &Branch,
) -> usize {
    if let Branch::Selections(selections) = branch {
        if let Some(selected) = fork_key.and_then(|key| selections.get(key)) {
            if let Some(&idx) = candidates
                .iter()
                .find(|&&idx| nodes[idx].message.id == *selected)
            {
                return idx;
            }
        }
    }
    active_child(nodes, candidates)
}

/// The active rule: most recently inserted committed child, else the most
/// recently inserted child.
fn active_child(nodes: &[MessageNode], candidates: &[usize]) -> usize {
    candidates
        .iter()
        .rev()
        .find(|&&idx| nodes[idx].run_status == RunStatus::Committed)
        .or_else(|| candidates.last())
        .copied()
        .expect("fork points always have at least one child")
}

/// Build the derived tree view: every node, plus fork points (parents with
/// more than one child) annotated with the active child.
pub(crate) fn build_tree(nodes: &[MessageNode]) -> ThreadTree {
    let tree_nodes = nodes
        .iter()
        .map(|node| ThreadTreeNode {
            message_id: node.message.id.clone(),
            parent_message_id: node.message.parent_message_id.clone(),
            role: node.message.role.as_str().to_owned(),
            run_id: node.run_id.clone(),
            run_status: node.run_status,
        })
        .collect();

    let mut by_parent: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        if let Some(parent) = node.message.parent_message_id.as_deref() {
            match by_parent.iter_mut().find(|(key, _)| key.as_str() == parent) {
                Some((_, kids)) => kids.push(idx),
                None => by_parent.push((parent.to_owned(), vec![idx])),
            }
        }
    }

    let fork_points = by_parent
        .into_iter()
        .filter(|(_, kids)| kids.len() > 1)
        .map(|(fork_message_id, kids)| ForkPoint {
            active_child_id: nodes[active_child(nodes, &kids)].message.id.clone(),
            children: kids.iter().map(|&idx| nodes[idx].message.id.clone()).collect(),
            fork_message_id,
        })
        .collect();

    ThreadTree {
        nodes: tree_nodes,
        fork_points,
    }
}
