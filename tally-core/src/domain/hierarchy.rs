//! Forest projections over the flat task arena.
//!
//! Trees are rebuilt from `parent_id`/`child_ids` every time they are
//! needed. Broken links (a parent id that does not resolve) never panic:
//! such tasks are treated as roots at depth 0.

use std::collections::{HashMap, HashSet};

use super::models::{Task, TaskId, TaskNode, TaskSet, TaskStatus};

/// Build the forest of root nodes in a single pass over the arena.
///
/// A task is a root when it has no parent or its parent is not in the set.
pub fn build_tree(tasks: &TaskSet) -> Vec<TaskNode> {
    let mut children_of: HashMap<&TaskId, Vec<&Task>> = HashMap::with_capacity(tasks.len());
    let mut roots = Vec::new();

    for task in tasks.iter() {
        match task.parent_id.as_ref().filter(|parent| tasks.contains(parent)) {
            Some(parent) => children_of.entry(parent).or_default().push(task),
            None => roots.push(task),
        }
    }

    let mut visited = HashSet::with_capacity(tasks.len());
    roots
        .into_iter()
        .filter_map(|root| assemble(root, &children_of, &mut visited))
        .collect()
}

fn assemble(
    task: &Task,
    children_of: &HashMap<&TaskId, Vec<&Task>>,
    visited: &mut HashSet<TaskId>,
) -> Option<TaskNode> {
    if !visited.insert(task.id.clone()) {
        return None;
    }

    let children = children_of
        .get(&task.id)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| assemble(child, children_of, visited))
                .collect()
        })
        .unwrap_or_default();

    Some(TaskNode {
        task: task.clone(),
        children,
    })
}

/// Ancestors of `task`, ordered root-first. Stops at a missing parent.
pub fn ancestry<'a>(task: &Task, tasks: &'a TaskSet) -> Vec<&'a Task> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([task.id.clone()]);
    let mut cursor = task.parent_id.as_ref();

    while let Some(parent_id) = cursor {
        let Some(parent) = tasks.get(parent_id) else {
            break;
        };
        if !seen.insert(parent.id.clone()) {
            break;
        }
        chain.push(parent);
        cursor = parent.parent_id.as_ref();
    }

    chain.reverse();
    chain
}

/// Number of resolvable ancestors; 0 when the parent is missing.
pub fn depth(task: &Task, tasks: &TaskSet) -> u32 {
    ancestry(task, tasks).len() as u32
}

/// Recompute the stored `depth` of every task from its ancestry.
pub fn recompute_depths(tasks: &mut TaskSet) {
    let depths: Vec<(TaskId, u32)> = tasks
        .iter()
        .map(|task| (task.id.clone(), depth(task, tasks)))
        .collect();

    for (id, depth) in depths {
        if let Some(task) = tasks.get_mut(&id) {
            task.depth = depth;
        }
    }
}

/// `id` followed by every descendant, depth-first, following each task's
/// own `child_ids`.
pub fn subtree_ids(id: &TaskId, tasks: &TaskSet) -> Vec<TaskId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![id.clone()];

    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(task) = tasks.get(&current) {
            stack.extend(task.child_ids.iter().rev().cloned());
        }
        out.push(current);
    }

    out
}

/// Make every resolvable parent list each of its children exactly once.
pub fn link_children(tasks: &mut TaskSet) {
    let links: Vec<(TaskId, TaskId)> = tasks
        .iter()
        .filter_map(|task| {
            let parent = task.parent_id.as_ref()?;
            tasks.contains(parent).then(|| (parent.clone(), task.id.clone()))
        })
        .collect();

    for (parent_id, child_id) in links {
        if let Some(parent) = tasks.get_mut(&parent_id) {
            if !parent.child_ids.contains(&child_id) {
                parent.child_ids.push(child_id);
            }
        }
    }
}

/// Criteria for a filtered tree view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            search: None,
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self {
            status: None,
            search: Some(query.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.search.as_deref().map_or(true, |q| q.trim().is_empty())
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => {
                let query = query.to_lowercase();
                task.title.to_lowercase().contains(&query)
                    || task.description.to_lowercase().contains(&query)
            }
            _ => true,
        }
    }
}

/// Forest of the tasks matching `predicate`, plus every ancestor of each
/// match so a match is never shown without its path.
pub fn filtered_forest<F>(tasks: &TaskSet, predicate: F) -> Vec<TaskNode>
where
    F: Fn(&Task) -> bool,
{
    let mut keep: HashSet<&TaskId> = HashSet::new();
    for task in tasks.iter().filter(|task| predicate(task)) {
        keep.insert(&task.id);
        keep.extend(ancestry(task, tasks).into_iter().map(|ancestor| &ancestor.id));
    }

    let subset: TaskSet = tasks
        .iter()
        .filter(|task| keep.contains(&task.id))
        .cloned()
        .collect();
    build_tree(&subset)
}
