use std::fmt::Write;

use tally_core::{domain::ports::outbound::ExpandedNodes, TaskNode, TaskStatus};

/// Format milliseconds as HH:MM:SS.
pub fn format_elapsed(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn status_box(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Open => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Done => "[x]",
    }
}

/// Render a forest as an indented outline.
///
/// Children of a node are shown when the node is expanded or `show_all`
/// is set; collapsed nodes report how many descendants they hide.
pub fn render_forest(
    forest: &[TaskNode],
    expanded: &ExpandedNodes,
    show_all: bool,
    now_ms: i64,
) -> String {
    let mut out = String::new();
    for node in forest {
        render_node(node, 0, expanded, show_all, now_ms, &mut out);
    }
    out
}

fn render_node(
    node: &TaskNode,
    level: usize,
    expanded: &ExpandedNodes,
    show_all: bool,
    now_ms: i64,
    out: &mut String,
) {
    let task = &node.task;
    let tracking = &task.time_tracking;
    let open = show_all || expanded.contains(&task.id);
    let marker = match (node.children.is_empty(), open) {
        (true, _) => "-",
        (false, true) => "v",
        (false, false) => ">",
    };

    let _ = write!(
        out,
        "{:indent$}{marker} {} {} ({})",
        "",
        status_box(task.status),
        task.title,
        task.id,
        indent = level * 2
    );

    let elapsed = tracking.elapsed(now_ms);
    if elapsed > 0 || tracking.is_active {
        let _ = write!(out, "  {}", format_elapsed(elapsed));
    }
    if tracking.is_active {
        out.push_str(" running");
    }
    if !open && !node.children.is_empty() {
        let _ = write!(out, "  (+{} hidden)", node.len() - 1);
    }
    out.push('\n');

    if open {
        for child in &node.children {
            render_node(child, level + 1, expanded, show_all, now_ms, out);
        }
    }
}
