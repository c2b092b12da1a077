//! Terminal output formatting with colors
//!
//! Respects NO_COLOR, CLICOLOR, CLICOLOR_FORCE automatically.

use colored::Colorize;

use crate::domain::arena::{TreeArena, TreeNode};

/// Print error (red bold "error:" prefix) to stderr
pub fn error(msg: &(impl std::fmt::Display + ?Sized)) {
    eprintln!("{}: {}", "error".red().bold(), msg);
}

/// Print success status (green checkmark)
pub fn success(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{} {}", "✓".green(), msg);
}

/// Print completed action (green label)
pub fn action(label: &str, msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}: {}", label.green(), msg);
}

/// Print section header (cyan bold)
pub fn header(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg.to_string().cyan().bold());
}

/// Print indented detail (no color)
pub fn detail(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("  {}", msg);
}

/// Print plain output (no color, for data)
pub fn info(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg);
}

/// Node label: key in bold, remaining columns plain; the focus node is highlighted.
fn node_label(node: &TreeNode, focus: bool) -> String {
    let key = node.key.to_string();
    let key = if focus {
        key.yellow().bold().to_string()
    } else {
        key.bold().to_string()
    };
    format!("{} {}", key, node.data)
}

/// Print a tree with box-drawing characters.
pub fn tree(tree: &TreeArena) {
    let focus = tree.focus_node().map(|n| n.key.clone());
    let rendered = tree.to_termtree(|node| node_label(node, Some(&node.key) == focus.as_ref()));
    print!("{}", rendered);
}
