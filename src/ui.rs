use colored::{Color, Colorize};
use orgtree::ExecuteSummary;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print one rendered operation line, colored by its verb.
pub fn operation(line: &str) {
    let line = match verb_color(line) {
        Some(color) => line.color(color),
        None => line.normal(),
    };
    println!("  {line}");
}

fn verb_color(line: &str) -> Option<Color> {
    match line.split_whitespace().next()? {
        "Create" => Some(Color::Green),
        "Move" | "Rename" => Some(Color::Yellow),
        "Deploy" => Some(Color::Cyan),
        _ => None,
    }
}

/// One-line run summary, e.g. `2 created, 1 updated, 1 failed`.
pub fn format_summary(summary: &ExecuteSummary) -> String {
    let parts: Vec<String> = [
        (summary.created, "created"),
        (summary.modified, "updated"),
        (summary.no_change, "unchanged"),
        (summary.planned, "planned"),
        (summary.skipped, "skipped"),
        (summary.failed, "failed"),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, label)| format!("{count} {label}"))
    .collect();

    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print the run summary as success or error.
pub fn summary(summary: &ExecuteSummary) {
    let text = format_summary(summary);
    if summary.is_success() {
        success(&text);
    } else {
        error(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_summary() {
        let summary = ExecuteSummary {
            created: 2,
            modified: 1,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(format_summary(&summary), "2 created, 1 updated, 1 failed");
        assert_eq!(format_summary(&ExecuteSummary::default()), "nothing to do");
    }

    #[test]
    fn test_every_operation_verb_is_colored() {
        use orgtree::{OperationKind, OrgTree, ResourceOperation, Stack, StackKind, StackRef};

        let mut tree = OrgTree::new("root");
        let prod = tree.add_group(tree.root(), "Prod");
        let account = tree.add_account(prod, "web", "web@example.com");
        let kinds = [
            OperationKind::CreateGroup {
                group: prod,
                new_parent: tree.root(),
            },
            OperationKind::ReparentGroup {
                group: prod,
                new_parent: tree.root(),
                current_parent_id: "ou-old".to_string(),
            },
            OperationKind::RenameGroup {
                group: prod,
                current_name: "Production".to_string(),
            },
            OperationKind::CreateAccount {
                account,
                new_parent: prod,
            },
            OperationKind::ReparentAccount {
                account,
                new_parent: prod,
                current_parent_id: "ou-old".to_string(),
            },
            OperationKind::DeployStack {
                target: StackRef::Account(account),
                stack: Stack::new("net", StackKind::GenericIac, "tf/net"),
            },
        ];

        for kind in kinds {
            let line = ResourceOperation::new(kind).describe(&tree);
            assert!(verb_color(&line).is_some(), "{line}");
        }
        assert_eq!(verb_color("  Create account"), Some(Color::Green));
        assert_eq!(verb_color("deleted something"), None);
    }
}
