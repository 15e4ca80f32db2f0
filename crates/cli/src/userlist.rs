//! User list files: one identity per line, or a CSV whose first column holds
//! the identity.

use std::path::Path;

use anyhow::{Context, Result};

/// Header names recognised in the first column of the first line.
const HEADER_NAMES: &[&str] = &["username", "user", "email", "account"];

/// Read identities from `path`.
pub fn read_user_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read user list {}", path.display()))?;
    Ok(parse_user_list(&contents))
}

/// Take the first column of every non-blank line, skipping an optional
/// header line.
pub fn parse_user_list(contents: &str) -> Vec<String> {
    let mut users = Vec::new();
    let mut first = true;

    for line in contents.lines() {
        let line = line.trim_start_matches('\u{feff}');
        let column = line
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"')
            .trim();
        if column.is_empty() {
            continue;
        }
        if first {
            first = false;
            if HEADER_NAMES.contains(&column.to_lowercase().as_str()) {
                continue;
            }
        }
        users.push(column.to_string());
    }

    users
}
