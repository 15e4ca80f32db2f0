//! JSON alias mapping document reader/writer.
//!
//! The document format:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "groups": [
//!     { "id": "jdoe@example.com",
//!       "emails": ["jdoe@example.com", "john.doe@partner.org"],
//!       "display_name": "John Doe" }
//!   ]
//! }
//! ```
//!
//! Reading is lenient: bad entries are skipped with a warning, and an
//! identity listed in several groups stays with the first one. Writing goes
//! through a temp file in the same directory followed by an atomic rename,
//! so a crash mid-write never leaves a partial document.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{fold, Group};
use crate::errors::AliasError;

/// Document version written by this library.
pub const DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
struct MappingDocument<'a> {
    version: &'a str,
    groups: &'a [Group],
}

/// A group entry as it appears on disk, before validation.
#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Utilities for loading and saving the alias mapping document.
pub struct MappingFile;

impl MappingFile {
    /// Load groups for startup. Never fails: a missing file means no groups,
    /// and an unreadable or malformed file is logged and treated as empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Vec<Group> {
        let path = path.as_ref();
        match Self::read(path) {
            Ok(groups) => groups,
            Err(e) => {
                error!(path = %path.display(), error = %e, "alias grouping disabled");
                Vec::new()
            }
        }
    }

    /// Read groups from disk, reporting whole-document problems as errors.
    /// A missing file is not an error.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<Group>, AliasError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no alias mapping file, user grouping disabled");
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(path)?;
        let groups = Self::parse(&contents).map_err(|detail| AliasError::Malformed {
            path: path.display().to_string(),
            detail,
        })?;
        info!(path = %path.display(), count = groups.len(), "loaded alias groups");
        Ok(groups)
    }

    /// Parse document contents. Returns `Err` only if the top level is not a
    /// JSON object with a `groups` array.
    pub fn parse(contents: &str) -> Result<Vec<Group>, String> {
        let doc: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        let obj = doc
            .as_object()
            .ok_or_else(|| "top level is not an object".to_string())?;

        match obj.get("version").and_then(|v| v.as_str()) {
            Some(DOCUMENT_VERSION) => {}
            other => warn!(
                version = other.unwrap_or("<missing>"),
                expected = DOCUMENT_VERSION,
                "unknown alias mapping version, continuing anyway"
            ),
        }

        let entries = match obj.get("groups") {
            None => return Ok(Vec::new()),
            Some(serde_json::Value::Array(entries)) => entries,
            Some(_) => return Err("'groups' is not an array".to_string()),
        };

        let mut groups: Vec<Group> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            let raw: RawGroup = match serde_json::from_value(entry.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(position, error = %e, "skipping malformed alias group");
                    continue;
                }
            };
            let Some(id) = raw.id.filter(|id| !id.is_empty()) else {
                warn!(position, "skipping alias group with missing 'id'");
                continue;
            };
            if seen_ids.contains(&fold(&id)) {
                warn!(group_id = %id, "skipping alias group with duplicate id");
                continue;
            }

            let mut members = Vec::new();
            let mut folded: HashSet<String> = HashSet::new();
            for email in raw.emails {
                let key = fold(&email);
                if email.is_empty() || folded.contains(&key) {
                    continue;
                }
                if seen.contains(&key) {
                    warn!(
                        email = %email,
                        group_id = %id,
                        "identity appears in multiple groups, using first occurrence"
                    );
                    continue;
                }
                folded.insert(key);
                members.push(email);
            }

            if members.len() < 2 {
                warn!(group_id = %id, members = members.len(), "skipping alias group with fewer than 2 identities");
                continue;
            }

            let id = if let Some(member) = members.iter().find(|m| fold(m) == fold(&id)) {
                member.clone()
            } else {
                let replacement = smallest(&members);
                warn!(group_id = %id, new_id = %replacement, "group id is not a member, reassigning");
                replacement
            };

            seen.extend(folded);
            seen_ids.insert(fold(&id));
            groups.push(Group {
                id,
                members,
                display_name: raw.display_name.filter(|n| !n.is_empty()),
            });
        }

        Ok(groups)
    }

    /// Write `groups` to `path` atomically (temp file + rename).
    pub fn save<P: AsRef<Path>>(path: P, groups: &[Group]) -> Result<(), AliasError> {
        let path = path.as_ref();
        let persistence = |detail: String| AliasError::Persistence {
            path: path.display().to_string(),
            detail,
        };

        let doc = MappingDocument {
            version: DOCUMENT_VERSION,
            groups,
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|e| persistence(e.to_string()))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| persistence(e.to_string()))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| persistence(e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.write_all(b"\n"))
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| persistence(e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| persistence(e.error.to_string()))?;

        debug!(path = %path.display(), count = groups.len(), "saved alias groups");
        Ok(())
    }
}

/// Lexicographically smallest member; used whenever a group needs a new id.
pub(crate) fn smallest(members: &[String]) -> String {
    members.iter().min().cloned().unwrap_or_default()
}
