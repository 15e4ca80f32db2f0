//! Alias groups: several identities (usually email addresses) that belong
//! to one person.
//!
//! Groups are persisted in a JSON mapping document, loaded at startup by
//! [`AliasResolver`], mutated through `merge` / `split`, and used to fold a
//! per-identity result matrix into one row per person.
//!
//! Identities are matched without regard to case: sources disagree on the
//! casing they report, so members are stored as typed and compared folded.

pub mod mapping_file;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use mapping_file::MappingFile;
pub use resolver::AliasResolver;

/// A set of identities considered the same person.
///
/// The id is always one of the members. A group always has at least two
/// members; smaller groups are dissolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(rename = "emails")]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Group {
    /// Whether `identity` is a member, ignoring case.
    pub fn contains(&self, identity: &str) -> bool {
        let identity = fold(identity);
        self.members.iter().any(|m| fold(m) == identity)
    }
}

/// Case-folded form used for every identity comparison.
pub(crate) fn fold(identity: &str) -> String {
    identity.to_lowercase()
}
