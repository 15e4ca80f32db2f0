//! In-memory alias store with a reverse index and write-through persistence.
//!
//! [`AliasResolver`] owns the list of groups plus an identity -> group index.
//! Both live behind one `RwLock`, so readers always see a group list and an
//! index that agree with each other. Mutations compute the next state, write
//! it to disk, and only then swap it in; a failed write leaves memory as it
//! was.
//!
//! Every identity comparison (index lookups, matrix matching, `merge` and
//! `split` arguments) ignores case. Members keep the casing they were first
//! added with.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use super::mapping_file::{smallest, MappingFile};
use super::{fold, Group};
use crate::errors::AliasError;
use crate::models::{ConsolidatedMatrix, ConsolidatedRow, ResultMatrix, SourceResults};

#[derive(Debug, Default, Clone)]
struct AliasState {
    groups: Vec<Group>,
    /// folded identity -> position in `groups`.
    index: HashMap<String, usize>,
}

impl AliasState {
    fn new(groups: Vec<Group>) -> Self {
        let index = build_index(&groups);
        Self { groups, index }
    }

    fn group_of(&self, identity: &str) -> Option<&Group> {
        self.index.get(&fold(identity)).map(|&i| &self.groups[i])
    }

    fn contains(&self, identity: &str) -> bool {
        self.index.contains_key(&fold(identity))
    }

    fn find(&self, group_id: &str) -> Option<usize> {
        let group_id = fold(group_id);
        self.groups.iter().position(|g| fold(&g.id) == group_id)
    }
}

fn build_index(groups: &[Group]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, group) in groups.iter().enumerate() {
        for member in &group.members {
            index.entry(fold(member)).or_insert(i);
        }
    }
    index
}

/// Resolves identities to alias groups and folds result matrices by group.
///
/// Thread-safe: reads share the lock, `merge` / `split` / `reload` take it
/// exclusively for the whole read-modify-write, including the disk write.
pub struct AliasResolver {
    path: PathBuf,
    state: RwLock<AliasState>,
}

impl AliasResolver {
    /// Load the resolver from `path`. A missing or malformed document yields
    /// an empty store; it never fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let groups = MappingFile::load(&path);
        Self {
            path,
            state: RwLock::new(AliasState::new(groups)),
        }
    }

    /// An empty store that persists to `path` on the first mutation.
    pub fn empty<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: RwLock::new(AliasState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // A panic while holding the lock cannot leave a half-applied mutation
    // (state is swapped whole), so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, AliasState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AliasState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The id of the group containing `identity`, if any.
    pub fn group_of(&self, identity: &str) -> Option<String> {
        self.read().group_of(identity).map(|g| g.id.clone())
    }

    /// Members of `group_id` in insertion order.
    pub fn members_of(&self, group_id: &str) -> Result<Vec<String>, AliasError> {
        let state = self.read();
        state
            .find(group_id)
            .map(|i| state.groups[i].members.clone())
            .ok_or_else(|| AliasError::GroupNotFound(group_id.to_string()))
    }

    pub fn display_name(&self, group_id: &str) -> Option<String> {
        let state = self.read();
        state
            .find(group_id)
            .and_then(|i| state.groups[i].display_name.clone())
    }

    pub fn is_grouped(&self, identity: &str) -> bool {
        self.read().contains(identity)
    }

    /// Snapshot of every group in store order.
    pub fn groups(&self) -> Vec<Group> {
        self.read().groups.clone()
    }

    pub fn len(&self) -> usize {
        self.read().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().groups.is_empty()
    }

    /// Fold a per-identity matrix into one row per group plus one row per
    /// ungrouped identity.
    ///
    /// Group rows OR their members' results per source: any `Found` wins,
    /// then any `Error`, else `NotFound`. Only identities present in
    /// `matrix` contribute; groups with no member in `matrix` get no row.
    pub fn consolidate(&self, matrix: &ResultMatrix) -> ConsolidatedMatrix {
        let state = self.read();
        let mut out = ConsolidatedMatrix::new();

        // folded identity -> matrix keys with that spelling.
        let mut by_fold: HashMap<String, Vec<&String>> = HashMap::new();
        for identity in matrix.keys() {
            by_fold.entry(fold(identity)).or_default().push(identity);
        }

        for group in &state.groups {
            let present: Vec<&String> = group
                .members
                .iter()
                .filter_map(|m| by_fold.get(&fold(m)))
                .flatten()
                .copied()
                .collect();
            if present.is_empty() {
                continue;
            }

            let mut results = SourceResults::new();
            for member in &present {
                for (source, result) in &matrix[member.as_str()] {
                    let combined = match results.get(source) {
                        Some(acc) => acc.combine_any(result),
                        None => result.clone(),
                    };
                    results.insert(source.clone(), combined);
                }
            }

            out.insert(
                group.id.clone(),
                ConsolidatedRow {
                    key: group.id.clone(),
                    display_name: group.display_name.clone(),
                    members: present.into_iter().cloned().collect(),
                    grouped: true,
                    results,
                },
            );
        }

        for (identity, results) in matrix {
            if state.contains(identity) {
                continue;
            }
            out.insert(
                identity.clone(),
                ConsolidatedRow {
                    key: identity.clone(),
                    display_name: None,
                    members: vec![identity.clone()],
                    grouped: false,
                    results: results.clone(),
                },
            );
        }

        out
    }

    /// Put `identities` (and every group any of them already belongs to)
    /// into a single group, persist, and return its id.
    ///
    /// Group id: with no pre-existing group, the first input identity; with
    /// exactly one, that group's id; with several, the first member of the
    /// earliest-stored one. `display_name` overrides any existing name;
    /// otherwise the first existing name among the absorbed groups is kept.
    pub fn merge<S: AsRef<str>>(
        &self,
        identities: &[S],
        display_name: Option<&str>,
    ) -> Result<String, AliasError> {
        let mut inputs: Vec<String> = Vec::new();
        for identity in identities {
            let identity = identity.as_ref().trim();
            if !identity.is_empty() && !inputs.iter().any(|i| fold(i) == fold(identity)) {
                inputs.push(identity.to_string());
            }
        }
        if inputs.len() < 2 {
            return Err(AliasError::Validation(format!(
                "merge needs at least 2 distinct identities, got {}",
                inputs.len()
            )));
        }

        let mut state = self.write();

        let mut absorbed: Vec<usize> = inputs
            .iter()
            .filter_map(|i| state.index.get(&fold(i)).copied())
            .collect();
        absorbed.sort_unstable();
        absorbed.dedup();

        let id = match absorbed.as_slice() {
            [] => inputs[0].clone(),
            [only] => state.groups[*only].id.clone(),
            [first, ..] => state.groups[*first].members[0].clone(),
        };

        let mut members: Vec<String> = Vec::new();
        let mut folded: HashSet<String> = HashSet::new();
        let absorbed_members = absorbed
            .iter()
            .flat_map(|&i| state.groups[i].members.iter().cloned());
        for member in absorbed_members.chain(inputs) {
            if folded.insert(fold(&member)) {
                members.push(member);
            }
        }

        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .or_else(|| {
                absorbed
                    .iter()
                    .find_map(|&i| state.groups[i].display_name.clone())
            });

        let merged = Group {
            id: id.clone(),
            members,
            display_name,
        };

        let mut groups: Vec<Group> = Vec::with_capacity(state.groups.len() + 1);
        let absorbed_set: HashSet<usize> = absorbed.iter().copied().collect();
        let mut placed = false;
        for (i, group) in state.groups.iter().enumerate() {
            if absorbed_set.contains(&i) {
                if !placed {
                    groups.push(merged.clone());
                    placed = true;
                }
                continue;
            }
            groups.push(group.clone());
        }
        if !placed {
            groups.push(merged.clone());
        }

        MappingFile::save(&self.path, &groups)?;
        *state = AliasState::new(groups);

        info!(
            group_id = %id,
            members = merged.members.len(),
            absorbed = absorbed.len(),
            "merged alias group"
        );
        Ok(id)
    }

    /// Keep only `keep` in `group_id`; every other member becomes ungrouped.
    ///
    /// If one or zero identities remain the group is deleted. If the group's
    /// id member is removed, the id moves to the lexicographically smallest
    /// remaining member. Nothing is written when no member would be removed.
    pub fn split<S: AsRef<str>>(&self, group_id: &str, keep: &[S]) -> Result<(), AliasError> {
        let mut state = self.write();

        let position = state
            .find(group_id)
            .ok_or_else(|| AliasError::GroupNotFound(group_id.to_string()))?;
        let group = &state.groups[position];

        let mut outside: Vec<&str> = keep
            .iter()
            .map(|k| k.as_ref())
            .filter(|k| !group.contains(k))
            .collect();
        if !outside.is_empty() {
            outside.sort_unstable();
            outside.dedup();
            return Err(AliasError::Validation(format!(
                "not members of group '{}': {}",
                group_id,
                outside.join(", ")
            )));
        }

        let keep: HashSet<String> = keep.iter().map(|k| fold(k.as_ref())).collect();
        let kept: Vec<String> = group
            .members
            .iter()
            .filter(|m| keep.contains(&fold(m)))
            .cloned()
            .collect();
        if kept.len() == group.members.len() {
            debug!(group_id, "split removes nothing, skipping write");
            return Ok(());
        }
        let removed = group.members.len() - kept.len();

        let mut groups = state.groups.clone();
        if kept.len() <= 1 {
            groups.remove(position);
            MappingFile::save(&self.path, &groups)?;
            *state = AliasState::new(groups);
            info!(group_id, removed, "dissolved alias group");
            return Ok(());
        }

        let id = if kept.contains(&group.id) {
            group.id.clone()
        } else {
            smallest(&kept)
        };
        groups[position] = Group {
            id: id.clone(),
            members: kept,
            display_name: group.display_name.clone(),
        };

        MappingFile::save(&self.path, &groups)?;
        *state = AliasState::new(groups);
        info!(group_id, new_id = %id, removed, "split alias group");
        Ok(())
    }

    /// Re-read the document from disk, replacing the in-memory store.
    ///
    /// Unlike [`load`](Self::load), a malformed document is an error and the
    /// current state is kept.
    pub fn reload(&self) -> Result<usize, AliasError> {
        let groups = MappingFile::read(&self.path)?;
        let count = groups.len();
        *self.write() = AliasState::new(groups);
        info!(path = %self.path.display(), count, "reloaded alias groups");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExistenceResult::{self, Found, NotFound};

    fn resolver() -> (tempfile::TempDir, AliasResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));
        (dir, resolver)
    }

    fn err(reason: &str) -> ExistenceResult {
        ExistenceResult::Error(reason.into())
    }

    fn matrix(rows: &[(&str, &[(&str, ExistenceResult)])]) -> ResultMatrix {
        rows.iter()
            .map(|(identity, cells)| {
                let row: SourceResults = cells
                    .iter()
                    .map(|(s, r)| (s.to_string(), r.clone()))
                    .collect();
                (identity.to_string(), row)
            })
            .collect()
    }

    #[test]
    fn test_merge_groups_identities() {
        let (_dir, resolver) = resolver();
        let id = resolver.merge(&["a", "b"], None).unwrap();

        assert_eq!(id, "a");
        assert_eq!(resolver.group_of("a"), resolver.group_of("b"));
        assert_eq!(resolver.group_of("a").as_deref(), Some("a"));
        assert_eq!(resolver.members_of(&id).unwrap(), vec!["a", "b"]);
        assert!(resolver.is_grouped("b"));
        assert!(!resolver.is_grouped("c"));
    }

    #[test]
    fn test_merge_needs_two_distinct() {
        let (dir, resolver) = resolver();
        assert!(matches!(
            resolver.merge(&["a", "a"], None),
            Err(AliasError::Validation(_))
        ));
        assert!(matches!(
            resolver.merge::<&str>(&[], None),
            Err(AliasError::Validation(_))
        ));
        assert!(resolver.is_empty());
        assert!(!dir.path().join("aliases.json").exists());
    }

    #[test]
    fn test_merge_is_transitive() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b"], None).unwrap();
        let id = resolver.merge(&["b", "c"], None).unwrap();

        assert_eq!(id, "a");
        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.members_of("a").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(resolver.group_of("c").as_deref(), Some("a"));
    }

    #[test]
    fn test_merge_of_two_groups_keeps_earliest() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["x", "y"], Some("Xavier")).unwrap();
        resolver.merge(&["m", "n"], None).unwrap();
        resolver.merge(&["p", "q"], None).unwrap();

        let id = resolver.merge(&["n", "y"], None).unwrap();

        assert_eq!(id, "x");
        assert_eq!(resolver.members_of("x").unwrap(), vec!["x", "y", "m", "n"]);
        assert_eq!(resolver.display_name("x").as_deref(), Some("Xavier"));
        let ids: Vec<String> = resolver.groups().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["x", "p"]);
        assert!(matches!(
            resolver.members_of("m"),
            Err(AliasError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_merge_display_name_override() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b"], Some("Old")).unwrap();
        resolver.merge(&["a", "c"], Some("New")).unwrap();
        assert_eq!(resolver.display_name("a").as_deref(), Some("New"));
    }

    #[test]
    fn test_split_to_single_dissolves_group() {
        let (_dir, resolver) = resolver();
        let id = resolver.merge(&["a", "b", "c"], None).unwrap();
        resolver.split(&id, &["a"]).unwrap();

        assert_eq!(resolver.group_of("a"), None);
        assert_eq!(resolver.group_of("b"), None);
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_split_keeps_id_when_present() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b", "c"], Some("Alice")).unwrap();
        resolver.split("a", &["a", "c"]).unwrap();

        assert_eq!(resolver.members_of("a").unwrap(), vec!["a", "c"]);
        assert_eq!(resolver.group_of("b"), None);
        assert_eq!(resolver.display_name("a").as_deref(), Some("Alice"));
    }

    #[test]
    fn test_split_transfers_id_to_smallest_remaining() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["m", "z", "k"], None).unwrap();
        resolver.split("m", &["z", "k"]).unwrap();

        assert_eq!(resolver.group_of("z").as_deref(), Some("k"));
        assert_eq!(resolver.members_of("k").unwrap(), vec!["z", "k"]);
    }

    #[test]
    fn test_split_errors() {
        let (_dir, resolver) = resolver();
        assert!(matches!(
            resolver.split("nobody", &["a"]),
            Err(AliasError::GroupNotFound(_))
        ));

        resolver.merge(&["a", "b"], None).unwrap();
        assert!(matches!(
            resolver.split("a", &["a", "stranger"]),
            Err(AliasError::Validation(_))
        ));
        assert_eq!(resolver.members_of("a").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_split_without_removal_does_not_write() {
        let (dir, resolver) = resolver();
        resolver.merge(&["a", "b"], None).unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::remove_file(&path).unwrap();

        resolver.split("a", &["a", "b"]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_consolidate_or_law() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b"], None).unwrap();

        let m = matrix(&[
            ("a", &[("s1", Found), ("s2", NotFound), ("s3", err("timeout"))]),
            ("b", &[("s1", NotFound), ("s2", NotFound), ("s3", NotFound)]),
        ]);
        let out = resolver.consolidate(&m);

        assert_eq!(out.len(), 1);
        let row = &out["a"];
        assert!(row.grouped);
        assert_eq!(row.members, vec!["a", "b"]);
        assert_eq!(row.results["s1"], Found);
        assert_eq!(row.results["s2"], NotFound);
        assert_eq!(row.results["s3"], err("timeout"));
    }

    #[test]
    fn test_consolidate_mixes_grouped_and_ungrouped() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b", "c"], Some("Alice")).unwrap();

        let m = matrix(&[
            ("b", &[("okta", NotFound)]),
            ("c", &[("okta", Found)]),
            ("solo", &[("okta", err("down"))]),
        ]);
        let out = resolver.consolidate(&m);

        assert_eq!(out.len(), 2);
        assert_eq!(out["a"].members, vec!["b", "c"]);
        assert_eq!(out["a"].display_name.as_deref(), Some("Alice"));
        assert_eq!(out["a"].results["okta"], Found);
        assert!(!out["solo"].grouped);
        assert_eq!(out["solo"].results["okta"], err("down"));
    }

    #[test]
    fn test_consolidate_is_idempotent() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["a", "b"], None).unwrap();
        let m = matrix(&[("a", &[("s", NotFound)]), ("b", &[("s", Found)]), ("c", &[])]);

        let first = resolver.consolidate(&m);
        let second = resolver.consolidate(&m);
        assert_eq!(first, second);
        assert_eq!(resolver.members_of("a").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        {
            let resolver = AliasResolver::load(&path);
            resolver.merge(&["a", "b"], Some("Alice")).unwrap();
            resolver.merge(&["c", "d", "e"], None).unwrap();
            resolver.split("c", &["d", "e"]).unwrap();
        }

        let fresh = AliasResolver::load(&path);
        let groups = fresh.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec!["a", "b"]);
        assert_eq!(groups[0].display_name.as_deref(), Some("Alice"));
        assert_eq!(groups[1].id, "d");
        assert_eq!(fresh.group_of("e").as_deref(), Some("d"));
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let resolver = AliasResolver::empty(blocker.join("aliases.json"));

        let result = resolver.merge(&["a", "b"], None);
        assert!(matches!(result, Err(AliasError::Persistence { .. })));
        assert!(resolver.is_empty());
        assert_eq!(resolver.group_of("a"), None);
    }

    /// A resolver holding one merged group whose document directory has
    /// since been replaced by a plain file, so the next save fails.
    fn resolver_with_blocked_save(members: &[&str]) -> (tempfile::TempDir, AliasResolver) {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("state");
        let resolver = AliasResolver::load(sub.join("aliases.json"));
        resolver.merge(members, Some("Kim")).unwrap();
        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, "x").unwrap();
        (dir, resolver)
    }

    #[test]
    fn test_failed_dissolve_leaves_group_intact() {
        let (_dir, resolver) = resolver_with_blocked_save(&["a", "b", "c"]);

        let result = resolver.split("a", &["a"]);
        assert!(matches!(result, Err(AliasError::Persistence { .. })));
        assert_eq!(resolver.members_of("a").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(resolver.group_of("b").as_deref(), Some("a"));
        assert_eq!(resolver.group_of("c").as_deref(), Some("a"));
        assert_eq!(resolver.display_name("a").as_deref(), Some("Kim"));
    }

    #[test]
    fn test_failed_id_transfer_leaves_group_intact() {
        let (_dir, resolver) = resolver_with_blocked_save(&["m", "z", "k"]);

        let result = resolver.split("m", &["z", "k"]);
        assert!(matches!(result, Err(AliasError::Persistence { .. })));
        assert_eq!(resolver.members_of("m").unwrap(), vec!["m", "z", "k"]);
        assert!(matches!(
            resolver.members_of("k"),
            Err(AliasError::GroupNotFound(_))
        ));
        assert_eq!(resolver.group_of("m").as_deref(), Some("m"));
        assert_eq!(resolver.group_of("z").as_deref(), Some("m"));
    }

    #[test]
    fn test_identities_match_ignoring_case() {
        let (_dir, resolver) = resolver();
        let id = resolver
            .merge(&["John.Doe@Example.com", "jd@partner.org", "JD@Partner.org"], None)
            .unwrap();

        assert_eq!(id, "John.Doe@Example.com");
        assert_eq!(
            resolver.members_of(&id).unwrap(),
            vec!["John.Doe@Example.com", "jd@partner.org"]
        );
        assert_eq!(resolver.group_of("john.doe@example.com").as_deref(), Some(id.as_str()));
        assert!(resolver.is_grouped("JD@PARTNER.ORG"));

        let m = matrix(&[
            ("john.doe@example.com", &[("radius", Found), ("okta", NotFound)]),
            ("jd@partner.org", &[("radius", NotFound), ("okta", Found)]),
        ]);
        let out = resolver.consolidate(&m);
        assert_eq!(out.len(), 1);
        let row = &out[id.as_str()];
        assert_eq!(row.members, vec!["john.doe@example.com", "jd@partner.org"]);
        assert_eq!(row.results["radius"], Found);
        assert_eq!(row.results["okta"], Found);
    }

    #[test]
    fn test_split_ignores_case() {
        let (_dir, resolver) = resolver();
        resolver.merge(&["Ann@x.com", "b@x.com", "c@x.com"], None).unwrap();
        resolver.split("ann@x.com", &["ANN@x.com", "C@X.COM"]).unwrap();

        assert_eq!(resolver.members_of("Ann@x.com").unwrap(), vec!["Ann@x.com", "c@x.com"]);
        assert_eq!(resolver.group_of("b@x.com"), None);
    }

    #[test]
    fn test_reload_picks_up_external_edits() {
        let (dir, resolver) = resolver();
        resolver.merge(&["a", "b"], None).unwrap();

        let path = dir.path().join("aliases.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","groups":[{"id":"x","emails":["x","y"]}]}"#,
        )
        .unwrap();
        assert_eq!(resolver.reload().unwrap(), 1);
        assert_eq!(resolver.group_of("a"), None);
        assert_eq!(resolver.group_of("y").as_deref(), Some("x"));

        std::fs::write(&path, "garbage").unwrap();
        assert!(resolver.reload().is_err());
        assert_eq!(resolver.group_of("y").as_deref(), Some("x"));
    }
}
