//! Conflict resolution.
//!
//! The default policy is last-write-wins on `modified_at`. Ties fall back to
//! "a live value beats a tombstone" and finally to the byte order of the
//! canonical JSON encoding, so the outcome never depends on which side is
//! called local. Entity types can register a [`MergeHook`] to combine two
//! live values instead of dropping one.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// One side of a conflict, in plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Decrypted value (`Null` for tombstones).
    pub value: Value,
    /// Wall-clock time of the last edit (Unix millis).
    pub modified_at: u64,
    /// Whether this side deleted the entity.
    pub deleted: bool,
}

impl EntityState {
    /// A live value.
    pub fn live(value: Value, modified_at: u64) -> Self {
        Self {
            value,
            modified_at,
            deleted: false,
        }
    }

    /// A tombstone.
    pub fn tombstone(modified_at: u64) -> Self {
        Self {
            value: Value::Null,
            modified_at,
            deleted: true,
        }
    }
}

/// Both sides of a conflicting entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictInput {
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Local (dirty) copy.
    pub local: EntityState,
    /// Copy held by the backend.
    pub remote: EntityState,
}

/// Which side a resolution keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the local copy.
    Local,
    /// Keep the remote copy.
    Remote,
    /// Keep a value combined from both.
    Merged,
}

/// Result of [`ConflictResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Winning side.
    pub winner: Winner,
    /// Combined value, set only for [`Winner::Merged`].
    pub merged: Option<Value>,
}

impl Resolution {
    /// Returns the value the entity ends up with.
    pub fn value<'a>(&'a self, input: &'a ConflictInput) -> &'a Value {
        match self.winner {
            Winner::Local => &input.local.value,
            Winner::Remote => &input.remote.value,
            Winner::Merged => self.merged.as_ref().unwrap_or(&NULL),
        }
    }
}

/// Combines two live values of one entity type.
///
/// `winner` is the side last-write-wins would keep. Implementations must be
/// deterministic.
pub trait MergeHook: Send + Sync {
    /// Returns the combined value.
    fn merge(&self, winner: &Value, loser: &Value) -> Value;
}

/// Keeps the winner but takes the larger value of each listed numeric field.
///
/// Suited to counters and progress fields that only grow.
#[derive(Debug, Clone, Default)]
pub struct MaxFieldsMerge {
    fields: Vec<String>,
}

impl MaxFieldsMerge {
    /// Creates a merge over the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl MergeHook for MaxFieldsMerge {
    fn merge(&self, winner: &Value, loser: &Value) -> Value {
        let mut merged = winner.clone();
        let (Some(target), Some(other)) = (merged.as_object_mut(), loser.as_object()) else {
            return winner.clone();
        };

        for field in &self.fields {
            let Some(theirs) = other.get(field) else {
                continue;
            };
            let keep_theirs = match target.get(field) {
                None => theirs.is_number(),
                Some(ours) => compare_numbers(theirs, ours) == Some(Ordering::Greater),
            };
            if keep_theirs {
                target.insert(field.clone(), theirs.clone());
            }
        }
        merged
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Per-entity-type conflict policy.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    hooks: HashMap<String, Arc<dyn MergeHook>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.hooks.keys().collect();
        types.sort();
        f.debug_struct("ConflictResolver")
            .field("hooks", &types)
            .finish()
    }
}

impl ConflictResolver {
    /// Creates a resolver using last-write-wins everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a merge hook for an entity type.
    #[must_use]
    pub fn with_hook(mut self, entity_type: impl Into<String>, hook: Arc<dyn MergeHook>) -> Self {
        self.hooks.insert(entity_type.into(), hook);
        self
    }

    /// Returns true if `entity_type` has a merge hook.
    pub fn has_hook(&self, entity_type: &str) -> bool {
        self.hooks.contains_key(entity_type)
    }

    /// Resolves a conflict.
    pub fn resolve(&self, input: &ConflictInput) -> Resolution {
        let local_wins = precedence(&input.local, &input.remote) == Ordering::Greater;
        let (winner, loser) = if local_wins {
            (&input.local, &input.remote)
        } else {
            (&input.remote, &input.local)
        };

        let hook = self
            .hooks
            .get(&input.entity_type)
            .filter(|_| !input.local.deleted && !input.remote.deleted);

        let Some(hook) = hook else {
            return Resolution {
                winner: if local_wins { Winner::Local } else { Winner::Remote },
                merged: None,
            };
        };

        let merged = hook.merge(&winner.value, &loser.value);
        if merged == input.remote.value {
            Resolution {
                winner: Winner::Remote,
                merged: None,
            }
        } else if merged == input.local.value {
            Resolution {
                winner: Winner::Local,
                merged: None,
            }
        } else {
            Resolution {
                winner: Winner::Merged,
                merged: Some(merged),
            }
        }
    }
}

/// Total order between two sides; the greater one wins.
fn precedence(a: &EntityState, b: &EntityState) -> Ordering {
    a.modified_at
        .cmp(&b.modified_at)
        .then_with(|| b.deleted.cmp(&a.deleted))
        .then_with(|| canonical(&a.value).cmp(&canonical(&b.value)))
}

fn canonical(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn input(local: EntityState, remote: EntityState) -> ConflictInput {
        ConflictInput {
            entity_type: "goal".into(),
            entity_id: "g1".into(),
            local,
            remote,
        }
    }

    fn swapped(input: &ConflictInput) -> ConflictInput {
        ConflictInput {
            local: input.remote.clone(),
            remote: input.local.clone(),
            ..input.clone()
        }
    }

    #[test]
    fn newer_edit_wins() {
        let resolver = ConflictResolver::new();
        let conflict = input(
            EntityState::live(json!({"title": "mine"}), 200),
            EntityState::live(json!({"title": "theirs"}), 100),
        );
        assert_eq!(resolver.resolve(&conflict).winner, Winner::Local);
        assert_eq!(resolver.resolve(&swapped(&conflict)).winner, Winner::Remote);
    }

    #[test]
    fn live_beats_tombstone_on_tie() {
        let resolver = ConflictResolver::new();
        let conflict = input(
            EntityState::tombstone(100),
            EntityState::live(json!({"title": "kept"}), 100),
        );
        assert_eq!(resolver.resolve(&conflict).winner, Winner::Remote);
        assert_eq!(resolver.resolve(&swapped(&conflict)).winner, Winner::Local);
    }

    #[test]
    fn later_delete_wins() {
        let resolver = ConflictResolver::new();
        let conflict = input(
            EntityState::tombstone(300),
            EntityState::live(json!({"title": "old"}), 100),
        );
        assert_eq!(resolver.resolve(&conflict).winner, Winner::Local);
    }

    #[test]
    fn identical_sides_keep_remote() {
        let resolver = ConflictResolver::new();
        let same = EntityState::live(json!({"n": 1}), 5);
        let resolution = resolver.resolve(&input(same.clone(), same));
        assert_eq!(resolution.winner, Winner::Remote);
        assert!(resolution.merged.is_none());
    }

    #[test]
    fn max_fields_merge_combines_counters() {
        let resolver = ConflictResolver::new()
            .with_hook("goal", Arc::new(MaxFieldsMerge::new(["progress"])));
        let conflict = input(
            EntityState::live(json!({"title": "renamed", "progress": 3}), 200),
            EntityState::live(json!({"title": "original", "progress": 7}), 100),
        );

        let resolution = resolver.resolve(&conflict);
        assert_eq!(resolution.winner, Winner::Merged);
        assert_eq!(
            resolution.merged,
            Some(json!({"title": "renamed", "progress": 7}))
        );
        assert_eq!(
            resolver.resolve(&swapped(&conflict)).merged,
            resolution.merged
        );
    }

    #[test]
    fn merge_equal_to_one_side_reports_that_side() {
        let resolver = ConflictResolver::new()
            .with_hook("goal", Arc::new(MaxFieldsMerge::new(["progress"])));
        let conflict = input(
            EntityState::live(json!({"progress": 9}), 200),
            EntityState::live(json!({"progress": 2}), 100),
        );
        assert_eq!(resolver.resolve(&conflict).winner, Winner::Local);
    }

    #[test]
    fn hooks_skip_tombstones() {
        let resolver = ConflictResolver::new()
            .with_hook("goal", Arc::new(MaxFieldsMerge::new(["progress"])));
        let conflict = input(
            EntityState::tombstone(50),
            EntityState::live(json!({"progress": 2}), 100),
        );
        assert_eq!(resolver.resolve(&conflict).winner, Winner::Remote);
        assert!(resolver.has_hook("goal"));
        assert!(!resolver.has_hook("task"));
    }

    #[test]
    fn max_fields_ignores_non_objects() {
        let merge = MaxFieldsMerge::new(["n"]);
        assert_eq!(merge.merge(&json!(1), &json!({"n": 4})), json!(1));
        assert_eq!(
            merge.merge(&json!({"n": 1.5}), &json!({"n": 2.5})),
            json!({"n": 2.5})
        );
        assert_eq!(merge.merge(&json!({}), &json!({"n": "x"})), json!({}));
    }

    fn side() -> impl Strategy<Value = EntityState> {
        (0u64..4, any::<bool>(), 0i64..4, 0i64..4).prop_map(|(at, deleted, a, b)| {
            if deleted {
                EntityState::tombstone(at)
            } else {
                EntityState::live(json!({"a": a, "b": b}), at)
            }
        })
    }

    proptest! {
        #[test]
        fn resolution_is_symmetric(local in side(), remote in side(), hooked in any::<bool>()) {
            let mut resolver = ConflictResolver::new();
            if hooked {
                resolver = resolver.with_hook("goal", Arc::new(MaxFieldsMerge::new(["b"])));
            }
            let conflict = input(local, remote);
            let mirror = swapped(&conflict);

            let forward = resolver.resolve(&conflict);
            let backward = resolver.resolve(&mirror);
            prop_assert_eq!(forward.value(&conflict), backward.value(&mirror));
        }
    }
}
