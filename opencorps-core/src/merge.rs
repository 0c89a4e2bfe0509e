//! Per-field merge policy applied by [`StoreExt::insert_or_update`].
//!
//! Rules, field by field:
//! - lists: union by equality, keeping first-seen order
//! - empty vs non-empty scalar: the non-empty value is taken
//! - two different non-empty scalars: logged, the stored value wins
//!
//! Each entity spells out its fields explicitly so the policy for any one
//! field can be read (and tested) on its own.
//!
//! [`StoreExt::insert_or_update`]: crate::store::StoreExt::insert_or_update

use std::fmt::Debug;

use crate::types::{CiBuild, CiJob, Progress, Project, Push, Shield};

/// Fold `other` into `self`.
pub trait Merge {
    fn merge_from(&mut self, other: &Self);
}

/// Append items of `theirs` that `mine` does not already contain.
pub fn union<T: PartialEq + Clone + Debug>(field: &str, mine: &mut Vec<T>, theirs: &[T]) {
    let before = mine.len();
    for item in theirs {
        if !mine.contains(item) {
            mine.push(item.clone());
        }
    }
    if mine.len() != before {
        tracing::info!(field, merged = ?mine, "merged list field");
    }
}

/// Take `theirs` if `mine` is empty (its `Default`), otherwise keep `mine`.
pub fn first_wins<T: PartialEq + Clone + Default + Debug>(field: &str, mine: &mut T, theirs: &T) {
    let empty = T::default();
    if *mine == empty {
        if *theirs != empty {
            tracing::info!(field, value = ?theirs, "merged field");
            *mine = theirs.clone();
        }
    } else if *theirs != empty && mine != theirs {
        tracing::warn!(field, stored = ?mine, incoming = ?theirs, "merge conflict, keeping stored value");
    }
}

/// Shields merge per subject; a placeholder yields to a real status.
fn merge_shields(mine: &mut Vec<Shield>, theirs: &[Shield]) {
    for shield in theirs {
        match mine.iter_mut().find(|s| s.subject == shield.subject) {
            None => mine.push(shield.clone()),
            Some(existing) if existing.is_placeholder() && !shield.is_placeholder() => {
                *existing = shield.clone();
            }
            Some(existing) if existing != shield && !shield.is_placeholder() => {
                tracing::warn!(
                    subject = %shield.subject,
                    stored = %existing.status,
                    incoming = %shield.status,
                    "shield conflict, keeping stored value"
                );
            }
            Some(_) => {}
        }
    }
}

impl Merge for Progress {
    fn merge_from(&mut self, other: &Self) {
        first_wins("has_webhook", &mut self.has_webhook, &other.has_webhook);
        first_wins("forked", &mut self.forked, &other.forked);
        first_wins("user_config", &mut self.user_config, &other.user_config);
        first_wins("fork_config", &mut self.fork_config, &other.fork_config);
        first_wins(
            "fork_ci_config_committed",
            &mut self.fork_ci_config_committed,
            &other.fork_ci_config_committed,
        );
        first_wins("ci", &mut self.ci, &other.ci);
        first_wins("init_complete", &mut self.init_complete, &other.init_complete);
    }
}

/// Folds a re-registration into the stored project. Run state (progress,
/// `failure_count`, `pending_merges`) only ever moves forward here: resets
/// and queue pops are written by the step that makes them, through
/// `opencorps_sync::save_project`, never through `insert_or_update`.
impl Merge for Project {
    fn merge_from(&mut self, other: &Self) {
        first_wins("name", &mut self.name, &other.name);
        first_wins("owner", &mut self.owner, &other.owner);
        first_wins("description", &mut self.description, &other.description);
        union("tags", &mut self.tags, &other.tags);
        first_wins("repo", &mut self.repo, &other.repo);
        merge_shields(&mut self.shields, &other.shields);
        if self.secret != other.secret {
            tracing::warn!(project = %self.key, "merge conflict on secret, keeping stored value");
        }
        self.progress.merge_from(&other.progress);
        first_wins("failure_count", &mut self.failure_count, &other.failure_count);
        first_wins("system_message", &mut self.system_message, &other.system_message);
        union("pending_merges", &mut self.pending_merges, &other.pending_merges);
    }
}

impl Merge for Push {
    fn merge_from(&mut self, other: &Self) {
        first_wins("ref", &mut self.ref_name, &other.ref_name);
        first_wins("before", &mut self.before, &other.before);
        first_wins("after", &mut self.after, &other.after);
        first_wins("fork_merge", &mut self.fork_merge, &other.fork_merge);
        first_wins("ci_update", &mut self.ci_update, &other.ci_update);
        first_wins("compare", &mut self.compare, &other.compare);
    }
}

impl Merge for CiJob {
    fn merge_from(&mut self, other: &Self) {
        first_wins("build_id", &mut self.build_id, &other.build_id);
        first_wins("commit", &mut self.commit, &other.commit);
        first_wins("repository_id", &mut self.repository_id, &other.repository_id);
        first_wins("number", &mut self.number, &other.number);
        first_wins("state", &mut self.state, &other.state);
        first_wins("duration", &mut self.duration, &other.duration);
        first_wins("log_id", &mut self.log_id, &other.log_id);
        union("logfiles", &mut self.logfiles, &other.logfiles);
        first_wins("valid", &mut self.valid, &other.valid);
    }
}

impl Merge for CiBuild {
    fn merge_from(&mut self, other: &Self) {
        first_wins("commit", &mut self.commit, &other.commit);
        first_wins("repository_id", &mut self.repository_id, &other.repository_id);
        first_wins("number", &mut self.number, &other.number);
        first_wins("pull_request", &mut self.pull_request, &other.pull_request);
        first_wins("state", &mut self.state, &other.state);
        first_wins("duration", &mut self.duration, &other.duration);
        union("job_ids", &mut self.job_ids, &other.job_ids);
        first_wins("valid", &mut self.valid, &other.valid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreExt};
    use crate::types::{ProjectKey, Sha1};
    use rstest::rstest;
    use std::str::FromStr;

    #[test]
    fn union_preserves_first_seen_order() {
        let mut mine = vec!["a", "b"];
        union("tags", &mut mine, &["c", "a", "d"]);
        assert_eq!(mine, vec!["a", "b", "c", "d"]);
    }

    #[rstest]
    #[case("", "x", "x")]
    #[case("x", "", "x")]
    #[case("x", "y", "x")]
    #[case("x", "x", "x")]
    fn first_wins_string(#[case] mine: &str, #[case] theirs: &str, #[case] expected: &str) {
        let mut value = mine.to_owned();
        first_wins("field", &mut value, &theirs.to_owned());
        assert_eq!(value, expected);
    }

    #[test]
    fn placeholder_shield_yields() {
        let mut mine = vec![Shield::placeholder("sim"), Shield::placeholder("docs")];
        let mut passing = Shield::placeholder("sim");
        passing.status = "3 passing".into();
        passing.colour = "brightgreen".into();
        merge_shields(&mut mine, &[passing.clone(), Shield::placeholder("docs")]);
        assert_eq!(mine[0], passing);
        assert_eq!(mine.len(), 2);
    }

    #[test]
    fn insert_or_update_merges_job_logfiles() {
        let store = MemoryStore::new();
        let mut a = CiJob::new(11, None);
        a.logfiles = vec!["/buildlogs/o/r/11/sim.log".into()];
        a.number = Some("4.1".into());
        store.insert_or_update(a).unwrap();

        let mut b = CiJob::new(11, None);
        b.logfiles = vec!["/buildlogs/o/r/11/quartus.log".into()];
        b.repository_id = Some(99);
        let merged = store.insert_or_update(b).unwrap();

        assert_eq!(merged.logfiles.len(), 2);
        assert_eq!(merged.number.as_deref(), Some("4.1"));
        assert_eq!(merged.repository_id, Some(99));
        let stored: CiJob = store.get("11").unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[test]
    fn project_merge_unions_pending_merges() {
        let key = ProjectKey::new("o", "r").unwrap();
        let s1 = Sha1::from_str(&"1".repeat(40)).unwrap();
        let s2 = Sha1::from_str(&"2".repeat(40)).unwrap();
        let mut stored = Project::new(key.clone());
        stored.pending_merges = vec![s1.clone()];
        let mut incoming = stored.clone();
        incoming.pending_merges = vec![s2.clone(), s1.clone()];
        incoming.description = "fpga uart".into();
        stored.merge_from(&incoming);
        assert_eq!(stored.pending_merges, vec![s1, s2]);
        assert_eq!(stored.description, "fpga uart");
    }

    #[test]
    fn reregistration_keeps_stored_run_state() {
        let store = MemoryStore::new();
        let key = ProjectKey::new("o", "r").unwrap();
        let mut running = Project::new(key.clone());
        running.progress.has_webhook = true;
        running.progress.forked = true;
        running.failure_count = 3;
        store.put(&running).unwrap();

        let mut again = Project::new(key);
        again.tags = vec!["uart".into()];
        let merged = store.insert_or_update(again).unwrap();

        assert!(merged.progress.forked);
        assert_eq!(merged.failure_count, 3);
        assert_eq!(merged.tags, vec!["uart".to_owned()]);
        assert_eq!(merged.secret, running.secret);
    }
}
