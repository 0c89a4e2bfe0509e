//! Writing a project back after a step.
//!
//! A step works on a copy loaded before it started. Pushes ingested while it
//! ran land in the stored record's queue, so the write-back reloads that
//! record inside the store's transaction boundary and keeps them.

use tracing::info;

use opencorps_core::{ObjectStore, Project, Push, StoreError, StoreExt};

/// Persist `project`, first appending any push queued by a concurrent
/// writer that is still waiting to be folded into the fork.
///
/// Heads the step consumed are not brought back: a folded push carries a
/// `fork_merge`, and a dropped head has no stored push.
pub fn save_project(store: &dyn ObjectStore, project: &mut Project) -> Result<(), StoreError> {
    store.atomically(&mut || {
        if let Some(stored) = store.get::<Project>(project.key.as_str())? {
            for sha in &stored.pending_merges {
                if project.pending_merges.contains(sha) {
                    continue;
                }
                let waiting = store
                    .get::<Push>(sha.as_str())?
                    .is_some_and(|push| push.fork_merge.is_none());
                if waiting {
                    info!(project = %project.key, push = %sha, "keeping push queued while the step ran");
                    project.pending_merges.push(sha.clone());
                }
            }
        }
        store.put(&*project)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::Fixture;
    use crate::ingest::{ingest_push, PushNotification, PushRepository};
    use crate::{advance, PushOutcome};
    use opencorps_core::{ProjectKey, Sha1, USER_CONFIG_FILE};

    fn key() -> ProjectKey {
        ProjectKey::new("chiggs", "uart").unwrap()
    }

    fn sha(c: char) -> Sha1 {
        c.to_string().repeat(40).parse().unwrap()
    }

    fn note(after: Sha1) -> PushNotification {
        PushNotification {
            ref_name: "refs/heads/master".into(),
            before: sha('0'),
            after,
            compare: None,
            repository: PushRepository {
                full_name: "chiggs/uart".into(),
            },
        }
    }

    fn load(fx: &Fixture) -> Project {
        fx.store.get(key().as_str()).unwrap().unwrap()
    }

    #[test]
    fn push_ingested_during_a_step_survives_its_write_back() {
        let fx = Fixture::new().unwrap();
        fx.source.put_file("chiggs", "uart", USER_CONFIG_FILE, "schema_version: [1]\n");
        let mut p = Project::new(key());
        p.progress.has_webhook = true;
        fx.store.put(&p).unwrap();

        let mut stepping = load(&fx);
        let (outcome, _) = ingest_push(&fx.store, &key(), &note(sha('b'))).unwrap().unwrap();
        assert_eq!(outcome, PushOutcome::Recorded);

        advance(&fx.ctx(), &mut stepping).unwrap();
        save_project(&fx.store, &mut stepping).unwrap();

        let stored = load(&fx);
        assert!(stored.progress.forked);
        assert_eq!(stored.pending_merges, vec![sha('b')]);
    }

    #[test]
    fn consumed_heads_stay_consumed() {
        let fx = Fixture::new().unwrap();
        let mut p = Project::new(key());
        for s in [sha('a'), sha('b')] {
            let mut push = Push::at(s.clone());
            push.after = Some(s.clone());
            fx.store.put(&push).unwrap();
            p.pending_merges.push(s);
        }
        fx.store.put(&p).unwrap();

        let mut folded: Push = fx.store.get(sha('a').as_str()).unwrap().unwrap();
        folded.fork_merge = Some(sha('f'));
        fx.store.put(&folded).unwrap();
        p.pending_merges.remove(0);
        save_project(&fx.store, &mut p).unwrap();

        assert_eq!(load(&fx).pending_merges, vec![sha('b')]);
    }

    #[test]
    fn ingest_for_unknown_project_stores_nothing() {
        let fx = Fixture::new().unwrap();
        assert!(ingest_push(&fx.store, &key(), &note(sha('b'))).unwrap().is_none());
        assert!(fx.store.get::<Push>(sha('b').as_str()).unwrap().is_none());
    }
}
