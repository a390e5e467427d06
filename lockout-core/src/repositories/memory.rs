//! In-memory lockout repository.
//!
//! State lives for the lifetime of the process. Suitable for advisory
//! limiters such as the identity-keyed one, where forgetting attempts across
//! a restart is acceptable.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{Error, policy::Transition, storage::LockoutState};

use super::LockoutRepository;

/// `DashMap`-backed repository. Updates lock only the shard holding the key.
#[derive(Debug, Default)]
pub struct MemoryLockoutRepository {
    states: DashMap<String, LockoutState>,
}

impl MemoryLockoutRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl LockoutRepository for MemoryLockoutRepository {
    async fn get(&self, key: &str) -> Result<Option<LockoutState>, Error> {
        Ok(self.states.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, state: &LockoutState) -> Result<(), Error> {
        self.states.insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.states.remove(key).is_some())
    }

    async fn for_each(
        &self,
        visit: &mut (dyn for<'s> FnMut(&'s LockoutState) + Send),
    ) -> Result<(), Error> {
        // Snapshot first so no shard lock is held while visiting
        let snapshot: Vec<LockoutState> = self
            .states
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for state in &snapshot {
            visit(state);
        }
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn for<'s> FnMut(Option<&'s LockoutState>) -> Result<Transition, Error> + Send),
    ) -> Result<Option<LockoutState>, Error> {
        match self.states.entry(key.to_string()) {
            Entry::Occupied(mut entry) => match apply(Some(entry.get()))? {
                Transition::Unchanged => Ok(Some(entry.get().clone())),
                Transition::Put(state) => {
                    entry.insert(state.clone());
                    Ok(Some(state))
                }
                Transition::Delete => {
                    entry.remove();
                    Ok(None)
                }
            },
            Entry::Vacant(entry) => match apply(None)? {
                Transition::Put(state) => {
                    entry.insert(state.clone());
                    Ok(Some(state))
                }
                Transition::Unchanged | Transition::Delete => Ok(None),
            },
        }
    }
}
