//! Concurrent map of job id -> live session.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::TransferSession;

const SHARDS: usize = 16;

type Shard = HashMap<String, Arc<TransferSession>>;

/// Sessions keyed by job id, split over independently locked shards so
/// workers touching different jobs rarely contend.
pub struct SessionTable {
    shards: Vec<RwLock<Shard>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, job_id: &str) -> &RwLock<Shard> {
        let mut h = DefaultHasher::new();
        job_id.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARDS]
    }

    fn read(&self, job_id: &str) -> RwLockReadGuard<'_, Shard> {
        self.shard(job_id).read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, job_id: &str) -> RwLockWriteGuard<'_, Shard> {
        self.shard(job_id).write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert unless a session for the same job id exists. Returns whether it was inserted.
    pub fn insert_if_absent(&self, session: Arc<TransferSession>) -> bool {
        let id = session.job_id().to_string();
        match self.write(&id).entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(session);
                true
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<TransferSession>> {
        self.read(job_id).get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &str) -> Option<Arc<TransferSession>> {
        self.write(job_id).remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    fn session(id: &str) -> Arc<TransferSession> {
        Arc::new(TransferSession::new(id, Arc::new(MemoryEngine::new())))
    }

    #[test]
    fn insert_is_idempotent_per_job() {
        let t = SessionTable::new();
        let first = session("job00001");
        assert!(t.insert_if_absent(first.clone()));
        assert!(!t.insert_if_absent(session("job00001")));
        assert!(Arc::ptr_eq(&t.get("job00001").unwrap(), &first));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_frees_the_key() {
        let t = SessionTable::new();
        t.insert_if_absent(session("job00001"));
        assert!(t.remove("job00001").is_some());
        assert!(t.remove("job00001").is_none());
        assert!(t.get("job00001").is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn concurrent_inserts_of_distinct_jobs() {
        let t = Arc::new(SessionTable::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        assert!(t.insert_if_absent(session(&format!("w{n}-{i}"))));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.len(), 400);
    }
}
