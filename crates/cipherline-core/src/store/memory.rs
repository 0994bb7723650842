//! In-memory session store for tests and simulations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::session::{NewSession, SessionRecord};

use super::{SessionStore, StoreError};

/// `HashMap`-backed store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: HashMap<i64, SessionRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicking test; propagating the panic is
        // the useful behavior there.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for MemoryStore {
    fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let mut inner = self.lock();

        inner.next_id += 1;
        let record = SessionRecord {
            id: inner.next_id,
            client_id: new.client_id,
            salt: new.salt,
            key_c2s: new.keys.k_c2s,
            key_s2c: new.keys.k_s2c,
            created_at: SystemTime::now(),
        };

        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.lock().records.get(&id).cloned())
    }
}
