//! Process-wide session registry (spec.md §4.C).
//!
//! A single process-wide map guarded by one lock is exactly what the spec
//! calls for ("a single mutex — ordering of registry operations for a given
//! id is naturally serialized by the per-session state machine"); `parking_lot`
//! is already part of the teacher workspace's dependency set (`router-api`)
//! and its `Mutex` never needs to be held across an `.await`, since every
//! operation here is a point lookup/insert/remove.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use super::session::Session;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Returns the existing session for `id`, or creates and registers a
    /// fresh one in IDLE state.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    /// Idempotent: removing an id that is no longer present is a no-op.
    pub fn remove(&self, id: &str) {
        self.sessions.lock().remove(id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

pub static REGISTRY: LazyLock<SessionRegistry> = LazyLock::new(SessionRegistry::new);
