//! Live executor sessions
//!
//! At most one executor session drives a job at a time. A claim is held for
//! the lifetime of the session and released when it is dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Default)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashSet<i64>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `job_id` for a new session
    ///
    /// # Returns
    /// `None` if another session already holds the job
    pub fn claim(&self, job_id: i64) -> Option<SessionClaim> {
        let inserted = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id);

        inserted.then(|| SessionClaim {
            registry: self.clone(),
            job_id,
        })
    }

    pub fn is_live(&self, job_id: i64) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }
}

/// Exclusive right to drive one job's executor session
pub struct SessionClaim {
    registry: SessionRegistry,
    job_id: i64,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}
