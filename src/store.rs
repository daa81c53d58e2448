// src/store.rs - Index of all unfinished jobs by client id
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::job::Job;

#[derive(Debug, Error)]
#[error("client {0} already has a job queued")]
pub struct DuplicateJob(pub String);

/// Client -> job map covering every job that is queued or current.
/// A client has at most one entry at any time.
#[derive(Debug, Default)]
pub struct JobStore {
    inner: Mutex<HashMap<String, Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, job: Arc<Job>) -> Result<(), DuplicateJob> {
        let mut map = self.lock();
        if map.contains_key(&job.client) {
            return Err(DuplicateJob(job.client.clone()));
        }
        map.insert(job.client.clone(), job);
        Ok(())
    }

    pub fn remove(&self, client: &str) -> Option<Arc<Job>> {
        self.lock().remove(client)
    }

    pub fn get(&self, client: &str) -> Option<Arc<Job>> {
        self.lock().get(client).cloned()
    }

    pub fn contains(&self, client: &str) -> bool {
        self.lock().contains_key(client)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
