//! Test doubles shared by the unit tests.

use crate::error::{Result, SyncError};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use shelfsync_engine::{PullQuery, SyncPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records every call; pulls answer a canned payload, pushes echo their rows.
#[derive(Debug, Default)]
pub struct MockTransport {
    pulls: Mutex<Vec<PullQuery>>,
    pushes: Mutex<Vec<SyncPayload>>,
    pull_response: Mutex<SyncPayload>,
    fail_pulls: AtomicBool,
    fail_pushes: AtomicBool,
}

impl MockTransport {
    pub fn respond_pull(&self, payload: SyncPayload) {
        *self.pull_response.lock().unwrap() = payload;
    }

    pub fn fail_pulls(&self, fail: bool) {
        self.fail_pulls.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn pulls(&self) -> Vec<PullQuery> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<SyncPayload> {
        self.pushes.lock().unwrap().clone()
    }
}

fn unavailable() -> SyncError {
    SyncError::Http {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn pull(&self, query: &PullQuery) -> Result<SyncPayload> {
        self.pulls.lock().unwrap().push(query.clone());
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.pull_response.lock().unwrap().clone())
    }

    async fn push(&self, payload: &SyncPayload) -> Result<SyncPayload> {
        self.pushes.lock().unwrap().push(payload.clone());
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(payload.clone())
    }
}
