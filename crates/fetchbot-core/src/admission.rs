//! Per-identity admission: at most one running job per identity.
//!
//! `try_acquire` never blocks and never queues. The returned `AdmissionSlot`
//! releases on drop, so every exit path of a job gives the identity back.
//! Each slot carries its own job id; a late release from a finished job can
//! never free the slot of the job that replaced it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::request::{Identity, RequestSpec};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// One admitted unit of work. Lives in the guard until its slot is released.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub identity: Identity,
    pub request: RequestSpec,
    pub started_at: SystemTime,
    pub state: JobState,
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct AdmissionGuard {
    active: Mutex<HashMap<Identity, Entry>>,
    next_id: AtomicU64,
}

impl AdmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, Entry>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a job for `identity`, or `None` if one is already active.
    pub fn try_acquire(self: &Arc<Self>, identity: Identity, request: RequestSpec) -> Option<AdmissionSlot> {
        let mut active = self.lock();
        if active.contains_key(&identity) {
            tracing::debug!(identity = %identity, "admission rejected: job already active");
            return None;
        }
        let job_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let job = Job {
            id: job_id,
            identity: identity.clone(),
            request,
            started_at: SystemTime::now(),
            state: JobState::Pending,
        };
        active.insert(
            identity.clone(),
            Entry {
                job,
                cancel: cancel.clone(),
            },
        );
        drop(active);
        tracing::debug!(job_id, identity = %identity, "admitted");
        Some(AdmissionSlot {
            guard: Arc::clone(self),
            identity,
            job_id,
            cancel,
            released: AtomicBool::new(false),
        })
    }

    /// Free the identity if it is still held by `job_id`. Idempotent.
    pub fn release(&self, identity: &Identity, job_id: JobId) -> bool {
        let mut active = self.lock();
        match active.get(identity) {
            Some(entry) if entry.job.id == job_id => {
                active.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, identity: &Identity) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of every admitted job.
    pub fn active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Request cancellation of the identity's active job. Returns false if there is none.
    pub fn cancel(&self, identity: &Identity) -> bool {
        match self.lock().get(identity) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active job; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for entry in active.values() {
            entry.cancel.cancel();
        }
        active.len()
    }

    fn set_state(&self, identity: &Identity, job_id: JobId, state: JobState) {
        if let Some(entry) = self.lock().get_mut(identity) {
            if entry.job.id == job_id {
                entry.job.state = state;
            }
        }
    }
}

/// Scoped ownership of an identity's admission. Dropping it releases.
pub struct AdmissionSlot {
    guard: Arc<AdmissionGuard>,
    identity: Identity,
    job_id: JobId,
    cancel: CancellationToken,
    released: AtomicBool,
}

impl AdmissionSlot {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_state(&self, state: JobState) {
        self.guard.set_state(&self.identity, self.job_id, state);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release now. Later calls (and the drop) are no-ops.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let freed = self.guard.release(&self.identity, self.job_id);
        tracing::debug!(job_id = self.job_id, identity = %self.identity, "admission released");
        freed
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.release();
    }
}
