use crate::error::{EngineError, Result};
use crate::{Job, Status};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-memory job table shared by the dispatcher, running jobs and readers.
///
/// Every operation takes the lock for its whole read-modify-write, so a
/// record is never observed half-updated and the last completed write for a
/// key wins. Records live until the process exits.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(EngineError::DuplicateJob(job.id));
        }
        debug!(job_id = %job.id, kind = %job.kind, "Registered job");
        jobs.insert(job.id, job);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Replace the mutable fields of a record. Returns `false` without
    /// touching anything when the id is unknown or the status change would
    /// move backwards or out of a terminal state.
    ///
    /// `result_url` is only stored with `Completed`, and completion is refused
    /// when no location is known.
    pub async fn update(
        &self,
        id: Uuid,
        status: Status,
        details: impl Into<String>,
        result_url: Option<String>,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };

        if !job.status.can_transition_to(status) {
            warn!(
                job_id = %id,
                from = ?job.status,
                to = ?status,
                "Ignoring invalid status transition"
            );
            return false;
        }

        if status == Status::Completed {
            match result_url.or_else(|| job.result_url.clone()) {
                Some(url) => job.result_url = Some(url),
                None => {
                    warn!(job_id = %id, "Ignoring completion without a result location");
                    return false;
                }
            }
        }

        job.status = status;
        job.details = details.into();
        job.updated_at = Utc::now();
        true
    }

    pub async fn begin_job(&self, id: Uuid, details: &str) -> bool {
        self.update(id, Status::Processing, details, None).await
    }

    /// Progress message while processing.
    pub async fn set_details(&self, id: Uuid, details: &str) -> bool {
        self.update(id, Status::Processing, details, None).await
    }

    pub async fn complete_job(&self, id: Uuid, result_url: String) -> bool {
        self.update(id, Status::Completed, "Done", Some(result_url)).await
    }

    pub async fn fail_job(&self, id: Uuid, msg: &str) -> bool {
        let msg = if msg.trim().is_empty() { "unknown error" } else { msg };
        self.update(id, Status::Failed, msg, None).await
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
