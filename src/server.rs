use crate::error::EngineError;
use crate::registry::JobStore;
use crate::worker::{self, JobContext};
use crate::{Job, JobRequest};
use anyhow::Error;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

#[derive(Debug)]
pub enum WorkResponseMessage {
    JobAccepted(Uuid),
    RequestRejected(String),
    JobCompleted(Uuid),
    JobFailed(Uuid, String),
}

/// Tracks which accepted jobs a client is still waiting on.
///
/// A job is spawned before its `JobAccepted` is sent, so its terminal message
/// can arrive first; such ids are held until the acceptance shows up.
#[derive(Debug, Default)]
pub struct PendingJobs {
    answered: usize,
    running: HashSet<Uuid>,
    finished_early: HashSet<Uuid>,
}

impl PendingJobs {
    pub fn observe(&mut self, msg: &WorkResponseMessage) {
        match msg {
            WorkResponseMessage::JobAccepted(job_id) => {
                self.answered += 1;
                if !self.finished_early.remove(job_id) {
                    self.running.insert(*job_id);
                }
            }
            WorkResponseMessage::RequestRejected(_) => self.answered += 1,
            WorkResponseMessage::JobCompleted(job_id)
            | WorkResponseMessage::JobFailed(job_id, _) => {
                if !self.running.remove(job_id) {
                    self.finished_early.insert(*job_id);
                }
            }
        }
    }

    /// Requests answered with either `JobAccepted` or `RequestRejected`.
    pub fn answered(&self) -> usize {
        self.answered
    }

    /// True once `submitted` requests are answered and every accepted job
    /// has reported a terminal state.
    pub fn is_settled(&self, submitted: usize) -> bool {
        self.answered >= submitted && self.running.is_empty() && self.finished_early.is_empty()
    }
}

/// Accepts job requests and starts each one on its own task.
///
/// There is no limit on how many jobs run at once and no queue: every
/// accepted request is spawned immediately and never joined.
#[derive(Clone)]
pub struct Dispatcher {
    store: JobStore,
    ctx: Arc<JobContext>,
    send_to_client: Option<mpsc::UnboundedSender<WorkResponseMessage>>,
}

impl Dispatcher {
    pub fn new(store: JobStore, ctx: JobContext) -> Self {
        Dispatcher {
            store,
            ctx: Arc::new(ctx),
            send_to_client: None,
        }
    }

    /// Also report terminal states on `sender` once they are recorded.
    pub fn with_notifications(
        mut self,
        sender: mpsc::UnboundedSender<WorkResponseMessage>,
    ) -> Self {
        self.send_to_client = Some(sender);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Validate, record as pending and start the job. Returns as soon as the
    /// job is spawned; poll [`JobStore::get`] for progress.
    pub async fn submit(&self, request: JobRequest) -> Result<Uuid, EngineError> {
        request.validate()?;

        let job = Job::new(request.kind());
        let job_id = job.id;
        let kind = job.kind;
        self.store.create(job).await?;

        tokio::spawn(
            worker::start(
                self.store.clone(),
                self.ctx.clone(),
                job_id,
                request,
                self.send_to_client.clone(),
            )
            .instrument(info_span!("job", job_id = %job_id, kind = %kind)),
        );

        debug!(message = "Dispatched job", job_id = %job_id, kind = %kind);
        Ok(job_id)
    }
}

/// Feed requests from `recv_from_client` into `dispatcher` until cancelled or
/// the client side goes away. Each request is answered with `JobAccepted` or
/// `RequestRejected` on `send_to_client`.
pub async fn serve(
    cancel_token: CancellationToken,
    dispatcher: Dispatcher,
    mut recv_from_client: mpsc::UnboundedReceiver<JobRequest>,
    send_to_client: mpsc::UnboundedSender<WorkResponseMessage>,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Server Cancelled");
                break;
            },
            chan_msg = recv_from_client.recv() => {
                match chan_msg {
                    None => {
                        debug!("Client channel closed, no more requests");
                        break;
                    },
                    Some(job_request) => {
                        debug!(message = "Requested job", job_request = ?job_request);
                        let response = match dispatcher.submit(job_request).await {
                            Ok(job_id) => WorkResponseMessage::JobAccepted(job_id),
                            Err(err) => {
                                warn!(message = "Rejected job request", error = %err);
                                WorkResponseMessage::RequestRejected(err.to_string())
                            }
                        };
                        if let Err(err) = send_to_client.send(response) {
                            error!(message = "Failed to send response to client", error = ?err);
                            cancel_token.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }

    info!("Server stopped.");

    Ok(())
}
