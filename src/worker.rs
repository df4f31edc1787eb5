use crate::error::{EngineError, Result};
use crate::extract::{destination_for, Extractor};
use crate::fetch::Fetcher;
use crate::package::package_as_zip;
use crate::registry::JobStore;
use crate::remux::Remuxer;
use crate::sanitize::{clean_path, sanitize_path};
use crate::server::WorkResponseMessage;
use crate::{DownloadRequest, ExtractRequest, JobRequest, RemuxRequest};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory every job reads from and writes into.
    pub root: PathBuf,
    /// Route prefix under which `root` is served, e.g. `/raw/`.
    pub public_prefix: String,
    pub ffmpeg: PathBuf,
    pub unrar: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            root: PathBuf::from("./downloads"),
            public_prefix: "/raw/".into(),
            ffmpeg: PathBuf::from("ffmpeg"),
            unrar: PathBuf::from("unrar"),
        }
    }
}

/// Everything a running job needs, shared read-only between jobs.
pub struct JobContext {
    root: PathBuf,
    public_prefix: String,
    fetcher: Fetcher,
    extractor: Extractor,
    remuxer: Remuxer,
}

impl JobContext {
    /// Makes the root absolute and creates it if needed.
    pub fn new(config: EngineConfig, fetcher: Fetcher) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let root = clean_path(&std::path::absolute(&config.root)?);

        Ok(JobContext {
            root,
            public_prefix: config.public_prefix,
            fetcher,
            extractor: Extractor::new(config.unrar),
            remuxer: Remuxer::new(config.ffmpeg),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public location of a root-relative path: the prefix plus the path with
    /// `/` separators.
    pub fn public_url(&self, relative: &Path) -> String {
        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        format!("{}/{}", self.public_prefix.trim_end_matches('/'), parts.join("/"))
    }

    fn relative_to_root(&self, path: &Path) -> Result<PathBuf> {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| EngineError::PathTraversal {
                path: path.to_path_buf(),
            })
    }
}

/// Runs one job to a terminal state. Every error ends up in the record as a
/// failed status; nothing is returned to the submitter.
pub async fn start(
    store: JobStore,
    ctx: std::sync::Arc<JobContext>,
    job_id: Uuid,
    request: JobRequest,
    send_to_client: Option<UnboundedSender<WorkResponseMessage>>,
) {
    store.begin_job(job_id, "Starting...").await;

    let message = match process(&store, &ctx, job_id, request).await {
        Ok(relative) => {
            let url = ctx.public_url(&relative);
            info!(result = %url, "Job completed");
            store.complete_job(job_id, url).await;
            WorkResponseMessage::JobCompleted(job_id)
        }
        Err(err) => {
            let msg = err.to_string();
            warn!(error = %msg, "Job failed");
            store.fail_job(job_id, &msg).await;
            WorkResponseMessage::JobFailed(job_id, msg)
        }
    };

    if let Some(sender) = send_to_client {
        if let Err(err) = sender.send(message) {
            debug!(message = "Nobody listening for job results", error = ?err);
        }
    }
}

/// Performs the job and returns the produced artifact relative to the root.
async fn process(
    store: &JobStore,
    ctx: &JobContext,
    job_id: Uuid,
    request: JobRequest,
) -> Result<PathBuf> {
    match request {
        JobRequest::Download(req) => download(store, ctx, job_id, req).await,
        JobRequest::Remux(req) => remux(store, ctx, job_id, req).await,
        JobRequest::Extract(req) => extract(store, ctx, job_id, req).await,
    }
}

async fn download(
    store: &JobStore,
    ctx: &JobContext,
    job_id: Uuid,
    req: DownloadRequest,
) -> Result<PathBuf> {
    store.set_details(job_id, "Downloading...").await;
    let path = ctx.fetcher.download(req.url.trim(), &req.custom_name, &ctx.root).await?;

    if req.auto_zip {
        store.set_details(job_id, "Zipping...").await;
        match package_as_zip(&path, &ctx.root).await {
            Ok(zip_path) => return ctx.relative_to_root(&zip_path),
            Err(err) => warn!(error = %err, "Packaging failed, keeping the plain download"),
        }
    }
    ctx.relative_to_root(&path)
}

async fn remux(
    store: &JobStore,
    ctx: &JobContext,
    job_id: Uuid,
    req: RemuxRequest,
) -> Result<PathBuf> {
    store.set_details(job_id, "Remuxing...").await;
    ctx.remuxer
        .remux(&ctx.root, &req.filename, &req.container, &req.custom_out)
        .await
}

async fn extract(
    store: &JobStore,
    ctx: &JobContext,
    job_id: Uuid,
    req: ExtractRequest,
) -> Result<PathBuf> {
    let source = sanitize_path(&ctx.root, &req.filename)?;
    let dest = destination_for(&source);
    store.set_details(job_id, "Extracting...").await;

    ctx.extractor.extract(&source, &dest).await?;
    ctx.relative_to_root(&dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(root: &Path) -> JobContext {
        let config = EngineConfig {
            root: root.to_path_buf(),
            ..EngineConfig::default()
        };
        JobContext::new(config, Fetcher::default()).unwrap()
    }

    #[test]
    fn public_url_joins_with_forward_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        assert_eq!(ctx.public_url(Path::new("a.zip")), "/raw/a.zip");
        assert_eq!(ctx.public_url(Path::new("360p/v.mp4")), "/raw/360p/v.mp4");
    }

    #[test]
    fn context_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested/downloads");
        let ctx = context(&root);
        assert!(root.is_dir());
        assert!(ctx.root().is_absolute());
    }
}
