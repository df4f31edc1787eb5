use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod browse;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod package;
pub mod registry;
pub mod remux;
pub mod sanitize;
pub mod server;
pub mod telemetry;
pub mod worker;

pub use error::EngineError;
pub use registry::JobStore;
pub use server::Dispatcher;
pub use worker::{EngineConfig, JobContext};

/// A job submission, one shape per job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobRequest {
    Download(DownloadRequest),
    Remux(RemuxRequest),
    Extract(ExtractRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub auto_zip: bool,
}

/// `filename` is relative to the download root, e.g. `360p/video.mp4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemuxRequest {
    pub filename: String,
    pub container: String,
    #[serde(default)]
    pub custom_out: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub filename: String,
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Download(_) => JobKind::Download,
            JobRequest::Remux(_) => JobKind::Remux,
            JobRequest::Extract(_) => JobKind::Extract,
        }
    }

    /// Checks the payload before anything is recorded, so a malformed request
    /// is rejected to the caller instead of failing inside a running job.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            JobRequest::Download(req) => {
                let url = reqwest::Url::parse(req.url.trim()).map_err(|err| {
                    EngineError::InvalidRequest(format!("invalid url '{}': {}", req.url, err))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(EngineError::InvalidRequest(format!(
                        "unsupported url scheme: {}",
                        url.scheme()
                    )));
                }
            }
            JobRequest::Remux(req) => {
                require_filename(&req.filename)?;
                let container = req.container.trim_start_matches('.');
                if container.is_empty() || !container.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(EngineError::InvalidRequest(format!(
                        "invalid container: '{}'",
                        req.container
                    )));
                }
            }
            JobRequest::Extract(req) => require_filename(&req.filename)?,
        }
        Ok(())
    }
}

fn require_filename(filename: &str) -> Result<(), EngineError> {
    if filename.trim().is_empty() {
        return Err(EngineError::InvalidRequest("filename required".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Download,
    Remux,
    Extract,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobKind::Download => "download",
            JobKind::Remux => "remux",
            JobKind::Extract => "extract",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    /// Transitions only move forward: pending, processing, then one terminal
    /// state. Repeated `processing` updates carry progress details.
    pub fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Status::Pending, Status::Processing) => true,
            (Status::Processing, Status::Processing) => true,
            (Status::Pending | Status::Processing, Status::Completed | Status::Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: Status,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            kind,
            status: Status::Pending,
            details: String::new(),
            result_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_tagged_json() {
        let json = r#"{"type":"download","url":"https://example.com/a.mp4"}"#;
        let req: JobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            JobRequest::Download(DownloadRequest {
                url: "https://example.com/a.mp4".into(),
                custom_name: String::new(),
                auto_zip: false,
            })
        );

        let json = r#"{"type":"remux","filename":"360p/v.mkv","container":"mp4"}"#;
        let req: JobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.kind(), JobKind::Remux);
    }

    #[test]
    fn request_validation() {
        let bad_url = JobRequest::Download(DownloadRequest {
            url: "not a url".into(),
            custom_name: String::new(),
            auto_zip: false,
        });
        assert!(matches!(bad_url.validate(), Err(EngineError::InvalidRequest(_))));

        let ftp = JobRequest::Download(DownloadRequest {
            url: "ftp://example.com/file".into(),
            custom_name: String::new(),
            auto_zip: false,
        });
        assert!(ftp.validate().is_err());

        let no_file = JobRequest::Extract(ExtractRequest { filename: "  ".into() });
        assert!(no_file.validate().is_err());

        let bad_container = JobRequest::Remux(RemuxRequest {
            filename: "a.mkv".into(),
            container: "mp4/../x".into(),
            custom_out: String::new(),
        });
        assert!(bad_container.validate().is_err());

        let ok = JobRequest::Remux(RemuxRequest {
            filename: "a.mkv".into(),
            container: ".mp4".into(),
            custom_out: String::new(),
        });
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(Status::Pending.can_transition_to(Status::Processing));
        assert!(Status::Processing.can_transition_to(Status::Processing));
        assert!(Status::Processing.can_transition_to(Status::Completed));
        assert!(Status::Processing.can_transition_to(Status::Failed));
        assert!(!Status::Processing.can_transition_to(Status::Pending));
        assert!(!Status::Completed.can_transition_to(Status::Failed));
        assert!(!Status::Failed.can_transition_to(Status::Processing));
    }

    #[test]
    fn job_json_omits_missing_result() {
        let job = Job::new(JobKind::Extract);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "extract");
        assert_eq!(value["status"], "pending");
        assert!(value.get("result_url").is_none());
    }
}
