//! Listing and deleting files under the download root.
//!
//! Nothing here coordinates with running jobs: listing or deleting a folder
//! that a job is still writing into is a race the caller has to live with.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::sanitize::{clean_path, resolve_within, sanitize_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Root-relative path, `/`-separated.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub files: Vec<FileEntry>,
    pub current: String,
}

/// List `dir` (relative to `root`, empty for the root itself). Non-root
/// listings start with a `..` entry that points at the parent.
pub async fn list_dir(root: &Path, dir: &str) -> Result<Listing> {
    let target = resolve_within(root, dir)?;
    let current = target
        .strip_prefix(clean_path(root))
        .map(slash_path)
        .unwrap_or_default();

    let mut files = Vec::new();
    if !current.is_empty() {
        let parent = current.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        files.push(FileEntry {
            name: "..".into(),
            size: None,
            entry_type: EntryType::Dir,
            path: parent.to_string(),
        });
    }

    let mut entries = tokio::fs::read_dir(&target).await?;
    let mut listed = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = if current.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", current, name)
        };
        listed.push(FileEntry {
            name,
            size: Some(metadata.len()),
            entry_type: if metadata.is_dir() { EntryType::Dir } else { EntryType::File },
            path,
        });
    }
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    files.extend(listed);

    Ok(Listing { files, current })
}

/// Recursively delete a file or folder below `root`. The root itself can not
/// be removed.
pub async fn remove(root: &Path, path: &str) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(EngineError::InvalidRequest("path required".into()));
    }
    let target = sanitize_path(root, path)?;

    let metadata = tokio::fs::symlink_metadata(&target).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&target).await?;
    } else {
        tokio::fs::remove_file(&target).await?;
    }
    info!(path = %target.display(), "Deleted");
    Ok(target)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
