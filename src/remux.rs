use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, instrument, warn};

use crate::error::{EngineError, Result};
use crate::sanitize::{clean_path, sanitize_path};

/// Repackages media into another container with `ffmpeg -c copy`; streams are
/// never re-encoded.
pub struct Remuxer {
    ffmpeg: PathBuf,
}

impl Remuxer {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Remux `relative_source` (under `root`) into `container`, writing the
    /// result next to the source. Returns the output path relative to `root`.
    #[instrument(skip(self, root))]
    pub async fn remux(
        &self,
        root: &Path,
        relative_source: &str,
        container: &str,
        custom_output: &str,
    ) -> Result<PathBuf> {
        let source = sanitize_path(root, relative_source)?;
        let file_name = output_name(&source, container, custom_output);
        let output = source.with_file_name(&file_name);
        debug!(output = %output.display(), "Starting stream copy");

        let result = tokio::process::Command::new(&self.ffmpeg)
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(&source)
            .arg("-c")
            .arg("copy")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                EngineError::Remux(format!("failed to run {}: {}", self.ffmpeg.display(), err))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let diagnostic = stderr.lines().last().unwrap_or("").trim();
            warn!(status = %result.status, stderr = %stderr, "ffmpeg failed");
            return Err(EngineError::Remux(format!("{} ({})", diagnostic, result.status)));
        }

        let relative = output
            .strip_prefix(clean_path(root))
            .map(Path::to_path_buf)
            .map_err(|_| EngineError::PathTraversal { path: output.clone() })?;
        Ok(relative)
    }
}

/// Output file name: `custom_output` with the container extension appended
/// when missing, or the source stem with the new extension. Only the last
/// path component of `custom_output` is used, so the output always lands in
/// the source's directory.
pub fn output_name(source: &Path, container: &str, custom_output: &str) -> String {
    let container = container.trim_start_matches('.');
    let ext = format!(".{}", container);

    let custom = custom_output
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    match custom {
        "" | "." | ".." => {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}{}", stem, ext)
        }
        name if name.ends_with(&ext) => name.to_string(),
        name => format!("{}{}", name, ext),
    }
}
