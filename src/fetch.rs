//! HTTP downloads into the download root.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Downloads files with a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url` and stream the body into `dest_dir`.
    ///
    /// The file name comes from `custom_name`, the `Content-Disposition`
    /// header, the last segment of the final URL, or a generated
    /// `download_<uuid>`, in that order. Returns the path written. When the
    /// body fails part-way the partial file is left in place.
    #[instrument(skip(self, dest_dir), fields(dest = %dest_dir.display()))]
    pub async fn download(&self, url: &str, custom_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok());
        let file_name = resolve_file_name(custom_name, disposition, response.url());
        let path = dest_dir.join(&file_name);
        debug!(file_name = %file_name, "Resolved download name");

        let mut out = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| EngineError::FetchInterrupted {
                written,
                source: Box::new(err),
            })?;
            out.write_all(&chunk)
                .await
                .map_err(|err| EngineError::FetchInterrupted {
                    written,
                    source: Box::new(err),
                })?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        info!(bytes = written, path = %path.display(), "Download finished");
        Ok(path)
    }
}

/// Pick the output file name for a response. The result is always a bare
/// file name, so neither the caller nor the server can point the write
/// outside the destination directory.
pub fn resolve_file_name(
    custom_name: &str,
    content_disposition: Option<&str>,
    url: &Url,
) -> String {
    let candidate = if !custom_name.is_empty() {
        custom_name.to_string()
    } else {
        content_disposition
            .and_then(disposition_file_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| url_file_name(url))
    };

    match base_name(&candidate) {
        Some(name) => name,
        None => format!("download_{}", Uuid::new_v4()),
    }
}

/// Last component of a `/`- or `\`-separated name, ignoring trailing
/// separators. `None` when nothing usable is left.
fn base_name(name: &str) -> Option<String> {
    let trimmed = name.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match base {
        "" | "." | ".." => None,
        base => Some(base.to_string()),
    }
}

fn url_file_name(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    let segment = path.rsplit('/').next().unwrap_or("");
    percent_decode(segment)
}

/// Extract the file name parameter from a `Content-Disposition` value.
/// `filename*` (RFC 5987, `charset'lang'pct-encoded`) wins over `filename`.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        match key.as_str() {
            "filename" => plain = Some(unquote(raw)),
            "filename*" => {
                extended = raw
                    .splitn(3, '\'')
                    .nth(2)
                    .map(percent_decode);
            }
            _ => {}
        }
    }

    extended.or(plain)
}

/// Split on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            ch => out.push(ch),
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}
