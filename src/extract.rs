//! Archive extraction, selected purely by the source file name.
//!
//! Zip and gzip-tar archives are read in-process and every entry name goes
//! through [`sanitize_path`] before anything touches the disk. Rar archives
//! are handed to an external `unrar`, which does its own path handling.
//!
//! Extraction is not transactional: entries written before a failure stay
//! on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::error::{EngineError, Result};
use crate::sanitize::{is_root_relative, sanitize_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Rar,
}

impl ArchiveFormat {
    /// Classify a file by its extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") {
            return Ok(ArchiveFormat::TarGz);
        }
        match extension(path).as_str() {
            ".zip" => Ok(ArchiveFormat::Zip),
            ".gz" | ".tgz" => Ok(ArchiveFormat::TarGz),
            ".rar" => Ok(ArchiveFormat::Rar),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Lowercased extension including the dot, or an empty string.
fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// The folder an archive is unpacked into: the source path with its archive
/// extension removed, so `movie.tar.gz` becomes `movie` next to the archive.
pub fn destination_for(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = name.as_bytes();
    let suffix = b".tar.gz";

    let stem_len = if bytes.len() > suffix.len()
        && bytes[bytes.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        name.len() - suffix.len()
    } else {
        match name.rfind('.') {
            Some(0) | None => name.len(),
            Some(idx) => idx,
        }
    };
    source.with_file_name(&name[..stem_len])
}

pub struct Extractor {
    unrar: PathBuf,
}

impl Extractor {
    pub fn new(unrar: impl Into<PathBuf>) -> Self {
        Self {
            unrar: unrar.into(),
        }
    }

    /// Unpack `source` into `dest`, creating `dest` first.
    #[instrument(skip(self), fields(source = %source.display(), dest = %dest.display()))]
    pub async fn extract(&self, source: &Path, dest: &Path) -> Result<()> {
        let format = ArchiveFormat::from_path(source)?;
        debug!(?format, "Extracting archive");

        tokio::fs::create_dir_all(dest).await?;

        match format {
            ArchiveFormat::Zip | ArchiveFormat::TarGz => {
                let source = source.to_path_buf();
                let dest = dest.to_path_buf();
                tokio::task::spawn_blocking(move || match format {
                    ArchiveFormat::Zip => unzip(&source, &dest),
                    _ => untar_gz(&source, &dest),
                })
                .await
                .map_err(|err| EngineError::Extraction(err.to_string()))?
            }
            ArchiveFormat::Rar => self.unrar(source, dest).await,
        }
    }

    async fn unrar(&self, source: &Path, dest: &Path) -> Result<()> {
        // Trailing separator makes unrar treat `dest` as the target folder.
        let mut target = dest.as_os_str().to_os_string();
        target.push(std::path::MAIN_SEPARATOR_STR);

        let status = tokio::process::Command::new(&self.unrar)
            .arg("x")
            .arg("-y")
            .arg(source)
            .arg(&target)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|err| {
                EngineError::Extraction(format!("failed to run {}: {}", self.unrar.display(), err))
            })?;

        if !status.success() {
            return Err(EngineError::Extraction(format!("unrar exited with {}", status)));
        }
        Ok(())
    }
}

/// Extract a zip archive, keeping each entry's permission bits.
pub fn unzip(source: &Path, dest: &Path) -> Result<()> {
    let file = File::open(source)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if entry.is_dir() && is_root_relative(Path::new(&name)) {
            continue;
        }
        let target = sanitize_path(dest, &name)?;

        if entry.is_dir() {
            trace!(entry = %name, "Creating directory");
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        trace!(entry = %name, "Writing file");
        let mut out = create_with_mode(&target, entry.unix_mode())?;
        copy_entry(&mut entry, &mut out, Path::new(&name))?;
    }
    Ok(())
}

/// Extract a gzip-compressed tarball. Only directories and regular files are
/// materialized; links, devices and the rest are skipped.
pub fn untar_gz(source: &Path, dest: &Path) -> Result<()> {
    let file = File::open(source)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|err| EngineError::Extraction(err.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|err| EngineError::Extraction(err.to_string()))?;
        let name = entry
            .path()
            .map_err(|err| EngineError::Extraction(err.to_string()))?
            .into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() && is_root_relative(&name) {
            continue;
        }
        let target = sanitize_path(dest, &name)?;

        if entry_type.is_dir() {
            trace!(entry = %name.display(), "Creating directory");
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            trace!(entry = %name.display(), "Writing file");
            let mut out = File::create(&target)?;
            copy_entry(&mut entry, &mut out, &name)?;
        } else {
            trace!(entry = %name.display(), ?entry_type, "Skipping entry");
        }
    }
    Ok(())
}

fn copy_entry<R: Read>(entry: &mut R, out: &mut File, name: &Path) -> Result<()> {
    io::copy(entry, out)
        .map(|_| ())
        .map_err(|err| EngineError::Extraction(format!("{}: {}", name.display(), err)))
}

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: Option<u32>) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if let Some(mode) = mode {
        options.mode(mode & 0o7777);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: Option<u32>) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
