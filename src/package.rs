use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Wrap a single file into `<stem>_<8 hex>.zip` inside `dest_dir`. The
/// archive holds one entry named after the source file.
pub async fn package_as_zip(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let source = source.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || write_single_entry_zip(&source, &dest_dir))
        .await
        .map_err(|err| EngineError::Io(io::Error::other(err)))?
}

fn write_single_entry_zip(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            EngineError::InvalidRequest(format!("no file name in {}", source.display()))
        })?;
    let stem = Path::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.clone());

    let suffix = Uuid::new_v4().simple().to_string();
    let zip_path = dest_dir.join(format!("{}_{}.zip", stem, &suffix[..8]));

    let mut input = File::open(source)?;
    let out = BufWriter::new(File::create(&zip_path)?);
    let mut writer = zip::ZipWriter::new(out);

    writer.start_file(file_name.as_str(), zip::write::SimpleFileOptions::default())?;
    io::copy(&mut input, &mut writer)?;
    writer.finish()?;

    debug!(zip = %zip_path.display(), "Packaged file");
    Ok(zip_path)
}
