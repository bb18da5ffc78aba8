use crate::error::{AppError, AppResult};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Write file content atomically: write a sibling temp file, then rename over the target.
///
/// A reader never observes a half-written file, and a crash leaves either the old
/// or the new content in place.
pub async fn save_file<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> AppResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
            debug!(parent = %parent.display(), "Ensured parent directory");
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::BadRequest(format!("Not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let content = content.as_ref();
    fs::write(&tmp_path, content).await?;
    fs::rename(&tmp_path, path).await?;
    debug!(
        path = %path.display(),
        size = content.len(),
        "File saved"
    );
    Ok(())
}

/// Read file content, mapping a missing file to `NotFound`.
pub async fn read_file<P: AsRef<Path>>(path: P) -> AppResult<Vec<u8>> {
    let path = path.as_ref();
    match fs::read(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "File not found");
            Err(AppError::NotFound(format!(
                "File not found: {}",
                path.display()
            )))
        }
        Err(e) => Err(e.into()),
    }
}
