use std::path::Path;

use tokio::fs;
use tracing::{debug, info, warn};

use super::{Acquisition, OriginKind, SourceDescriptor};
use crate::decode::FileFormat;
use crate::types::{AppError, AppResult, Notice};

/// Scan a directory for supported tabular files.
///
/// Entries are visited in file-name order. A missing path or a non-directory is
/// an error; an empty scan is not, it only carries a warning notice.
pub async fn scan_folder(path: &Path) -> AppResult<Acquisition> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|_| AppError::InvalidPath(path.display().to_string()))?;
    if !metadata.is_dir() {
        return Err(AppError::InvalidPath(path.display().to_string()));
    }

    let mut entries = fs::read_dir(path).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if FileFormat::from_name(&file_name).is_none() {
            debug!(file = %file_name, "Skipping unsupported file");
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        matches.push((file_name, entry.path()));
    }
    matches.sort();

    let mut acquisition = Acquisition::default();
    if matches.is_empty() {
        warn!(path = %path.display(), "No supported files found in folder");
        acquisition
            .notices
            .push(Notice::warning("No supported files found in the specified folder."));
        return Ok(acquisition);
    }

    for (file_name, file_path) in matches {
        match fs::read(&file_path).await {
            Ok(content) => {
                acquisition
                    .descriptors
                    .push(SourceDescriptor::new(OriginKind::Folder, file_name, content));
            }
            Err(e) => {
                warn!(file = %file_path.display(), error = %e, "Failed to read file");
                acquisition.notices.push(Notice::from(&AppError::Acquisition(format!(
                    "{}: {}",
                    file_name, e
                ))));
            }
        }
    }

    info!(
        path = %path.display(),
        files = acquisition.descriptors.len(),
        "Folder scan complete"
    );
    Ok(acquisition)
}
