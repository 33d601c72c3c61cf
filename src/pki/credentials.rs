use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{GatewayError, Result};

/// Read a PEM credential from `path`.
///
/// A file path is read directly. A directory must contain exactly one
/// regular, non-hidden file (the layout of Fabric `signcerts`/`keystore`
/// folders); an empty directory or one with several candidates is rejected
/// rather than picking an arbitrary entry.
pub async fn read_credential<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| read_error(path, e.to_string()))?;

    if metadata.is_file() {
        return read_file(path).await;
    }

    let file = single_file_in(path).await?;
    debug!("Reading credential {}", file.display());
    read_file(&file).await
}

/// Read a single credential file
pub async fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    tokio::fs::read(path)
        .await
        .map_err(|e| read_error(path, e.to_string()))
}

async fn single_file_in(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| read_error(dir, e.to_string()))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| read_error(dir, e.to_string()))?
    {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        // Follows symlinks, as mounted Kubernetes secrets are links to files.
        let path = entry.path();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| read_error(&path, e.to_string()))?;

        if metadata.is_file() {
            candidates.push(path);
        }
    }

    match candidates.len() {
        0 => Err(read_error(dir, "directory contains no credential file".into())),
        1 => Ok(candidates.remove(0)),
        n => {
            candidates.sort();
            let names: Vec<String> = candidates
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            Err(read_error(
                dir,
                format!(
                    "expected exactly one credential file, found {}: {}",
                    n,
                    names.join(", ")
                ),
            ))
        }
    }
}

fn read_error(path: &Path, reason: String) -> GatewayError {
    GatewayError::CredentialRead {
        path: path.to_path_buf(),
        reason,
    }
}
