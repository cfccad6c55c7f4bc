//! Model artifact downloader.
//!
//! Downloads artifact files into the model directory if not present
//! locally, reporting byte progress as each chunk arrives.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};

use super::backend::DownloadProgress;

/// A file the model needs, and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name inside the model directory.
    pub file_name: String,
    /// Source URL.
    pub url: String,
    /// Whether a failed download fails the load.
    pub required: bool,
}

impl Artifact {
    pub fn required(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
            required: true,
        }
    }

    pub fn optional(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(file_name, url)
        }
    }
}

/// Builds artifact entries for `files` under `base_url`.
pub fn artifacts_from_base_url(base_url: &str, files: &[(&str, bool)]) -> Vec<Artifact> {
    let base = base_url.trim_end_matches('/');
    files
        .iter()
        .map(|(name, required)| Artifact {
            file_name: (*name).to_string(),
            url: format!("{}/{}", base, name),
            required: *required,
        })
        .collect()
}

/// Returns the artifacts that are not yet in `model_dir`.
pub fn missing_artifacts<'a>(model_dir: &Path, artifacts: &'a [Artifact]) -> Vec<&'a Artifact> {
    artifacts
        .iter()
        .filter(|a| !model_dir.join(&a.file_name).exists())
        .collect()
}

/// Downloads all missing artifacts.
///
/// Returns Ok(()) if all required files exist or were successfully
/// downloaded. Optional artifacts that fail are logged and skipped.
pub fn ensure_artifacts(
    model_dir: &Path,
    artifacts: &[Artifact],
    on_progress: &dyn Fn(DownloadProgress),
) -> Result<()> {
    let missing = missing_artifacts(model_dir, artifacts);
    if missing.is_empty() {
        debug!(dir = %model_dir.display(), "all model artifacts present");
        return Ok(());
    }

    fs::create_dir_all(model_dir).map_err(|e| {
        DaemonError::ModelDownload(format!(
            "Failed to create model directory {}: {}",
            model_dir.display(),
            e
        ))
    })?;

    info!(count = missing.len(), "downloading missing model artifacts");

    for artifact in missing {
        let dest = model_dir.join(&artifact.file_name);
        match download_file_streaming(&artifact.url, &dest, &artifact.file_name, on_progress) {
            Ok(bytes) => info!(file = %artifact.file_name, bytes, "artifact downloaded"),
            Err(e) if !artifact.required => {
                warn!(file = %artifact.file_name, error = %e, "optional artifact skipped")
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Downloads a file using streaming to handle large files.
///
/// Data goes to `<dest>.part` first and is renamed once complete. Any
/// failure after the part file exists removes it again.
fn download_file_streaming(
    url: &str,
    dest: &Path,
    label: &str,
    on_progress: &dyn Fn(DownloadProgress),
) -> Result<u64> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(3600))
        .build()
        .map_err(|e| {
            DaemonError::ModelDownload(format!("Failed to create HTTP client: {}", e))
        })?;

    let mut response = client.get(url).send().map_err(|e| {
        DaemonError::ModelDownload(format!("Failed to download {}: {}", url, e))
    })?;

    if !response.status().is_success() {
        return Err(DaemonError::ModelDownload(format!(
            "HTTP {} for {}",
            response.status(),
            url
        )));
    }

    let total_bytes = response.content_length().filter(|len| *len > 0);

    let mut part_name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    part_name.push(".part");
    let part_path = dest.with_file_name(part_name);
    let file = fs::File::create(&part_path).map_err(|e| {
        DaemonError::ModelDownload(format!(
            "Failed to create file {}: {}",
            part_path.display(),
            e
        ))
    })?;

    let outcome = copy_body(&mut response, file, total_bytes, label, on_progress).and_then(|downloaded| {
        fs::rename(&part_path, dest).map_err(|e| {
            DaemonError::ModelDownload(format!(
                "Failed to move {} into place: {}",
                part_path.display(),
                e
            ))
        })?;
        Ok(downloaded)
    });

    if outcome.is_err() {
        if let Err(e) = fs::remove_file(&part_path) {
            debug!(path = %part_path.display(), error = %e, "partial download not removed");
        }
    }
    outcome
}

/// Streams the response body into `file`. Fails on a body shorter than
/// the advertised length. The file is closed on return.
fn copy_body(
    response: &mut impl Read,
    mut file: fs::File,
    total_bytes: Option<u64>,
    label: &str,
    on_progress: &dyn Fn(DownloadProgress),
) -> Result<u64> {
    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = response.read(&mut buffer).map_err(|e| {
            DaemonError::ModelDownload(format!("Failed to read response: {}", e))
        })?;

        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).map_err(|e| {
            DaemonError::ModelDownload(format!("Failed to write file: {}", e))
        })?;

        downloaded += bytes_read as u64;
        on_progress(DownloadProgress {
            loaded_bytes: downloaded,
            total_bytes,
            file_label: label.to_string(),
        });
    }

    match total_bytes {
        Some(total) if downloaded < total => Err(DaemonError::ModelDownload(format!(
            "{} truncated: {} of {} bytes",
            label, downloaded, total
        ))),
        _ => Ok(downloaded),
    }
}
