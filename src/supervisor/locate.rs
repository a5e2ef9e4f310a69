//! Worker executable discovery and kill-by-name fallback.

use super::SupervisorError;
use std::path::{Path, PathBuf};
use std::time::Duration;

const KILL_BY_NAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered list of places the worker executable may live.
///
/// 1. `<resource_dir>/bin/<image>` (packaged layout)
/// 2. `<dir>/<image>` for each configured development directory
/// 3. `PATH` lookup via [`which::which`]
pub fn candidate_paths(resource_dir: &Path, candidate_dirs: &[PathBuf], image: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(candidate_dirs.len() + 2);
    candidates.push(resource_dir.join("bin").join(image));
    candidates.extend(candidate_dirs.iter().map(|dir| dir.join(image)));
    if let Ok(found) = which::which(image) {
        candidates.push(found);
    }
    candidates
}

/// First candidate that exists as a file.
///
/// # Errors
///
/// Returns [`SupervisorError::NotFound`] listing every location searched.
pub fn locate_worker(
    resource_dir: &Path,
    candidate_dirs: &[PathBuf],
    image: &str,
) -> Result<PathBuf, SupervisorError> {
    let candidates = candidate_paths(resource_dir, candidate_dirs, image);
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    Err(SupervisorError::NotFound {
        image: image.to_owned(),
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Kill every process whose image name is `image`. Best effort, bounded.
pub async fn kill_by_image_name(image: &str) {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("taskkill");
        cmd.args(["/IM", image, "/T", "/F"]);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("pkill");
        cmd.args(["-x", image]);
        cmd
    };
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(KILL_BY_NAME_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) if status.success() => {
            tracing::info!(image, "killed worker by image name");
        }
        Ok(Ok(status)) => {
            tracing::warn!(image, code = ?status.code(), "kill by image name found nothing to kill");
        }
        Ok(Err(e)) => tracing::warn!(image, error = %e, "failed to run kill by image name"),
        Err(_) => tracing::warn!(image, "kill by image name timed out"),
    }
}
