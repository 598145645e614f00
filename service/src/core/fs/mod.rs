//! Filesystem utilities.
//!
//! Asset path resolution, output naming, and crash-tolerant writes for the
//! render manifests handed to the external renderer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Path Validation Utilities
// =============================================================================

/// Validates that an identifier component is safe to use in file paths.
///
/// Rejects empty strings, traversal sequences (`..`), path separators and
/// drive letter indicators, and control characters.
pub fn validate_path_id_component(id: &str, label: &str) -> Result<(), String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty or contains only whitespace"));
    }
    if trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(format!("Invalid {label}: contains path traversal characters"));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(format!("Invalid {label}: contains control characters"));
    }
    Ok(())
}

/// Validates a caller-supplied output file name.
///
/// The name must be a single path component; it is joined onto the output
/// directory by the orchestrator.
pub fn validate_output_name(name: &str) -> CoreResult<String> {
    validate_path_id_component(name, "outputName").map_err(CoreError::ValidationError)?;
    if name.len() > 255 {
        return Err(CoreError::ValidationError(
            "outputName is too long (max 255 chars)".to_string(),
        ));
    }
    Ok(name.trim().to_string())
}

// =============================================================================
// Asset Resolution
// =============================================================================

/// Resolves a possibly-relative asset path against a base directory.
///
/// Absolute paths are returned as-is.
pub fn resolve_asset_path(base_dir: &Path, raw: &str) -> PathBuf {
    let candidate = PathBuf::from(raw.trim());
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}

/// Checks whether a file exists without blocking the async runtime.
pub async fn file_exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Derives the public download locator for a rendered artifact.
pub fn download_locator(output_path: &Path) -> String {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("/download/{name}")
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Writes bytes to `path` by writing a sibling temp file and renaming it into place.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = sibling_with_suffix(path, "tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if cfg!(windows) && path.exists() {
        // rename does not overwrite on Windows
        let bak = sibling_with_suffix(path, "bak");
        let _ = std::fs::remove_file(&bak);
        std::fs::rename(path, &bak)?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::rename(&bak, path);
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CoreError::IoError(e));
        }
        let _ = std::fs::remove_file(&bak);
        return Ok(());
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        CoreError::IoError(e)
    })
}

/// Writes a value as pretty JSON atomically.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| suffix.to_string());
    path.with_file_name(format!("{file_name}.{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_path_id_component() {
        assert!(validate_path_id_component("video_01.mp4", "outputName").is_ok());
        assert!(validate_path_id_component("", "outputName").is_err());
        assert!(validate_path_id_component("../etc/passwd", "outputName").is_err());
        assert!(validate_path_id_component("a/b.mp4", "outputName").is_err());
        assert!(validate_path_id_component("C:video.mp4", "outputName").is_err());
        assert!(validate_path_id_component("bad\u{0}.mp4", "outputName").is_err());
    }

    #[test]
    fn test_validate_output_name_trims() {
        assert_eq!(validate_output_name(" clip.mp4 ").unwrap(), "clip.mp4");
        assert!(matches!(
            validate_output_name("nested/clip.mp4"),
            Err(CoreError::ValidationError(_))
        ));
    }

    #[test]
    fn test_resolve_asset_path() {
        let base = Path::new("/app/ai-assets");
        assert_eq!(
            resolve_asset_path(base, "x.png"),
            PathBuf::from("/app/ai-assets/x.png")
        );
        assert_eq!(
            resolve_asset_path(base, "/tmp/y.png"),
            PathBuf::from("/tmp/y.png")
        );
    }

    #[test]
    fn test_download_locator_uses_basename() {
        assert_eq!(
            download_locator(Path::new("/app/videos/template_abc.mp4")),
            "/download/template_abc.mp4"
        );
    }

    #[tokio::test]
    async fn test_file_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        assert!(!file_exists(&path).await);
        std::fs::write(&path, b"id3").unwrap();
        assert!(file_exists(&path).await);
        assert!(!file_exists(dir.path()).await);
    }

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("manifest.json");

        atomic_write_bytes(&path, b"one").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        atomic_write_json_pretty(&path, &serde_json::json!({"scenes": []})).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["scenes"], serde_json::json!([]));
        assert!(!path.with_file_name("manifest.json.tmp").exists());
    }
}
