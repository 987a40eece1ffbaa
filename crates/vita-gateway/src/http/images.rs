//! Image proxy with path containment and an extension allow-list.

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::app::AppState;
use crate::http::ApiError;

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// GET /api/feed/image/{path} — serve a stored upload.
pub async fn image_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let root = state.images.upload_root().to_path_buf();
    let full = resolve_upload_path(&root, &path)?;

    let bytes = tokio::fs::read(&full)
        .await
        .map_err(|_| ApiError::not_found("image not found"))?;

    let content_type = match full
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// Normalize a requested relative path and verify it stays inside the upload
/// root: no absolute paths, no `..` components, no symlink escapes, and only
/// allow-listed extensions.
pub fn resolve_upload_path(root: &FsPath, requested: &str) -> Result<PathBuf, ApiError> {
    let rel = FsPath::new(requested);
    if rel.is_absolute() {
        return Err(ApiError::bad_request("absolute paths are not allowed"));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(ApiError::bad_request("path traversal is not allowed")),
        }
    }

    let extension = rel
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::bad_request("file type is not allowed"));
    }

    let joined = root.join(rel);
    // Canonicalize both sides so a symlink inside the tree cannot point out.
    let canonical_root = root
        .canonicalize()
        .map_err(|_| ApiError::not_found("upload root missing"))?;
    let canonical = joined
        .canonicalize()
        .map_err(|_| ApiError::not_found("image not found"))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(ApiError::bad_request("path escapes the upload root"));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("2026/02");
        std::fs::create_dir_all(&sub).unwrap();
        let file = sub.join("food_20260205_100000_abcd1234.jpg");
        std::fs::write(&file, b"jpeg bytes").unwrap();
        (dir, file)
    }

    #[test]
    fn valid_path_resolves() {
        let (dir, file) = setup();
        let resolved =
            resolve_upload_path(dir.path(), "2026/02/food_20260205_100000_abcd1234.jpg").unwrap();
        assert_eq!(resolved, file.canonicalize().unwrap());
    }

    #[test]
    fn traversal_is_rejected() {
        let (dir, _) = setup();
        assert!(resolve_upload_path(dir.path(), "../secrets.jpg").is_err());
        assert!(resolve_upload_path(dir.path(), "2026/../../x.jpg").is_err());
        assert!(resolve_upload_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn extension_allow_list() {
        let (dir, _) = setup();
        assert!(resolve_upload_path(dir.path(), "2026/02/file.exe").is_err());
        assert!(resolve_upload_path(dir.path(), "2026/02/file").is_err());
        // Allowed extension but missing file → not found, not a policy error.
        let err = resolve_upload_path(dir.path(), "2026/02/missing.png").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let (dir, _) = setup();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.jpg");
        std::fs::write(&secret, b"secret").unwrap();
        std::os::unix::fs::symlink(&secret, dir.path().join("2026/02/link.jpg")).unwrap();

        assert!(resolve_upload_path(dir.path(), "2026/02/link.jpg").is_err());
    }
}
