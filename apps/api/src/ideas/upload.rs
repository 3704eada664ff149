//! Attachment validation and storage.
//!
//! The MIME type is decided by inspecting file content, never the client
//! filename, and the stored name is a random UUID — the user-supplied
//! filename never touches the filesystem.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Web-relative path recorded on the idea row.
    pub path: String,
    /// Filesystem location, kept so a failed admission can remove the file.
    pub disk_path: PathBuf,
    pub mime: &'static str,
    pub size: i64,
}

/// Magic-byte sniffing for the attachment allow-list. NUL-free valid UTF-8
/// that matches no binary signature is treated as plain text (markdown).
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return Some("image/png");
    }
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("image/jpeg");
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if !data.is_empty() && !data.contains(&0) && std::str::from_utf8(data).is_ok() {
        return Some("text/plain");
    }
    None
}

/// File extension for a sniffed MIME type. Plain text is stored as markdown.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "text/markdown" | "text/plain" => "md",
        _ => "bin",
    }
}

/// Validates size and type, then writes the file under a random name inside
/// `upload_dir`. Rejections are validation errors; I/O failures are generic.
pub async fn store_attachment(upload_dir: &str, data: &[u8]) -> Result<StoredFile, AppError> {
    if data.len() > MAX_ATTACHMENT_BYTES {
        return Err(AppError::Validation("File too large".to_string()));
    }
    let mime = sniff_mime(data).ok_or_else(|| AppError::Validation("Invalid file type".to_string()))?;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::Upload(format!("create {upload_dir}: {e}")))?;

    let basename = format!("{}.{}", Uuid::new_v4().simple(), extension_for(mime));
    let dest = Path::new(upload_dir).join(&basename);
    tokio::fs::write(&dest, data)
        .await
        .map_err(|e| AppError::Upload(format!("write {}: {e}", dest.display())))?;

    let dir_name = Path::new(upload_dir)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("uploads");
    Ok(StoredFile {
        path: format!("{dir_name}/{basename}"),
        disk_path: dest,
        mime,
        size: data.len() as i64,
    })
}

/// Removes a stored attachment whose idea never made it into the database.
/// Best effort: a leftover file is logged, not fatal.
pub async fn discard(file: &StoredFile) {
    if let Err(e) = tokio::fs::remove_file(&file.disk_path).await {
        warn!("Failed to remove orphaned upload {}: {e}", file.disk_path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(sniff_mime(b"%PDF-1.7 rest"), Some("application/pdf"));
    }

    #[test]
    fn test_sniff_png() {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_mime(&data), Some("image/png"));
    }

    #[test]
    fn test_sniff_jpeg() {
        assert_eq!(sniff_mime(&[0xff, 0xd8, 0xff, 0xe0, 0x00]), Some("image/jpeg"));
    }

    #[test]
    fn test_sniff_webp() {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(b"WEBP");
        assert_eq!(sniff_mime(&data), Some("image/webp"));
    }

    #[test]
    fn test_sniff_gif() {
        assert_eq!(sniff_mime(b"GIF89a......"), Some("image/gif"));
        assert_eq!(sniff_mime(b"GIF87a......"), Some("image/gif"));
    }

    #[test]
    fn test_sniff_text() {
        assert_eq!(sniff_mime(b"# My idea\n\nsome markdown"), Some("text/plain"));
    }

    #[test]
    fn test_sniff_rejects_binary_garbage() {
        assert_eq!(sniff_mime(&[0x00, 0x01, 0x02, 0x03]), None);
        assert_eq!(sniff_mime(b"MZ\x00\x00executable"), None);
    }

    #[test]
    fn test_sniff_rejects_empty() {
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn test_sniff_ignores_extension_semantics() {
        // Content wins: a "renamed" executable is still rejected.
        assert_eq!(sniff_mime(&[0x7f, b'E', b'L', b'F', 0x02]), None);
    }

    #[test]
    fn test_extension_map() {
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(extension_for("text/plain"), "md");
        assert_eq!(extension_for("application/zip"), "bin");
    }

    #[tokio::test]
    async fn test_store_rejects_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'a'; MAX_ATTACHMENT_BYTES + 1];
        let err = store_attachment(dir.path().to_str().unwrap(), &data)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_writes_random_name() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        let a = store_attachment(dir_str, b"%PDF-1.4 one").await.unwrap();
        let b = store_attachment(dir_str, b"%PDF-1.4 two").await.unwrap();
        assert_ne!(a.path, b.path);
        assert!(a.path.ends_with(".pdf"));
        assert_eq!(a.mime, "application/pdf");
        assert_eq!(a.size, 12);
    }

    #[tokio::test]
    async fn test_discard_removes_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let stored = store_attachment(dir.path().to_str().unwrap(), b"%PDF-1.4 doc")
            .await
            .unwrap();
        assert!(stored.disk_path.exists());
        discard(&stored).await;
        assert!(!stored.disk_path.exists());
    }

    #[tokio::test]
    async fn test_store_rejects_disallowed_type() {
        let dir = tempfile::tempdir().unwrap();
        let err = store_attachment(dir.path().to_str().unwrap(), &[0u8, 1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
