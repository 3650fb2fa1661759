//! Page images for transcription
//!
//! Rendering the tablet's stroke format is someone else's job. We only read
//! images that a renderer already wrote, one directory per document:
//! `<images_dir>/<document id>/<page>.png` (a `page_` or `page-` prefix on the
//! file name is accepted).

use super::types::{PageId, PageImage};
use crate::error::TranscribeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Produces page images for a document
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Page indices available for a document, ascending
    async fn pages(&self, document_id: &str) -> Result<Vec<u32>, TranscribeError>;

    async fn render(&self, document_id: &str, page: u32) -> Result<PageImage, TranscribeError>;

    /// Every page of a document
    async fn render_document(&self, document_id: &str) -> Result<Vec<PageImage>, TranscribeError> {
        let mut images = Vec::new();
        for page in self.pages(document_id).await? {
            images.push(self.render(document_id, page).await?);
        }
        Ok(images)
    }
}

/// Reads pre-rendered images from disk
pub struct RenderedImageDir {
    root: PathBuf,
}

impl RenderedImageDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// (page, path) pairs for a document's image files
    async fn page_files(&self, document_id: &str) -> Result<Vec<(u32, PathBuf)>, TranscribeError> {
        let dir = self.root.join(document_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = mime_guess::from_path(&path)
                .first_raw()
                .map_or(false, |m| m.starts_with("image/"));
            if !is_image {
                continue;
            }
            if let Some(page) = page_number(&path) {
                pages.push((page, path));
            }
        }
        pages.sort();
        Ok(pages)
    }
}

fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem
        .strip_prefix("page_")
        .or_else(|| stem.strip_prefix("page-"))
        .unwrap_or(stem);
    digits.parse().ok()
}

#[async_trait]
impl PageRenderer for RenderedImageDir {
    async fn pages(&self, document_id: &str) -> Result<Vec<u32>, TranscribeError> {
        let mut pages: Vec<u32> = self
            .page_files(document_id)
            .await?
            .into_iter()
            .map(|(page, _)| page)
            .collect();
        pages.dedup();
        Ok(pages)
    }

    async fn render(&self, document_id: &str, page: u32) -> Result<PageImage, TranscribeError> {
        let path = self
            .page_files(document_id)
            .await?
            .into_iter()
            .find(|(p, _)| *p == page)
            .map(|(_, path)| path)
            .ok_or_else(|| TranscribeError::Render {
                document_id: document_id.to_string(),
                page,
                details: format!("no image under {}", self.root.join(document_id).display()),
            })?;

        let bytes = tokio::fs::read(&path).await?;
        let content_type = detect_image_mime(&bytes)
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&path).first_raw().map(str::to_string))
            .unwrap_or_else(|| "image/png".to_string());

        Ok(PageImage::new(PageId::new(document_id, page), bytes, content_type))
    }
}

/// Image MIME type from magic bytes
pub fn detect_image_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    #[test]
    fn test_detect_image_mime() {
        assert_eq!(detect_image_mime(PNG), Some("image/png"));
        assert_eq!(detect_image_mime(JPEG), Some("image/jpeg"));
        assert_eq!(detect_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(detect_image_mime(b"hello"), None);
    }

    #[tokio::test]
    async fn test_reads_pages_in_order() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("doc-1");
        std::fs::create_dir_all(&doc).unwrap();
        std::fs::write(doc.join("page_10.png"), PNG).unwrap();
        std::fs::write(doc.join("2.png"), PNG).unwrap();
        std::fs::write(doc.join("page-0.jpg"), JPEG).unwrap();
        std::fs::write(doc.join("notes.txt"), b"ignored").unwrap();

        let renderer = RenderedImageDir::new(dir.path());
        assert_eq!(renderer.pages("doc-1").await.unwrap(), vec![0, 2, 10]);

        let images = renderer.render_document("doc-1").await.unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].content_type, "image/jpeg");
        assert_eq!(images[2].id, PageId::new("doc-1", 10));
    }

    #[tokio::test]
    async fn test_extension_fallback_for_unknown_bytes() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/0.jpg"), b"not really a jpeg").unwrap();

        let image = RenderedImageDir::new(dir.path()).render("d", 0).await.unwrap();
        assert_eq!(image.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_missing_page_is_a_render_error() {
        let dir = tempdir().unwrap();
        let renderer = RenderedImageDir::new(dir.path());
        assert!(renderer.pages("nothing").await.unwrap().is_empty());
        assert!(matches!(
            renderer.render("nothing", 0).await,
            Err(TranscribeError::Render { page: 0, .. })
        ));
    }
}
