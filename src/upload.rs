// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Preparing photos and PDFs for upload
//!
//! Files are classified by extension. Images are downscaled and re-encoded as
//! JPEG so the multipart part really is `image/jpeg`; PDFs go up untouched
//! but have their page count checked first.

use base64::{engine::general_purpose, Engine as _};
use image::GenericImageView;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::model::HistoryKind;
use crate::{MedscanError, Result};

/// Longest edge sent to the backend
pub const MAX_IMAGE_EDGE: u32 = 1024;

/// Reports longer than this are likely to be rejected by the analyser
pub const MAX_REPORT_PDF_PAGES: usize = 2;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif", "heic", "heif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
        })
    }
}

/// What the user says the upload is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCategory {
    Medicine,
    Report,
}

impl UploadCategory {
    pub fn history_kind(&self) -> HistoryKind {
        match self {
            Self::Medicine => HistoryKind::Med,
            Self::Report => HistoryKind::Report,
        }
    }
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Medicine => "medicine",
            Self::Report => "report",
        })
    }
}

impl FromStr for UploadCategory {
    type Err = MedscanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "medicine" | "med" => Ok(Self::Medicine),
            "report" => Ok(Self::Report),
            other => Err(MedscanError::Validation(format!(
                "Unknown category '{}' (expected medicine or report)",
                other
            ))),
        }
    }
}

/// A file ready to be sent as one multipart part
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name
    pub name: String,
    pub kind: FileKind,
    pub bytes: Vec<u8>,
    /// Only known for PDFs that parsed
    pub page_count: Option<usize>,
}

impl UploadFile {
    /// Read and prepare a file from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let kind = classify(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let raw = std::fs::read(path)?;

        let file = match kind {
            FileKind::Image => {
                let bytes = match prepare_image(&raw) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        debug!("Could not re-encode {:?} ({}), sending original bytes", path, e);
                        raw
                    }
                };
                Self { name, kind, bytes, page_count: None }
            }
            FileKind::Pdf => {
                let page_count = match pdf_page_count(&raw) {
                    Ok(pages) => {
                        if pages > MAX_REPORT_PDF_PAGES {
                            warn!(
                                "{} has {} pages. Ensure PDF is max {} pages; longer files may be rejected.",
                                name, pages, MAX_REPORT_PDF_PAGES
                            );
                        }
                        Some(pages)
                    }
                    Err(e) => {
                        warn!("Could not read page count of {}: {}", name, e);
                        None
                    }
                };
                Self { name, kind, bytes: raw, page_count }
            }
        };

        Ok(file)
    }

    /// Wrap bytes that are already prepared
    pub fn from_bytes(name: impl Into<String>, kind: FileKind, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes,
            page_count: None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self.kind {
            FileKind::Image => "image/jpeg",
            FileKind::Pdf => "application/pdf",
        }
    }

    /// File name announced in the multipart part
    pub fn part_name(&self) -> String {
        match self.kind {
            FileKind::Image => "upload.jpg".to_string(),
            FileKind::Pdf if self.name.trim().is_empty() => "report.pdf".to_string(),
            FileKind::Pdf => self.name.clone(),
        }
    }
}

/// Decide image vs PDF from the extension
pub fn classify(path: &Path) -> Result<FileKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if ext == "pdf" {
        Ok(FileKind::Pdf)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(FileKind::Image)
    } else {
        Err(MedscanError::UnsupportedFileType(format!(
            "{} (only PDF and images are accepted)",
            path.display()
        )))
    }
}

/// Medicine uploads must be photos of pills or packaging
pub fn validate(category: UploadCategory, kind: FileKind) -> Result<()> {
    if category == UploadCategory::Medicine && kind == FileKind::Pdf {
        return Err(MedscanError::Validation(
            "Medicine uploads must be images (photos of pills/bottles), not PDF files.".to_string(),
        ));
    }
    Ok(())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Downscale to [`MAX_IMAGE_EDGE`] and re-encode as JPEG
fn prepare_image(raw: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(raw)?;

    let img = if img.width() > MAX_IMAGE_EDGE || img.height() > MAX_IMAGE_EDGE {
        img.resize(MAX_IMAGE_EDGE, MAX_IMAGE_EDGE, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    debug!("Prepared image {:?}", img.dimensions());

    // JPEG has no alpha channel
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    rgb.write_to(&mut cursor, image::ImageFormat::Jpeg)?;

    Ok(buffer)
}

fn pdf_page_count(raw: &[u8]) -> Result<usize> {
    let doc = lopdf::Document::load_mem(raw)
        .map_err(|e| MedscanError::Pdf(format!("Failed to load PDF: {}", e)))?;
    Ok(doc.get_pages().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    #[test]
    fn test_classify() {
        assert_eq!(classify(Path::new("scan.PDF")).unwrap(), FileKind::Pdf);
        assert_eq!(classify(Path::new("pills.jpeg")).unwrap(), FileKind::Image);
        assert!(matches!(
            classify(Path::new("notes.docx")),
            Err(MedscanError::UnsupportedFileType(_))
        ));
        assert!(classify(Path::new("no_extension")).is_err());
    }

    #[test]
    fn test_medicine_pdf_rejected() {
        assert!(matches!(
            validate(UploadCategory::Medicine, FileKind::Pdf),
            Err(MedscanError::Validation(_))
        ));
        assert!(validate(UploadCategory::Medicine, FileKind::Image).is_ok());
        assert!(validate(UploadCategory::Report, FileKind::Pdf).is_ok());
        assert!(validate(UploadCategory::Report, FileKind::Image).is_ok());
    }

    #[test]
    fn test_large_png_becomes_small_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strip.png");
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(2048, 64, Rgba([200, 30, 30, 128]));
        img.save(&path).unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.kind, FileKind::Image);
        assert_eq!(file.name, "strip.png");
        assert_eq!(&file.bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&file.bytes).unwrap();
        assert_eq!(decoded.width(), MAX_IMAGE_EDGE);
        assert_eq!(file.part_name(), "upload.jpg");
        assert_eq!(file.mime(), "image/jpeg");
    }

    #[test]
    fn test_undecodable_image_sent_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.heic");
        std::fs::write(&path, b"not really an image").unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.bytes, b"not really an image");
    }

    #[test]
    fn test_unparseable_pdf_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.kind, FileKind::Pdf);
        assert!(file.page_count.is_none());
        assert_eq!(file.part_name(), "lab.pdf");
        assert_eq!(file.mime(), "application/pdf");
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Medicine".parse::<UploadCategory>().unwrap(), UploadCategory::Medicine);
        assert_eq!(UploadCategory::Report.history_kind(), HistoryKind::Report);
        assert!("xray".parse::<UploadCategory>().is_err());
    }
}
