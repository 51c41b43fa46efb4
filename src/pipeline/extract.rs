//! Text-layer extraction via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to call from async contexts. All document access
//! runs on tokio's blocking pool so the async workers never stall.
//!
//! ## Library binding
//!
//! The shared library is located in this order:
//! 1. `PDFIUM_LIB_PATH` (a library file, or a directory containing it)
//! 2. the current directory
//! 3. the system library search path

use crate::config::PageRange;
use crate::error::{PageError, Pdf2TxtError};
use crate::output::{DocumentInfo, PageText};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the pdfium library file or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Pages extracted from a document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Pages in the whole document.
    pub page_count: usize,
    pub first_page: usize,
    /// Last extracted page after clamping.
    pub last_page: usize,
    /// One entry per page in `first_page..=last_page`, in order.
    pub pages: Vec<PageText>,
    pub errors: Vec<PageError>,
}

/// Bind to the pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2TxtError> {
    if let Ok(configured) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !configured.is_empty() {
            let path = PathBuf::from(&configured);
            let library = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", library.display());
            return Pdfium::bind_to_library(&library)
                .map(Pdfium::new)
                .map_err(|e| {
                    Pdf2TxtError::PdfiumBindingFailed(format!("{}: {:?}", library.display(), e))
                });
        }
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| Pdf2TxtError::PdfiumBindingFailed(format!("{:?}", e)))
}

/// Extract the text layer of the pages in `range`.
///
/// The end of the range is clamped to the document; a start past the end is
/// an error. A page whose text cannot be read contributes an empty string and
/// a [`PageError`]; the rest of the document is still returned.
pub async fn extract_pages(
    pdf_path: &Path,
    range: PageRange,
    password: Option<&str>,
) -> Result<ExtractedDocument, Pdf2TxtError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || extract_pages_blocking(&path, range, password.as_deref()))
        .await
        .map_err(|e| Pdf2TxtError::Internal(format!("Extraction task panicked: {}", e)))?
}

fn extract_pages_blocking(
    pdf_path: &Path,
    range: PageRange,
    password: Option<&str>,
) -> Result<ExtractedDocument, Pdf2TxtError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_load_error(pdf_path, password, e))?;

    let pages = document.pages();
    let page_count = pages.len() as usize;
    let (first_page, last_page) = range.resolve(page_count)?;
    info!(
        "PDF loaded: {} pages, extracting {}-{}",
        page_count, first_page, last_page
    );

    let mut extracted = Vec::with_capacity(last_page + 1 - first_page);
    let mut errors = Vec::new();

    for page_num in first_page..=last_page {
        let text = pages.get((page_num - 1) as u16).and_then(|page| {
            let text = page.text()?.all();
            Ok(text)
        });

        match text {
            Ok(text) => {
                debug!("Page {}: {} chars", page_num, text.chars().count());
                extracted.push(PageText::new(page_num, text));
            }
            Err(e) => {
                warn!("Page {}: text extraction failed: {:?}", page_num, e);
                errors.push(PageError::ExtractionFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                });
                extracted.push(PageText::new(page_num, String::new()));
            }
        }
    }

    Ok(ExtractedDocument {
        page_count,
        first_page,
        last_page,
        pages: extracted,
        errors,
    })
}

/// Read document metadata and page count without extracting text.
pub async fn inspect_document(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentInfo, Pdf2TxtError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || inspect_blocking(&path, password.as_deref()))
        .await
        .map_err(|e| Pdf2TxtError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn inspect_blocking(pdf_path: &Path, password: Option<&str>) -> Result<DocumentInfo, Pdf2TxtError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_load_error(pdf_path, password, e))?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentInfo {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// pdfium reports password problems only through the error's debug text.
fn map_load_error(pdf_path: &Path, password: Option<&str>, e: PdfiumError) -> Pdf2TxtError {
    let detail = format!("{:?}", e);
    if detail.to_lowercase().contains("password") {
        if password.is_some() {
            Pdf2TxtError::WrongPassword {
                path: pdf_path.to_path_buf(),
            }
        } else {
            Pdf2TxtError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        }
    } else {
        Pdf2TxtError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail,
        }
    }
}
