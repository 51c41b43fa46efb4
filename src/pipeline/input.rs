//! Input validation: check a user-supplied path before pdfium sees it.
//!
//! pdfium reports a missing file, a permission problem and a non-PDF file
//! with the same opaque load error. Checking existence, readability and the
//! `%PDF` magic bytes up front turns those into distinct, actionable errors.

use crate::error::Pdf2TxtError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` is a readable PDF file and return it as a `PathBuf`.
pub fn resolve_input(path: impl AsRef<Path>) -> Result<PathBuf, Pdf2TxtError> {
    let path = path.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(Pdf2TxtError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2TxtError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2TxtError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Pdf2TxtError::CorruptPdf {
                    path,
                    detail: e.to_string(),
                })
            }
        }
    }
    if &magic != b"%PDF" {
        return Err(Pdf2TxtError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let err = resolve_input("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, Pdf2TxtError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, Pdf2TxtError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04 zip archive").unwrap();
        let err = resolve_input(f.path()).unwrap_err();
        match err {
            Pdf2TxtError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn too_short() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(
            resolve_input(f.path()),
            Err(Pdf2TxtError::NotAPdf { .. })
        ));
    }

    #[test]
    fn pdf_magic_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_input(f.path()).unwrap(), f.path());
    }
}
