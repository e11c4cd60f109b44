use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Extracts the text of a PDF on disk as a single document.
pub async fn load_pdf(path: &Path) -> Result<Vec<String>> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(Error::source_failed(format!(
            "file must be a PDF: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(Error::source_failed(format!("{} does not exist", path.display())));
    }

    let owned: PathBuf = path.to_path_buf();
    let text = run_extractor(move || {
        pdf_extract::extract_text_by_pages(&owned)
            .map(|pages| pages.join("\n"))
            .map_err(|e| e.to_string())
    })
    .await?;
    tracing::debug!(path = %path.display(), chars = text.len(), "extracted PDF text");
    into_document(text)
}

/// Same as [`load_pdf`] for an uploaded PDF held in memory.
pub async fn load_pdf_bytes(bytes: Vec<u8>) -> Result<Vec<String>> {
    if !bytes.starts_with(b"%PDF") {
        return Err(Error::source_failed("file must be a PDF"));
    }
    let text = run_extractor(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
    })
    .await?;
    into_document(text)
}

/// Runs the extractor on the blocking pool. The extractor can panic on malformed
/// files, so panics are turned into source errors.
async fn run_extractor<F>(extract: F) -> Result<String>
where
    F: FnOnce() -> std::result::Result<String, String> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(extract)))
        .await
        .map_err(|e| Error::source_failed(format!("PDF extraction task failed: {}", e)))?;
    match joined {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::source_failed(format!("cannot read PDF: {}", e))),
        Err(_) => Err(Error::source_failed(
            "cannot read PDF: the file uses an unsupported or corrupt format",
        )),
    }
}

fn into_document(text: String) -> Result<Vec<String>> {
    if text.trim().is_empty() {
        return Err(Error::source_failed("no text found in PDF"));
    }
    Ok(vec![text])
}
