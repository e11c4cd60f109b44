use crate::error::{Error, Result};

/// Splits every document into windows of `chunk_size` characters whose starts are
/// `chunk_size - overlap` apart. A document's last window is the first one that reaches
/// its end, so it may be shorter than `chunk_size`.
///
/// Chunks keep document order, then window order. Text is not trimmed.
pub fn split(documents: &[String], chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    check_params(chunk_size, overlap)?;
    let mut chunks = Vec::new();
    for doc in documents {
        chunk_text(doc, chunk_size, overlap, &mut chunks);
    }
    Ok(chunks)
}

pub fn check_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::Configuration("chunk size must be positive".to_string()));
    }
    if overlap >= chunk_size {
        return Err(Error::Configuration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

fn chunk_text(text: &str, size: usize, overlap: usize, out: &mut Vec<String>) {
    // Byte offset of every char plus the end, so windows never split a code point.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len_chars = bounds.len() - 1;

    let mut start = 0usize;
    while start < len_chars {
        let end = (start + size).min(len_chars);
        out.push(text[bounds[start]..bounds[end]].to_string());
        if end == len_chars {
            break;
        }
        start = end - overlap;
    }
}
