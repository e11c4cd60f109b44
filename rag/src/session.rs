//! Active corpora, one slot per kind.
//!
//! A slot is either empty or holds a finished, non-empty corpus. New corpora are
//! built outside the lock and published with a single swap, so a reader sees the
//! old corpus or the new one and never anything in between.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::vector_index::VectorIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CorpusKind {
    Pdf,
    Video,
}

impl fmt::Display for CorpusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusKind::Pdf => f.write_str("PDF"),
            CorpusKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub duration: Option<String>,
    pub source_url: Option<String>,
    /// Set when the indexed text is placeholder content, not the real source.
    pub synthetic: bool,
}

#[derive(Debug)]
pub struct Corpus {
    kind: CorpusKind,
    label: String,
    index: VectorIndex,
    metadata: Option<SourceMetadata>,
}

impl Corpus {
    /// Fails with a source error when the index is empty; an empty corpus is never ready.
    pub fn new(
        kind: CorpusKind,
        label: impl Into<String>,
        index: VectorIndex,
        metadata: Option<SourceMetadata>,
    ) -> Result<Self> {
        if index.is_empty() {
            return Err(Error::source_failed(format!("no text found in {}", kind)));
        }
        Ok(Self {
            kind,
            label: label.into(),
            index,
            metadata,
        })
    }

    pub fn kind(&self) -> CorpusKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> Option<&SourceMetadata> {
        self.metadata.as_ref()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CorpusStatus {
    pub ready: bool,
    pub chunk_count: usize,
    pub label: Option<String>,
    pub metadata: Option<SourceMetadata>,
}

type Slot = RwLock<Option<Arc<Corpus>>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    pdf: Slot,
    video: Slot,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: CorpusKind) -> &Slot {
        match kind {
            CorpusKind::Pdf => &self.pdf,
            CorpusKind::Video => &self.video,
        }
    }

    /// The ready corpus of `kind`, or `NotReady`. The lock is released on return.
    pub fn get(&self, kind: CorpusKind) -> Result<Arc<Corpus>> {
        self.slot(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotReady(kind))
    }

    /// Replaces whatever corpus of the same kind was active, returning it.
    pub fn publish(&self, corpus: Corpus) -> Option<Arc<Corpus>> {
        let kind = corpus.kind;
        let corpus = Arc::new(corpus);
        let mut guard = self
            .slot(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.replace(corpus)
    }

    /// Drops the active corpus of `kind`. Returns whether one was active.
    pub fn reset(&self, kind: CorpusKind) -> bool {
        self.slot(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn status(&self, kind: CorpusKind) -> CorpusStatus {
        match self.get(kind) {
            Ok(corpus) => CorpusStatus {
                ready: true,
                chunk_count: corpus.chunk_count(),
                label: Some(corpus.label.clone()),
                metadata: corpus.metadata.clone(),
            },
            Err(_) => CorpusStatus::default(),
        }
    }
}
