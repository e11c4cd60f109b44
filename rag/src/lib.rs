mod build_prompt;
mod chunk_text;
mod config;
mod embed_chunks;
mod error;
mod fetch_transcript;
mod generate;
mod http;
mod load_pdf;
mod retrieve_chunks;
mod session;
mod vector_index;

use std::path::Path;
use std::sync::Arc;

pub use build_prompt::{
    build_messages, build_summary_messages, format_context, Message, PDF_MISSING_ANSWER,
    VIDEO_MISSING_ANSWER,
};
pub use chunk_text::{check_params, split};
pub use config::{Config, ProviderKind};
pub use embed_chunks::{
    embed_all, embed_query, Embedding, EmbeddingProvider, OllamaEmbedder, OpenAiEmbedder,
};
pub use error::{Error, HttpError, Result};
pub use fetch_transcript::{
    default_strategies, fetch_metadata, fetch_transcript, format_duration, parse_timedtext,
    parse_video_id, DemoTranscript, TimedTextTrack, Transcript, TranscriptStrategy,
};
pub use generate::{
    collect_answer, fragment_stream, parse_line, AnswerStream, ByteSource, ChatProvider,
    FragmentDecoder, LineDecoder, LineEvent, OllamaChat, OpenAiChat, WireFormat,
};
pub use http::Http;
pub use load_pdf::{load_pdf, load_pdf_bytes};
pub use retrieve_chunks::{retrieve_context, Retrieval, RETRIEVAL_TOP_K};
pub use session::{Corpus, CorpusKind, CorpusStatus, SessionStore, SourceMetadata};
pub use vector_index::{cosine_similarity, magnitude, ScoredChunk, VectorIndex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub kind: CorpusKind,
    pub label: String,
    pub chunk_count: usize,
    /// Whether a previously active corpus of the same kind was replaced.
    pub replaced: bool,
}

/// A streamed answer together with the context it was grounded on.
pub struct Answer {
    pub context: String,
    pub fragments: AnswerStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub embedding_provider: &'static str,
    pub chat_provider: &'static str,
    pub embed_model: String,
    pub chat_model: String,
    pub pdf: CorpusStatus,
    pub video: CorpusStatus,
}

/// Ingestion and question answering over one PDF corpus and one video corpus.
///
/// Every method takes `&self`; share the service behind an `Arc` across tasks.
pub struct RagService {
    cfg: Config,
    http: Http,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatProvider>,
    sessions: SessionStore,
}

impl RagService {
    /// Builds the HTTP providers selected by `cfg.provider`.
    pub fn from_config(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let http = Http::new(&cfg).map_err(|e| Error::Configuration(e.to_string()))?;
        let (embedder, chat): (Arc<dyn EmbeddingProvider>, Arc<dyn ChatProvider>) =
            match cfg.provider {
                ProviderKind::Ollama => (
                    Arc::new(OllamaEmbedder::new(http.clone(), &cfg.ollama_url, &cfg.embed_model)),
                    Arc::new(OllamaChat::new(http.clone(), &cfg.ollama_url, &cfg.chat_model)),
                ),
                ProviderKind::OpenAi => (
                    Arc::new(OpenAiEmbedder::new(
                        http.clone(),
                        &cfg.openai_url,
                        &cfg.openai_api_key,
                        &cfg.embed_model,
                    )),
                    Arc::new(OpenAiChat::new(
                        http.clone(),
                        &cfg.openai_url,
                        &cfg.openai_api_key,
                        &cfg.chat_model,
                    )),
                ),
            };
        tracing::info!(
            provider = ?cfg.provider,
            embed_model = %cfg.embed_model,
            chat_model = %cfg.chat_model,
            "rag service configured"
        );
        Ok(Self {
            cfg,
            http,
            embedder,
            chat,
            sessions: SessionStore::new(),
        })
    }

    /// Same as [`RagService::from_config`] with caller-supplied providers.
    pub fn with_providers(
        cfg: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
    ) -> Result<Self> {
        cfg.validate()?;
        let http = Http::new(&cfg).map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self {
            cfg,
            http,
            embedder,
            chat,
            sessions: SessionStore::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Chunks and indexes `documents`, then makes them the active corpus of `kind`.
    ///
    /// Nothing is published unless every step succeeds, so a failed call leaves the
    /// previous corpus (or its absence) in place.
    pub async fn ingest_documents(
        &self,
        kind: CorpusKind,
        label: &str,
        documents: Vec<String>,
        metadata: Option<SourceMetadata>,
    ) -> Result<IngestReport> {
        let chunks = split(&documents, self.cfg.chunk_size, self.cfg.chunk_overlap)?;
        if chunks.is_empty() {
            return Err(Error::source_failed(format!("no text found in {}", kind)));
        }
        tracing::info!(%kind, label, chunks = chunks.len(), "indexing corpus");

        let index = VectorIndex::build(
            self.embedder.as_ref(),
            chunks,
            self.cfg.embed_batch_size,
            self.cfg.embed_concurrency,
        )
        .await?;
        let corpus = Corpus::new(kind, label, index, metadata)?;
        let chunk_count = corpus.chunk_count();
        let replaced = self.sessions.publish(corpus).is_some();
        tracing::info!(%kind, label, chunk_count, replaced, "corpus ready");

        Ok(IngestReport {
            kind,
            label: label.to_string(),
            chunk_count,
            replaced,
        })
    }

    pub async fn ingest_pdf(&self, path: &Path) -> Result<IngestReport> {
        let documents = load_pdf(path).await?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_documents(CorpusKind::Pdf, &label, documents, None)
            .await
    }

    pub async fn ingest_pdf_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<IngestReport> {
        let documents = load_pdf_bytes(bytes).await?;
        self.ingest_documents(CorpusKind::Pdf, name, documents, None)
            .await
    }

    /// Fetches the transcript and oEmbed metadata of a YouTube video and indexes it.
    pub async fn ingest_video(&self, url: &str) -> Result<IngestReport> {
        let video_id = parse_video_id(url)?;
        let strategies = default_strategies(&self.http, &self.cfg);
        let (transcript, metadata) = futures::join!(
            fetch_transcript(&strategies, &video_id),
            fetch_metadata(&self.http, &video_id)
        );
        self.ingest_transcript(&video_id, transcript?, metadata)
            .await
    }

    /// Indexes an already fetched transcript as the video corpus.
    pub async fn ingest_transcript(
        &self,
        video_id: &str,
        transcript: Transcript,
        mut metadata: SourceMetadata,
    ) -> Result<IngestReport> {
        if metadata.duration.is_none() {
            metadata.duration = transcript.duration_secs.map(format_duration);
        }
        metadata.synthetic = transcript.synthetic;
        let label = metadata
            .title
            .clone()
            .unwrap_or_else(|| video_id.to_string());
        self.ingest_documents(CorpusKind::Video, &label, vec![transcript.text], Some(metadata))
            .await
    }

    /// Retrieves context for `question` from the active corpus of `kind` and starts
    /// streaming an answer grounded on it.
    pub async fn ask(&self, kind: CorpusKind, question: &str) -> Result<Answer> {
        let corpus = self.sessions.get(kind)?;
        let retrieval = retrieve_context(self.embedder.as_ref(), corpus.index(), question).await?;
        let messages = build_messages(kind, corpus.metadata(), &retrieval.context, question);
        tracing::info!(%kind, label = corpus.label(), hits = retrieval.chunks.len(), "answering question");
        let fragments = self.chat.stream(&messages).await?;
        Ok(Answer {
            context: retrieval.context,
            fragments,
        })
    }

    /// Streams a summary of the opening chunks of the active corpus of `kind`.
    pub async fn summarize(&self, kind: CorpusKind) -> Result<AnswerStream> {
        let corpus = self.sessions.get(kind)?;
        let opening: Vec<String> = corpus
            .index()
            .chunks()
            .take(self.cfg.summary_chunks)
            .map(str::to_string)
            .collect();
        let messages = build_summary_messages(kind, corpus.metadata(), &format_context(&opening));
        tracing::info!(%kind, chunks = opening.len(), "summarizing corpus");
        self.chat.stream(&messages).await
    }

    /// Plain streamed chat with no retrieval step.
    pub async fn chat(&self, developer_message: &str, user_message: &str) -> Result<AnswerStream> {
        let mut messages = Vec::with_capacity(2);
        if !developer_message.trim().is_empty() {
            messages.push(Message::system(developer_message));
        }
        messages.push(Message::user(user_message));
        self.chat.stream(&messages).await
    }

    pub fn reset(&self, kind: CorpusKind) -> bool {
        let dropped = self.sessions.reset(kind);
        tracing::info!(%kind, dropped, "corpus reset");
        dropped
    }

    pub fn status(&self, kind: CorpusKind) -> CorpusStatus {
        self.sessions.status(kind)
    }

    pub fn health(&self) -> Health {
        Health {
            embedding_provider: self.embedder.name(),
            chat_provider: self.chat.name(),
            embed_model: self.cfg.embed_model.clone(),
            chat_model: self.cfg.chat_model.clone(),
            pdf: self.status(CorpusKind::Pdf),
            video: self.status(CorpusKind::Video),
        }
    }
}
