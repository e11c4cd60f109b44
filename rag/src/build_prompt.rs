use serde::Serialize;

use crate::session::{CorpusKind, SourceMetadata};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub const PDF_MISSING_ANSWER: &str = "I cannot find that information in the provided document";
pub const VIDEO_MISSING_ANSWER: &str = "I cannot find that information in the video";

/// Joins retrieved chunks with a blank line between each.
pub fn format_context(chunks: &[String]) -> String {
    chunks.join("\n\n")
}

pub fn build_messages(
    kind: CorpusKind,
    metadata: Option<&SourceMetadata>,
    context: &str,
    question: &str,
) -> Vec<Message> {
    let system = match kind {
        CorpusKind::Pdf => pdf_system_prompt(context),
        CorpusKind::Video => video_system_prompt(metadata, context),
    };
    vec![Message::system(system), Message::user(question)]
}

fn pdf_system_prompt(context: &str) -> String {
    format!(
        "You are a helpful assistant that answers questions based ONLY on the provided context from a PDF document.\n\
         \n\
         IMPORTANT RULES:\n\
         1. ONLY use information from the provided context below\n\
         2. If the answer is not in the context, say \"{}\"\n\
         3. Be specific and cite relevant parts of the context when possible\n\
         4. If the context is insufficient, ask for clarification\n\
         \n\
         Context from PDF:\n\
         {}",
        PDF_MISSING_ANSWER, context
    )
}

fn video_system_prompt(metadata: Option<&SourceMetadata>, context: &str) -> String {
    let mut prompt = format!(
        "You are a helpful assistant that answers questions based ONLY on the provided transcript excerpts from a YouTube video.\n\
         \n\
         IMPORTANT RULES:\n\
         1. ONLY use information from the transcript excerpts below\n\
         2. If the answer is not in the excerpts, say \"{}\"\n\
         3. When relevant, mention the video's title and author as the source\n\
         4. If the excerpts are insufficient, ask for clarification\n",
        VIDEO_MISSING_ANSWER
    );
    if let Some(meta) = metadata {
        prompt.push_str("\nVideo information:\n");
        prompt.push_str(&describe(meta));
        if meta.synthetic {
            prompt.push_str(
                "\nNOTE: the real transcript was unavailable; the excerpts are placeholder text. \
                 Tell the user this before answering.\n",
            );
        }
    }
    prompt.push_str("\nTranscript excerpts:\n");
    prompt.push_str(context);
    prompt
}

/// Messages asking for a short summary of the opening transcript chunks.
pub fn build_summary_messages(
    kind: CorpusKind,
    metadata: Option<&SourceMetadata>,
    excerpt: &str,
) -> Vec<Message> {
    let mut system = format!(
        "You summarize a {} for a reader who has not seen it. Use only the text provided. \
         Give a one-paragraph overview followed by three to five key points as a bulleted list.",
        kind
    );
    if let Some(meta) = metadata {
        system.push_str("\n\nSource information:\n");
        system.push_str(&describe(meta));
    }
    vec![
        Message::system(system),
        Message::user(format!("Summarize this content:\n\n{}", excerpt)),
    ]
}

fn describe(meta: &SourceMetadata) -> String {
    let mut lines = Vec::new();
    if let Some(title) = &meta.title {
        lines.push(format!("Title: {}", title));
    }
    if let Some(author) = &meta.author {
        lines.push(format!("Author: {}", author));
    }
    if let Some(duration) = &meta.duration {
        lines.push(format!("Duration: {}", duration));
    }
    if let Some(url) = &meta.source_url {
        lines.push(format!("URL: {}", url));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
