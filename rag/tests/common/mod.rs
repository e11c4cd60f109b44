#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rag::{
    AnswerStream, ChatProvider, Config, Embedding, EmbeddingProvider, Error, Message, RagService,
    Result,
};
use tokio::sync::mpsc;

/// Counts of `a`..=`z`, so texts sharing letters point the same way.
pub fn letters(text: &str) -> Embedding {
    let mut v = vec![0.0; 26];
    for c in text.chars().filter(char::is_ascii_alphabetic) {
        v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
    }
    v
}

#[derive(Default)]
pub struct LetterEmbedder {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl LetterEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn name(&self) -> &'static str {
        "letters"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Provider {
                provider: "letters",
                detail: "embedding backend unavailable".to_string(),
            });
        }
        Ok(texts.iter().map(|t| letters(t)).collect())
    }
}

/// Replays fixed fragments, optionally ending with an error, and records every request.
pub struct ScriptedChat {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<Vec<Message>>>,
    fragments: Vec<&'static str>,
    fail_with: Option<&'static str>,
}

impl ScriptedChat {
    pub fn replying(fragments: Vec<&'static str>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fragments,
            fail_with: None,
        }
    }

    pub fn failing_after(fragments: Vec<&'static str>, detail: &'static str) -> Self {
        Self {
            fail_with: Some(detail),
            ..Self::replying(fragments)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Vec<Message> {
        self.requests
            .lock()
            .expect("requests lock")
            .last()
            .cloned()
            .expect("at least one chat request")
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, messages: &[Message]) -> Result<AnswerStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.to_vec());
        let mut items: Vec<Result<String>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        if let Some(detail) = self.fail_with {
            items.push(Err(Error::Provider {
                provider: "scripted",
                detail: detail.to_string(),
            }));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Hands each answer stream's sending half to the test, which plays the provider.
#[derive(Default)]
pub struct ChannelChat {
    pub senders: Mutex<Vec<mpsc::Sender<Result<String>>>>,
}

impl ChannelChat {
    pub fn take_sender(&self) -> mpsc::Sender<Result<String>> {
        self.senders
            .lock()
            .expect("senders lock")
            .pop()
            .expect("a stream was opened")
    }
}

#[async_trait]
impl ChatProvider for ChannelChat {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn stream(&self, _messages: &[Message]) -> Result<AnswerStream> {
        let (tx, rx) = mpsc::channel(8);
        self.senders.lock().expect("senders lock").push(tx);
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
    }
}

pub fn small_chunks() -> Config {
    Config {
        chunk_size: 40,
        chunk_overlap: 10,
        embed_batch_size: 2,
        embed_concurrency: 2,
        summary_chunks: 2,
        ..Config::default()
    }
}

pub fn service(chat: Arc<dyn ChatProvider>) -> (Arc<LetterEmbedder>, RagService) {
    let embedder = Arc::new(LetterEmbedder::default());
    let svc = RagService::with_providers(small_chunks(), embedder.clone(), chat)
        .expect("valid test config");
    (embedder, svc)
}

/// Four short documents, one chunk each at the test chunk size.
pub fn topics() -> Vec<String> {
    [
        "the cat sat on the mat",
        "quantum physics lecture notes",
        "baking bread with yeast",
        "xylophone zebra jazz quiz",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
