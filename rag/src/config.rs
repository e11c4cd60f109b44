use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const PLACEHOLDER_API_KEYS: &[&str] = &["test_key", "your_openai_api_key_here"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(Error::Configuration(format!(
                "unknown RAG_PROVIDER '{}', expected 'ollama' or 'openai'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub provider: ProviderKind,
    pub ollama_url: String,
    pub openai_url: String,
    pub openai_api_key: String,
    pub embed_model: String,
    pub chat_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub request_timeout: Duration,
    pub transcript_langs: Vec<String>,
    pub allow_demo_transcript: bool,
    pub summary_chunks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: String::new(),
            embed_model: "nomic-embed-text".to_string(),
            chat_model: "llama3.1".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            embed_batch_size: 1024,
            embed_concurrency: 4,
            request_timeout: Duration::from_secs(120),
            transcript_langs: vec!["en".to_string(), "en-US".to_string(), "en-GB".to_string()],
            allow_demo_transcript: false,
            summary_chunks: 8,
        }
    }
}

impl Config {
    /// Reads settings from the environment, loading `.env` first when present.
    ///
    /// Unparseable values fall back to their defaults; an unknown provider name
    /// is the one setting that is reported instead of silently replaced.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let provider = match env::var("RAG_PROVIDER") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => defaults.provider,
        };
        let (embed_model, chat_model) = match provider {
            ProviderKind::Ollama => (
                env::var("OLLAMA_EMBED_MODEL").unwrap_or(defaults.embed_model),
                env::var("OLLAMA_CHAT_MODEL").unwrap_or(defaults.chat_model),
            ),
            ProviderKind::OpenAi => (
                env::var("OPENAI_EMBED_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
                env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            ),
        };

        Ok(Self {
            provider,
            ollama_url: env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            openai_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_url),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            embed_model,
            chat_model,
            chunk_size: env_parse("RAG_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            chunk_overlap: env_parse("RAG_CHUNK_OVERLAP").unwrap_or(defaults.chunk_overlap),
            embed_batch_size: env_parse("RAG_EMBED_BATCH_SIZE")
                .unwrap_or(defaults.embed_batch_size),
            embed_concurrency: env_parse("RAG_EMBED_CONCURRENCY")
                .unwrap_or(defaults.embed_concurrency),
            request_timeout: env_parse("RAG_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            transcript_langs: env::var("RAG_TRANSCRIPT_LANGS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.transcript_langs),
            allow_demo_transcript: env_parse("RAG_ALLOW_DEMO_TRANSCRIPT")
                .unwrap_or(defaults.allow_demo_transcript),
            summary_chunks: env_parse("RAG_SUMMARY_CHUNKS").unwrap_or(defaults.summary_chunks),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Configuration("embedding batch size must be positive".to_string()));
        }
        if self.embed_concurrency == 0 {
            return Err(Error::Configuration("embedding concurrency must be positive".to_string()));
        }
        if self.summary_chunks == 0 {
            return Err(Error::Configuration("summary chunk count must be positive".to_string()));
        }
        if self.provider == ProviderKind::OpenAi {
            let key = self.openai_api_key.trim();
            if key.is_empty() || PLACEHOLDER_API_KEYS.contains(&key) {
                return Err(Error::Configuration(
                    "OpenAI API key not configured; set OPENAI_API_KEY to a real key".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("default config should validate");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let cfg = Config {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Config::default()
        };
        let err = cfg.validate().expect_err("overlap == size must be rejected");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_placeholder_openai_key() {
        let cfg = Config {
            provider: ProviderKind::OpenAi,
            openai_api_key: "test_key".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let cfg = Config {
            provider: ProviderKind::OpenAi,
            openai_api_key: "sk-live".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<ProviderKind>().ok(), Some(ProviderKind::OpenAi));
        assert_eq!(" ollama ".parse::<ProviderKind>().ok(), Some(ProviderKind::Ollama));
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn splits_language_list() {
        assert_eq!(split_list("en, de ,,fr"), vec!["en", "de", "fr"]);
    }
}
