use crate::session::CorpusKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("{provider} provider error: {detail}")]
    Provider {
        provider: &'static str,
        detail: String,
    },

    #[error("no {0} is loaded yet")]
    NotReady(CorpusKind),
}

impl Error {
    pub(crate) fn provider(provider: &'static str, detail: impl ToString) -> Self {
        Error::Provider {
            provider,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn source_failed(detail: impl ToString) -> Self {
        Error::Source(detail.to_string())
    }
}

/// Failure of a single HTTP exchange, before it is attributed to a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} failed: {status} {body}")]
    Status {
        method: &'static str,
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{method} {url} decode failed: {detail} | {body}")]
    Decode {
        method: &'static str,
        url: String,
        detail: String,
        body: String,
    },
}
