use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::from_str;

use crate::config::Config;
use crate::error::HttpError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared client plus the per-request timeout applied to non-streaming calls.
#[derive(Clone, Debug)]
pub struct Http {
    client: Client,
    timeout: Duration,
}

impl Http {
    pub fn new(cfg: &Config) -> Result<Self, HttpError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| HttpError::Transport {
                method: "BUILD",
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            timeout: cfg.request_timeout,
        })
    }

    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let req = self.client.get(url).timeout(self.timeout);
        send_checked("GET", url, req).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let text = self.get_text(url).await?;
        decode("GET", url, text)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<T, HttpError> {
        let req = self.post(url, bearer, body).timeout(self.timeout);
        let text = send_checked("POST", url, req).await?;
        decode("POST", url, text)
    }

    /// Sends a POST and hands back the live response once the status is known to be a
    /// success, so the caller can read the body incrementally. No total timeout applies.
    pub async fn post_stream<B: Serialize>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<Response, HttpError> {
        let resp = self
            .post(url, bearer, body)
            .send()
            .await
            .map_err(|source| HttpError::Transport {
                method: "POST",
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HttpError::Status {
                method: "POST",
                url: url.to_string(),
                status,
                body,
            });
        }
        Ok(resp)
    }

    fn post<B: Serialize>(&self, url: &str, bearer: Option<&str>, body: &B) -> RequestBuilder {
        let req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        match bearer {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn send_checked(
    method: &'static str,
    url: &str,
    req: RequestBuilder,
) -> Result<String, HttpError> {
    let resp = req.send().await.map_err(|source| HttpError::Transport {
        method,
        url: url.to_string(),
        source,
    })?;
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(HttpError::Status {
            method,
            url: url.to_string(),
            status,
            body: text,
        });
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(method: &'static str, url: &str, text: String) -> Result<T, HttpError> {
    from_str::<T>(&text).map_err(|e| HttpError::Decode {
        method,
        url: url.to_string(),
        detail: e.to_string(),
        body: text,
    })
}
