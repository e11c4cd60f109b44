//! YouTube transcript and metadata acquisition.
//!
//! Transcripts come from an ordered list of strategies. The first one that returns
//! non-empty text wins; failures are logged and the next strategy is tried. Only
//! when every strategy fails does ingestion fail.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::Http;
use crate::session::SourceMetadata;

const TIMEDTEXT_URL: &str = "https://video.google.com/timedtext";
const OEMBED_URL: &str = "https://www.youtube.com/oembed";

/// Transcript text plus what was learned about it while fetching.
#[derive(Clone, Debug, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub duration_secs: Option<f64>,
    pub synthetic: bool,
}

#[async_trait]
pub trait TranscriptStrategy: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch(&self, video_id: &str) -> Result<Transcript>;
}

/// One timed-text track, either uploaded captions or the auto-generated (`asr`) track.
pub struct TimedTextTrack {
    http: Http,
    lang: String,
    auto_generated: bool,
}

impl TimedTextTrack {
    pub fn new(http: Http, lang: &str, auto_generated: bool) -> Self {
        Self {
            http,
            lang: lang.to_string(),
            auto_generated,
        }
    }
}

#[async_trait]
impl TranscriptStrategy for TimedTextTrack {
    fn describe(&self) -> String {
        if self.auto_generated {
            format!("auto-generated captions ({})", self.lang)
        } else {
            format!("captions ({})", self.lang)
        }
    }

    async fn fetch(&self, video_id: &str) -> Result<Transcript> {
        let mut params = vec![("v", video_id), ("lang", self.lang.as_str())];
        if self.auto_generated {
            params.push(("kind", "asr"));
        }
        let url = Url::parse_with_params(TIMEDTEXT_URL, &params).map_err(Error::source_failed)?;
        let xml = self
            .http
            .get_text(url.as_str())
            .await
            .map_err(Error::source_failed)?;
        let (text, duration_secs) = parse_timedtext(&xml);
        Ok(Transcript {
            text,
            duration_secs,
            synthetic: false,
        })
    }
}

/// Placeholder text used when no real transcript can be fetched. Only installed when
/// `RAG_ALLOW_DEMO_TRANSCRIPT` is enabled, and always marked synthetic.
pub struct DemoTranscript;

const DEMO_TRANSCRIPT: &str = "Welcome to this video. No transcript could be retrieved for it, \
so this placeholder text stands in for the real narration. The video's actual content is \
unknown: any question about what it says cannot be answered from this text. Try another video \
with captions enabled, or disable the demo transcript fallback to surface the retrieval error \
instead.";

#[async_trait]
impl TranscriptStrategy for DemoTranscript {
    fn describe(&self) -> String {
        "demo transcript".to_string()
    }

    async fn fetch(&self, _video_id: &str) -> Result<Transcript> {
        Ok(Transcript {
            text: DEMO_TRANSCRIPT.to_string(),
            duration_secs: None,
            synthetic: true,
        })
    }
}

/// Strategies in the order they are tried: each configured language's captions,
/// then the first language's auto-generated track, then (opt-in) the demo text.
pub fn default_strategies(http: &Http, cfg: &Config) -> Vec<Box<dyn TranscriptStrategy>> {
    let mut strategies: Vec<Box<dyn TranscriptStrategy>> = cfg
        .transcript_langs
        .iter()
        .map(|lang| Box::new(TimedTextTrack::new(http.clone(), lang, false)) as Box<dyn TranscriptStrategy>)
        .collect();
    let asr_lang = cfg.transcript_langs.first().map_or("en", String::as_str);
    strategies.push(Box::new(TimedTextTrack::new(http.clone(), asr_lang, true)));
    if cfg.allow_demo_transcript {
        strategies.push(Box::new(DemoTranscript));
    }
    strategies
}

/// Tries `strategies` in order; the first non-empty transcript wins.
pub async fn fetch_transcript(
    strategies: &[Box<dyn TranscriptStrategy>],
    video_id: &str,
) -> Result<Transcript> {
    let mut failures = Vec::new();
    for strategy in strategies {
        let name = strategy.describe();
        match strategy.fetch(video_id).await {
            Ok(t) if !t.text.trim().is_empty() => {
                if t.synthetic {
                    tracing::warn!(video_id, strategy = %name, "serving placeholder transcript");
                } else {
                    tracing::info!(video_id, strategy = %name, chars = t.text.len(), "fetched transcript");
                }
                return Ok(t);
            }
            Ok(_) => {
                tracing::warn!(video_id, strategy = %name, "transcript strategy returned no text");
                failures.push(format!("{}: empty transcript", name));
            }
            Err(e) => {
                tracing::warn!(video_id, strategy = %name, error = %e, "transcript strategy failed");
                failures.push(format!("{}: {}", name, e));
            }
        }
    }
    Err(Error::source_failed(format!(
        "no transcript available for video {} ({})",
        video_id,
        if failures.is_empty() {
            "no strategies configured".to_string()
        } else {
            failures.join("; ")
        }
    )))
}

#[derive(Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
}

/// Title and author from oEmbed. Never fails: on error a placeholder title is used.
pub async fn fetch_metadata(http: &Http, video_id: &str) -> SourceMetadata {
    let watch_url = format!("https://www.youtube.com/watch?v={}", video_id);
    let mut meta = SourceMetadata {
        source_url: Some(watch_url.clone()),
        ..SourceMetadata::default()
    };
    let fetched = match Url::parse_with_params(OEMBED_URL, &[("url", watch_url.as_str()), ("format", "json")]) {
        Ok(url) => http
            .get_json::<OEmbed>(url.as_str())
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match fetched {
        Ok(o) => {
            meta.title = o.title;
            meta.author = o.author_name;
        }
        Err(error) => {
            tracing::warn!(video_id, %error, "video metadata unavailable, using placeholder");
        }
    }
    if meta.title.is_none() {
        meta.title = Some(format!("YouTube video {}", video_id));
    }
    meta
}

static VIDEO_URL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TEXT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ATTR_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Extracts the 11-character video id from a YouTube URL or a bare id.
pub fn parse_video_id(input: &str) -> Result<String> {
    let input = input.trim();
    let bare = input.len() == 11
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if bare {
        return Ok(input.to_string());
    }
    cached(
        &VIDEO_URL_RE,
        r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
    )
    .and_then(|re| re.captures(input))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::source_failed(format!("not a YouTube video URL: {}", input)))
}

/// Plain text of a timed-text XML track plus its length in seconds (end of the last cue).
pub fn parse_timedtext(xml: &str) -> (String, Option<f64>) {
    let (Some(text_re), Some(attr_re)) = (
        cached(&TEXT_RE, r"(?s)<text\b([^>]*)>(.*?)</text>"),
        cached(&ATTR_RE, r#"(start|dur)="([0-9.]+)""#),
    ) else {
        return (String::new(), None);
    };
    let mut parts = Vec::new();
    let mut end: Option<f64> = None;
    for cap in text_re.captures_iter(xml) {
        let mut start = None;
        let mut dur = 0.0;
        for attr in attr_re.captures_iter(&cap[1]) {
            let value = attr[2].parse::<f64>().ok();
            match &attr[1] {
                "start" => start = value,
                _ => dur = value.unwrap_or(0.0),
            }
        }
        if let Some(s) = start {
            end = Some(end.map_or(s + dur, |e: f64| e.max(s + dur)));
        }
        let text = unescape(&cap[2]);
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            parts.push(text);
        }
    }
    (parts.join(" "), end)
}

/// Decodes XML entities. Captions are often double-escaped (`&amp;#39;`), so the
/// ampersand is decoded first.
fn unescape(raw: &str) -> String {
    let once = raw.replace("&amp;", "&");
    let mut out = String::with_capacity(once.len());
    let mut rest = once.as_str();
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match tail.find(';').filter(|&end| end <= 10) {
            Some(end) => {
                let entity = &tail[1..end];
                match decode_entity(entity) {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let num = entity.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// `h:mm:ss` or `m:ss`.
pub fn format_duration(secs: f64) -> String {
    let total = secs.round().max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
