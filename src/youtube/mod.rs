use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::cache::{derive_key, CacheMetadata, SourceType, TranscriptCache};
use crate::output;
use crate::utils::USER_AGENT;
use crate::CastscribeError;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// A single caption line with its position in the video
#[derive(Debug, Clone, serde::Serialize)]
pub struct CaptionSegment {
    pub text: String,

    /// Start offset in seconds
    pub start: f64,

    /// Duration in seconds
    pub duration: f64,
}

/// Options for the YouTube transcript operation
#[derive(Debug, Clone)]
pub struct TranscriptOptions {
    pub include_timestamps: bool,
    pub format_json: bool,
    pub use_cache: bool,
}

impl Default for TranscriptOptions {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            format_json: false,
            use_cache: true,
        }
    }
}

/// Extract a YouTube video ID from a URL or validate a raw ID.
///
/// Supports watch URLs, youtu.be short links, embed/v/shorts/live paths,
/// and bare 11-character IDs.
pub fn extract_video_id(input: &str) -> Result<String> {
    let input = input.trim();

    if is_valid_video_id(input) {
        return Ok(input.to_string());
    }

    let invalid = || CastscribeError::InvalidVideoId(input.to_string());

    let parsed = Url::parse(input).map_err(|_| invalid())?;
    let host = parsed.host_str().unwrap_or("");

    let candidate = if host == "youtu.be" || host.ends_with(".youtu.be") {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(|id| id.to_string())
    } else if host.contains("youtube.com") {
        if let Some(id) = parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
        {
            Some(id)
        } else {
            let segments: Vec<&str> = parsed.path_segments().into_iter().flatten().collect();
            match segments.as_slice() {
                ["embed", id, ..] | ["v", id, ..] | ["shorts", id, ..] | ["live", id, ..] => {
                    Some(id.to_string())
                }
                _ => None,
            }
        }
    } else {
        None
    };

    candidate
        .filter(|id| is_valid_video_id(id))
        .ok_or_else(|| invalid().into())
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Thin client over YouTube's public caption data.
///
/// Loads the watch page, locates the player's caption track list, and fetches
/// the first track in json3 form. The caption wire format itself belongs to
/// YouTube; this client only shapes it into ordered segments.
pub struct CaptionClient {
    http: reqwest::Client,
}

impl CaptionClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn fetch_transcript(&self, video_id: &str) -> Result<Vec<CaptionSegment>> {
        tracing::debug!("Fetching watch page for video {}", video_id);

        let html = self
            .http
            .get(format!("{}{}", WATCH_URL, video_id))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US")
            .send()
            .await
            .context("Failed to load watch page")?
            .error_for_status()?
            .text()
            .await?;

        let track_url = extract_caption_track_url(&html, video_id)?;

        tracing::debug!("Fetching caption track for video {}", video_id);

        let track_url = if track_url.contains("fmt=") {
            track_url
        } else {
            format!("{}&fmt=json3", track_url)
        };

        let body = self
            .http
            .get(&track_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .context("Failed to download caption track")?
            .error_for_status()?
            .text()
            .await?;

        parse_json3_transcript(&body, video_id)
    }
}

impl Default for CaptionClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first caption track URL in a watch page.
///
/// Distinguishes the three caller-visible conditions: video unavailable,
/// captions disabled, and no transcript track present.
fn extract_caption_track_url(html: &str, video_id: &str) -> Result<String> {
    if !html.contains("\"captions\":") {
        if html.contains("\"status\":\"ERROR\"") || html.contains("Video unavailable") {
            return Err(CastscribeError::VideoUnavailable(video_id.to_string()).into());
        }
        return Err(CastscribeError::CaptionsDisabled(video_id.to_string()).into());
    }

    let captions_json = html
        .split("\"captions\":")
        .nth(1)
        .and_then(|rest| rest.split(",\"videoDetails").next())
        .ok_or_else(|| CastscribeError::CaptionsDisabled(video_id.to_string()))?;

    let captions: serde_json::Value = serde_json::from_str(captions_json)
        .map_err(|_| CastscribeError::CaptionsDisabled(video_id.to_string()))?;

    let tracks = captions
        .pointer("/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(|value| value.as_array());

    let track_url = tracks
        .and_then(|tracks| tracks.first())
        .and_then(|track| track.get("baseUrl"))
        .and_then(|url| url.as_str())
        .ok_or_else(|| CastscribeError::NoTranscript(video_id.to_string()))?;

    Ok(track_url.replace("\\u0026", "&"))
}

#[derive(Debug, Deserialize)]
struct Json3Transcript {
    events: Option<Vec<Json3Event>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    t_start_ms: Option<u64>,
    d_duration_ms: Option<u64>,
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    utf8: Option<String>,
}

fn parse_json3_transcript(body: &str, video_id: &str) -> Result<Vec<CaptionSegment>> {
    let parsed: Json3Transcript =
        serde_json::from_str(body).context("Failed to parse caption track")?;

    let mut segments = Vec::new();

    for event in parsed.events.unwrap_or_default() {
        let Some(segs) = event.segs else { continue };

        let text: String = segs.into_iter().filter_map(|seg| seg.utf8).collect();
        let text = text.replace('\n', " ").trim().to_string();
        if text.is_empty() {
            continue;
        }

        segments.push(CaptionSegment {
            text,
            start: event.t_start_ms.unwrap_or(0) as f64 / 1000.0,
            duration: event.d_duration_ms.unwrap_or(0) as f64 / 1000.0,
        });
    }

    if segments.is_empty() {
        return Err(CastscribeError::NoTranscript(video_id.to_string()).into());
    }

    Ok(segments)
}

/// Fetch a YouTube transcript, consulting and populating the cache.
pub async fn get_transcript(
    cache: &TranscriptCache,
    client: &CaptionClient,
    input: &str,
    options: &TranscriptOptions,
) -> Result<String> {
    let video_id = extract_video_id(input)?;
    let cache_key = derive_key(SourceType::Youtube, &video_id);

    if options.use_cache {
        if let Some(entry) = cache.lookup(&cache_key) {
            tracing::info!("Returning cached transcript for video {}", video_id);
            return if options.format_json {
                output::render_cached_youtube_json(&entry, &video_id)
            } else {
                Ok(output::render_cached_youtube_markdown(&entry, &video_id))
            };
        }
    }

    tracing::info!("Fetching transcript for video {}", video_id);
    let segments = client.fetch_transcript(&video_id).await?;

    let formatted = if options.format_json {
        output::format_youtube_json(&segments, &video_id)?
    } else {
        output::format_youtube_markdown(&segments, &video_id, options.include_timestamps)
    };

    let metadata = CacheMetadata::new(
        SourceType::Youtube,
        &video_id,
        format!("YouTube Video {}", video_id),
    )
    .with_extra("format", if options.format_json { "json" } else { "markdown" });

    cache.store(&cache_key, &formatted, metadata)?;

    if options.format_json {
        let mut data: serde_json::Value = serde_json::from_str(&formatted)?;
        if let Some(object) = data.as_object_mut() {
            object.insert("cache_key".to_string(), cache_key.into());
        }
        Ok(serde_json::to_string_pretty(&data)?)
    } else {
        Ok(format!("{}\n\n---\n**Cache Key**: `{}`", formatted, cache_key))
    }
}
