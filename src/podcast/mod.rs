use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{derive_key, CacheMetadata, SourceType, TranscriptCache};
use crate::config::Config;
use crate::gemini::{GeminiClient, TranscribeOptions};
use crate::output;
use crate::utils::{format_file_size, sanitize_filename, truncate_chars, USER_AGENT};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A discovered RSS feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    pub rss_url: String,
    pub title: String,
    pub description: String,

    /// Which search strategy found the feed
    pub source: String,
}

/// One feed episode with its audio enclosure
#[derive(Debug, Clone, Serialize)]
pub struct Episode {
    pub title: String,
    pub audio_url: String,
    pub pub_date: String,
    pub duration: String,
    pub description: String,
}

/// Audio container formats we expect from podcast enclosures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
}

impl AudioFormat {
    /// Guess the format from an audio URL; mp3 when nothing matches
    pub fn from_url(url: &str) -> Self {
        let url = url.to_lowercase();
        if url.contains(".m4a") {
            AudioFormat::M4a
        } else if url.contains(".wav") {
            AudioFormat::Wav
        } else {
            AudioFormat::Mp3
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
        }
    }
}

/// Find the RSS feed URL for a podcast by name.
///
/// Tries Podcastindex, then Apple Podcasts, then HEAD probes of common
/// hosting URL patterns. Each strategy failing is not an error; `None` means
/// all of them came up empty.
pub async fn find_rss_feed(http: &reqwest::Client, podcast_name: &str) -> Option<FeedInfo> {
    if let Some(feed) = search_podcastindex(http, podcast_name).await {
        return Some(feed);
    }

    if let Some(feed) = search_apple_podcasts(http, podcast_name).await {
        return Some(feed);
    }

    probe_common_hosts(http, podcast_name).await
}

async fn search_podcastindex(http: &reqwest::Client, podcast_name: &str) -> Option<FeedInfo> {
    let url = format!(
        "https://api.podcastindex.org/api/1.0/search/byterm?q={}&type=podcast",
        urlencoding::encode(podcast_name)
    );

    let response = http
        .get(&url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(SEARCH_TIMEOUT)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let data: serde_json::Value = response.json().await.ok()?;
    let feed = data.get("feeds")?.as_array()?.first()?;
    let rss_url = feed.get("url")?.as_str()?.to_string();

    Some(FeedInfo {
        rss_url,
        title: feed
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        description: truncate_chars(
            feed.get("description").and_then(|v| v.as_str()).unwrap_or_default(),
            200,
        ),
        source: "Podcastindex".to_string(),
    })
}

async fn search_apple_podcasts(http: &reqwest::Client, podcast_name: &str) -> Option<FeedInfo> {
    let url = format!(
        "https://itunes.apple.com/search?term={}&media=podcast&limit=1",
        urlencoding::encode(podcast_name)
    );

    let response = http
        .get(&url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(SEARCH_TIMEOUT)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let data: serde_json::Value = response.json().await.ok()?;
    let podcast = data.get("results")?.as_array()?.first()?;
    let rss_url = podcast.get("feedUrl")?.as_str()?.to_string();

    Some(FeedInfo {
        rss_url,
        title: podcast
            .get("collectionName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        description: truncate_chars(
            podcast.get("description").and_then(|v| v.as_str()).unwrap_or_default(),
            200,
        ),
        source: "Apple Podcasts".to_string(),
    })
}

async fn probe_common_hosts(http: &reqwest::Client, podcast_name: &str) -> Option<FeedInfo> {
    let compact = podcast_name.to_lowercase().replace(' ', "");
    let dashed = podcast_name.to_lowercase().replace(' ', "-");

    let candidates = [
        ("Megaphone", format!("https://feeds.megaphone.fm/{}", compact)),
        ("Anchor", format!("https://anchor.fm/s/{}/podcast/rss", dashed)),
        ("Podbean", format!("https://{}.podbean.com/feed.xml", compact)),
    ];

    for (host, feed_url) in candidates {
        let response = http
            .head(&feed_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        if let Ok(response) = response {
            if response.status().is_success() {
                return Some(FeedInfo {
                    rss_url: feed_url,
                    title: podcast_name.to_string(),
                    description: format!("Found on {}", host),
                    source: host.to_string(),
                });
            }
        }
    }

    None
}

/// Fetch a feed and list its episodes, newest entries first as feeds order them
pub async fn fetch_episodes(
    http: &reqwest::Client,
    rss_url: &str,
    max_episodes: usize,
) -> Result<Vec<Episode>> {
    let response = http
        .get(rss_url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .context("Failed to fetch RSS feed")?
        .error_for_status()
        .context("RSS feed request failed")?;

    let content = response.bytes().await?;
    let channel = rss::Channel::read_from(&content[..]).context("Failed to parse RSS feed")?;

    Ok(episodes_from_channel(&channel, max_episodes))
}

fn episodes_from_channel(channel: &rss::Channel, max_episodes: usize) -> Vec<Episode> {
    channel
        .items()
        .iter()
        .take(max_episodes)
        .filter_map(|item| {
            // Items without an audio enclosure are not transcribable
            let enclosure = item.enclosure()?;

            Some(Episode {
                title: item.title().unwrap_or("Untitled").to_string(),
                audio_url: enclosure.url().to_string(),
                pub_date: item.pub_date().unwrap_or_default().to_string(),
                duration: item
                    .itunes_ext()
                    .and_then(|ext| ext.duration())
                    .unwrap_or("Unknown")
                    .to_string(),
                description: truncate_chars(item.description().unwrap_or_default(), 200),
            })
        })
        .collect()
}

fn audio_file_stem(title: Option<&str>) -> String {
    title
        .map(sanitize_filename)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| format!("audio_{}", chrono::Utc::now().timestamp()))
}

/// Download an episode's audio into `output_dir` with a progress bar
pub async fn download_audio(
    http: &reqwest::Client,
    audio_url: &str,
    output_dir: &Path,
    title: Option<&str>,
) -> Result<PathBuf> {
    fs_err::create_dir_all(output_dir)?;

    let format = AudioFormat::from_url(audio_url);
    let audio_path = output_dir.join(format!("{}.{}", audio_file_stem(title), format.extension()));

    tracing::info!("Downloading audio to: {}", audio_path.display());

    let response = http
        .get(audio_url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .context("Failed to download audio")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download audio: HTTP {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(0);
    let progress = ProgressBar::new(total_size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap(),
    );
    progress.set_message("Downloading audio...");

    let mut file = fs_err::File::create(&audio_path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        progress.set_position(downloaded);
    }

    progress.finish_with_message("Download complete");

    Ok(audio_path)
}

/// Options for transcribing a single episode
#[derive(Debug, Clone)]
pub struct EpisodeOptions {
    pub title: Option<String>,
    pub include_timestamps: bool,
    pub speaker_diarization: bool,
    pub save_to_disk: bool,
    pub use_cache: bool,
}

impl Default for EpisodeOptions {
    fn default() -> Self {
        Self {
            title: None,
            include_timestamps: true,
            speaker_diarization: true,
            save_to_disk: true,
            use_cache: true,
        }
    }
}

/// Transcribe a podcast episode from its audio URL, consulting and
/// populating the cache.
pub async fn transcribe_episode(
    config: &Config,
    cache: &TranscriptCache,
    gemini: &GeminiClient,
    audio_url: &str,
    options: &EpisodeOptions,
) -> Result<String> {
    let cache_key = derive_key(SourceType::Podcast, audio_url);

    if options.use_cache {
        if let Some(entry) = cache.lookup(&cache_key) {
            tracing::info!("Returning cached transcript for {}", audio_url);
            return Ok(output::render_cached_podcast_markdown(&entry));
        }
    }

    let http = reqwest::Client::new();
    let audio_path =
        download_audio(&http, audio_url, &config.cache_dir()?, options.title.as_deref()).await?;

    let file_size = fs_err::metadata(&audio_path)?.len();
    tracing::info!("Downloaded {} audio file", format_file_size(file_size));

    tracing::info!("Transcribing with Google Gemini (this may take a few minutes)");
    let transcript = gemini
        .transcribe(
            &audio_path,
            &TranscribeOptions {
                include_timestamps: options.include_timestamps,
                speaker_diarization: options.speaker_diarization,
            },
        )
        .await?;

    let title = options.title.clone().unwrap_or_else(|| "Unknown".to_string());

    let saved_path = if options.save_to_disk {
        let path = output::save_transcript(
            &config.output_dir()?,
            &audio_file_stem(options.title.as_deref()),
            "PODCAST TRANSCRIPTION",
            &[
                ("Title", title.clone()),
                ("Audio URL", audio_url.to_string()),
                ("Timestamps", options.include_timestamps.to_string()),
                ("Speaker Diarization", options.speaker_diarization.to_string()),
            ],
            &transcript,
        )?;
        tracing::info!("Transcript saved to: {}", path.display());
        Some(path)
    } else {
        None
    };

    let mut metadata = CacheMetadata::new(SourceType::Podcast, audio_url, &title)
        .with_extra("format", "markdown")
        .with_extra("include_timestamps", options.include_timestamps)
        .with_extra("speaker_diarization", options.speaker_diarization);

    if let Some(path) = &saved_path {
        metadata = metadata.with_extra("saved_to", path.display().to_string());
    }

    cache.store(&cache_key, &transcript, metadata)?;

    // The downloaded audio is only needed for the vendor call
    if let Err(err) = fs_err::remove_file(&audio_path) {
        tracing::debug!("Failed to remove downloaded audio: {}", err);
    }

    let mut lines = vec![
        "# Podcast Transcript".to_string(),
        String::new(),
        format!("**Episode**: {}", title),
        format!("**Audio URL**: {}", audio_url),
    ];

    if let Some(path) = &saved_path {
        lines.push(format!("**Saved To**: {}", path.display()));
    }

    lines.extend([
        format!("**Cache Key**: `{}`", cache_key),
        String::new(),
        "## Transcript".to_string(),
        String::new(),
        transcript,
    ]);

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <link>https://example.com</link>
    <description>A test feed</description>
    <item>
      <title>Episode Two</title>
      <enclosure url="https://audio.example.com/ep2.mp3" length="1234" type="audio/mpeg"/>
      <pubDate>Tue, 04 Aug 2026 10:00:00 +0000</pubDate>
      <itunes:duration>01:02:03</itunes:duration>
      <description>Second episode</description>
    </item>
    <item>
      <title>Text-only post</title>
      <description>No audio here</description>
    </item>
    <item>
      <title>Episode One</title>
      <enclosure url="https://audio.example.com/ep1.m4a" length="1234" type="audio/mp4"/>
      <pubDate>Mon, 03 Aug 2026 10:00:00 +0000</pubDate>
      <description>First episode</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_episodes_from_channel() {
        let channel = rss::Channel::read_from(FEED_XML.as_bytes()).unwrap();
        let episodes = episodes_from_channel(&channel, 10);

        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].title, "Episode Two");
        assert_eq!(episodes[0].audio_url, "https://audio.example.com/ep2.mp3");
        assert_eq!(episodes[0].duration, "01:02:03");
        assert_eq!(episodes[0].pub_date, "Tue, 04 Aug 2026 10:00:00 +0000");
        assert_eq!(episodes[1].title, "Episode One");
        assert_eq!(episodes[1].duration, "Unknown");
    }

    #[test]
    fn test_episodes_limit_applies_before_enclosure_filter() {
        let channel = rss::Channel::read_from(FEED_XML.as_bytes()).unwrap();
        // First two items include one without an enclosure
        let episodes = episodes_from_channel(&channel, 2);
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].title, "Episode Two");
    }

    #[test]
    fn test_audio_format_from_url() {
        assert_eq!(AudioFormat::from_url("https://a.com/ep.mp3"), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_url("https://a.com/EP.M4A?x=1"), AudioFormat::M4a);
        assert_eq!(AudioFormat::from_url("https://a.com/ep.wav"), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_url("https://a.com/stream"), AudioFormat::Mp3);
    }

    #[test]
    fn test_audio_file_stem_sanitizes_title() {
        assert_eq!(audio_file_stem(Some("Ep 1: Origins?")), "Ep 1 Origins");
        assert!(audio_file_stem(None).starts_with("audio_"));
        assert!(audio_file_stem(Some("???")).starts_with("audio_"));
    }
}
