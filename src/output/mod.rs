use anyhow::Result;
use chrono::Local;
use std::path::{Path, PathBuf};

use crate::cache::CacheEntry;
use crate::utils::{format_timestamp, timestamp_slug};
use crate::youtube::CaptionSegment;

const BANNER: &str = "================================================================================";

/// Format a YouTube transcript as markdown
pub fn format_youtube_markdown(
    segments: &[CaptionSegment],
    video_id: &str,
    include_timestamps: bool,
) -> String {
    if segments.is_empty() {
        return format!(
            "# YouTube Transcript\n\n**Video ID**: {}\n\nNo transcript data available.",
            video_id
        );
    }

    let last = &segments[segments.len() - 1];
    let total_duration = last.start + last.duration;

    let mut lines = vec![
        "# YouTube Transcript".to_string(),
        String::new(),
        format!("**Video ID**: {}", video_id),
        format!("**Total Entries**: {}", segments.len()),
        format!("**Duration**: {}", format_timestamp(total_duration)),
        String::new(),
        "## Transcript".to_string(),
        String::new(),
    ];

    for segment in segments {
        if include_timestamps {
            lines.push(format!("**[{}]** {}", format_timestamp(segment.start), segment.text));
        } else {
            lines.push(segment.text.clone());
        }
    }

    lines.join("\n")
}

/// Format a YouTube transcript as pretty JSON
pub fn format_youtube_json(segments: &[CaptionSegment], video_id: &str) -> Result<String> {
    let total_duration = segments
        .last()
        .map(|segment| segment.start + segment.duration)
        .unwrap_or(0.0);

    let data = serde_json::json!({
        "video_id": video_id,
        "total_entries": segments.len(),
        "duration_seconds": total_duration,
        "transcript": segments,
    });

    Ok(serde_json::to_string_pretty(&data)?)
}

/// Render a cached YouTube entry as markdown
pub fn render_cached_youtube_markdown(entry: &CacheEntry, video_id: &str) -> String {
    format!(
        "# YouTube Transcript (Cached)\n\n**Video ID**: {}\n**Cache Key**: {}\n**Cached At**: {}\n\n## Transcript\n\n{}",
        video_id,
        entry.cache_key,
        entry.cached_at.to_rfc3339(),
        entry.transcript
    )
}

/// Render a cached YouTube entry as pretty JSON
pub fn render_cached_youtube_json(entry: &CacheEntry, video_id: &str) -> Result<String> {
    let data = serde_json::json!({
        "video_id": video_id,
        "transcript": entry.transcript,
        "cache_key": entry.cache_key,
        "cached_at": entry.cached_at.to_rfc3339(),
        "metadata": entry.metadata,
    });

    Ok(serde_json::to_string_pretty(&data)?)
}

/// Render a cached podcast entry as markdown
pub fn render_cached_podcast_markdown(entry: &CacheEntry) -> String {
    format!(
        "# Podcast Transcript (Cached)\n\n**Episode**: {}\n**Cache Key**: {}\n**Cached At**: {}\n\n## Transcript\n\n{}",
        entry.metadata.title,
        entry.cache_key,
        entry.cached_at.to_rfc3339(),
        entry.transcript
    )
}

/// Render a cache entry for the `cache get` command
pub fn render_cache_entry(entry: &CacheEntry) -> String {
    format!(
        "# Cached Transcript\n\n**Cache Key**: {}\n**Cached At**: {}\n**Source Type**: {}\n**Title**: {}\n**Source**: {}\n\n## Transcript\n\n{}",
        entry.cache_key,
        entry.cached_at.to_rfc3339(),
        entry.metadata.source_type,
        entry.metadata.title,
        entry.metadata.source,
        entry.transcript
    )
}

/// Write a plain-text transcript file with a banner header.
///
/// The filename is `<stem>_<timestamp>.txt` under `output_dir`, which is
/// created if missing.
pub fn save_transcript(
    output_dir: &Path,
    file_stem: &str,
    banner_title: &str,
    fields: &[(&str, String)],
    transcript: &str,
) -> Result<PathBuf> {
    fs_err::create_dir_all(output_dir)?;

    let path = output_dir.join(format!("{}_{}.txt", file_stem, timestamp_slug()));

    let mut content = String::new();
    content.push_str(BANNER);
    content.push('\n');
    content.push_str(banner_title);
    content.push('\n');
    content.push_str(BANNER);
    content.push('\n');
    for (label, value) in fields {
        content.push_str(&format!("{}: {}\n", label, value));
    }
    content.push_str(&format!(
        "Transcribed: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    content.push_str(BANNER);
    content.push_str("\n\n");
    content.push_str(transcript);

    fs_err::write(&path, content)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments() -> Vec<CaptionSegment> {
        vec![
            CaptionSegment {
                text: "Hello world".to_string(),
                start: 0.0,
                duration: 2.0,
            },
            CaptionSegment {
                text: "Second line".to_string(),
                start: 65.0,
                duration: 3.0,
            },
        ]
    }

    #[test]
    fn test_markdown_with_timestamps() {
        let md = format_youtube_markdown(&segments(), "dQw4w9WgXcQ", true);
        assert!(md.contains("**Video ID**: dQw4w9WgXcQ"));
        assert!(md.contains("**Total Entries**: 2"));
        assert!(md.contains("**Duration**: 01:08"));
        assert!(md.contains("**[00:00]** Hello world"));
        assert!(md.contains("**[01:05]** Second line"));
    }

    #[test]
    fn test_markdown_without_timestamps() {
        let md = format_youtube_markdown(&segments(), "dQw4w9WgXcQ", false);
        assert!(md.contains("\nHello world\n"));
        assert!(!md.contains("**[00:00]**"));
    }

    #[test]
    fn test_markdown_empty_segments() {
        let md = format_youtube_markdown(&[], "dQw4w9WgXcQ", true);
        assert!(md.contains("No transcript data available"));
    }

    #[test]
    fn test_json_format_shape() {
        let json = format_youtube_json(&segments(), "dQw4w9WgXcQ").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["video_id"], "dQw4w9WgXcQ");
        assert_eq!(value["total_entries"], 2);
        assert_eq!(value["duration_seconds"], 68.0);
        assert_eq!(value["transcript"][0]["text"], "Hello world");
        assert_eq!(value["transcript"][1]["start"], 65.0);
    }

    #[test]
    fn test_save_transcript_writes_header_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_transcript(
            dir.path(),
            "episode_one",
            "PODCAST TRANSCRIPTION",
            &[("Title", "Episode One".to_string())],
            "the transcript body",
        )
        .unwrap();

        let content = fs_err::read_to_string(&path).unwrap();
        assert!(content.starts_with(BANNER));
        assert!(content.contains("PODCAST TRANSCRIPTION"));
        assert!(content.contains("Title: Episode One"));
        assert!(content.ends_with("the transcript body"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("episode_one_"));
    }

    #[test]
    fn test_save_transcript_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("transcripts");
        save_transcript(&nested, "ep", "BATCH TRANSCRIPTION", &[], "body").unwrap();
        assert!(nested.exists());
    }
}
