//! Castscribe - A Rust CLI tool for transcribing media from YouTube and podcasts
//!
//! This library provides functionality to fetch YouTube video captions, discover and
//! transcribe podcast episodes with Google Gemini, and cache every transcript in a
//! content-addressable local store.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod gemini;
pub mod output;
pub mod podcast;
pub mod utils;
pub mod youtube;

pub use cache::{derive_key, CacheEntry, CacheMetadata, CacheSummary, SourceType, TranscriptCache};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use gemini::{GeminiClient, TranscribeOptions};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to castscribe
#[derive(thiserror::Error, Debug)]
pub enum CastscribeError {
    #[error("Invalid YouTube URL or video ID: '{0}'. Provide a valid YouTube URL or an 11-character video ID")]
    InvalidVideoId(String),

    #[error("Captions are disabled for video '{0}'. Try a different video with captions enabled")]
    CaptionsDisabled(String),

    #[error("Video '{0}' not found. Check that the video ID/URL is correct and the video exists")]
    VideoUnavailable(String),

    #[error("No transcript available for video '{0}' in any language")]
    NoTranscript(String),

    #[error("Google API key is required. Set the GOOGLE_API_KEY environment variable")]
    MissingApiKey,

    #[error("Gemini file processing failed for '{0}'")]
    FileProcessingFailed(String),

    #[error("Batch job reached terminal state {0}")]
    BatchFailed(String),
}
