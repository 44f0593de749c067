use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "castscribe",
    about = "Castscribe - Transcribe YouTube videos and podcast episodes",
    version,
    long_about = "A CLI tool for transcribing media. YouTube transcripts come from the video's own captions; podcast episodes are transcribed with Google Gemini, individually or as batch jobs. Every transcript is cached locally."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the transcript of a YouTube video
    Youtube {
        /// YouTube video URL or 11-character video ID
        #[arg(value_name = "URL_OR_ID")]
        video: String,

        /// Output JSON instead of markdown
        #[arg(long)]
        json: bool,

        /// Omit [MM:SS] timestamps from markdown output
        #[arg(long)]
        no_timestamps: bool,

        /// Skip the cache and re-fetch from YouTube
        #[arg(long)]
        no_cache: bool,
    },

    /// Discover, list and transcribe podcast episodes
    Podcast {
        #[command(subcommand)]
        command: PodcastCommands,
    },

    /// Manage Gemini batch transcription jobs
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Inspect the transcript cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum PodcastCommands {
    /// Find the RSS feed for a podcast by name
    Find {
        /// Podcast name, e.g. "Lex Fridman Podcast"
        name: String,
    },

    /// List episodes from an RSS feed
    Episodes {
        /// URL of the podcast RSS feed
        rss_url: String,

        /// Maximum number of episodes to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Transcribe an episode from its audio URL
    Transcribe {
        /// Direct URL to the audio file (.mp3, .m4a, .wav)
        audio_url: String,

        /// Episode title, used for metadata and filenames
        #[arg(short, long)]
        title: Option<String>,

        /// Omit [MM:SS] timestamps
        #[arg(long)]
        no_timestamps: bool,

        /// Disable speaker diarization
        #[arg(long)]
        no_diarization: bool,

        /// Do not save the transcript to the output directory
        #[arg(long)]
        no_save: bool,

        /// Skip the cache and re-transcribe
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Create a batch job from audio URLs or an RSS feed
    Create {
        /// Direct audio URLs to include
        #[arg(value_name = "AUDIO_URL")]
        audio_urls: Vec<String>,

        /// Pull episodes from this RSS feed instead
        #[arg(long, value_name = "RSS_URL")]
        feed: Option<String>,

        /// Number of feed episodes to include
        #[arg(short, long)]
        limit: Option<usize>,

        /// Display name for the batch job
        #[arg(long)]
        name: Option<String>,

        /// Omit [MM:SS] timestamps
        #[arg(long)]
        no_timestamps: bool,

        /// Disable speaker diarization
        #[arg(long)]
        no_diarization: bool,

        /// Block until the job completes (can take hours)
        #[arg(long)]
        wait: bool,
    },

    /// Check the status of a batch job
    Status {
        /// Job name, e.g. "batches/abc123"
        job_name: String,
    },

    /// Poll a batch job until it completes
    Wait {
        /// Job name, e.g. "batches/abc123"
        job_name: String,

        /// Seconds between status polls
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Download transcripts from a completed batch job
    Results {
        /// Job name, e.g. "batches/abc123"
        job_name: String,

        /// Do not save transcripts to the output directory
        #[arg(long)]
        no_save: bool,
    },

    /// Cancel a running batch job
    Cancel {
        /// Job name, e.g. "batches/abc123"
        job_name: String,
    },

    /// List recent batch jobs
    List {
        /// Maximum number of jobs to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show a cached transcript by key
    Get {
        /// Hex digest cache key
        cache_key: String,
    },

    /// List cached transcripts, newest first
    List {
        /// Maximum number of entries to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}
