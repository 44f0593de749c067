use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use castscribe::cli::{BatchCommands, CacheCommands, Cli, Commands, PodcastCommands};
use castscribe::{batch, output, podcast, youtube};
use castscribe::{Config, GeminiClient, TranscriptCache};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "castscribe=debug"
    } else {
        "castscribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let cache = TranscriptCache::new(config.cache_dir()?);

    match cli.command {
        Commands::Youtube {
            video,
            json,
            no_timestamps,
            no_cache,
        } => {
            let client = youtube::CaptionClient::new();
            let options = youtube::TranscriptOptions {
                include_timestamps: !no_timestamps,
                format_json: json,
                use_cache: !no_cache,
            };

            let transcript = youtube::get_transcript(&cache, &client, &video, &options).await?;
            println!("{}", transcript);
        }

        Commands::Podcast { command } => match command {
            PodcastCommands::Find { name } => {
                let http = reqwest::Client::new();

                match podcast::find_rss_feed(&http, &name).await {
                    Some(feed) => {
                        println!("Found feed via {}:", feed.source);
                        println!("  Title: {}", feed.title);
                        println!("  RSS URL: {}", feed.rss_url);
                        if !feed.description.is_empty() {
                            println!("  Description: {}", feed.description);
                        }
                    }
                    None => {
                        println!("Could not find RSS feed for '{}'. Try:", name);
                        println!("  1. Checking the exact podcast name");
                        println!("  2. Searching on Apple Podcasts or Spotify first");
                        println!("  3. Using a different search term");
                    }
                }
            }

            PodcastCommands::Episodes { rss_url, limit } => {
                let http = reqwest::Client::new();
                let limit = limit.unwrap_or(config.app.default_episode_limit);
                let episodes = podcast::fetch_episodes(&http, &rss_url, limit).await?;

                if episodes.is_empty() {
                    println!("No episodes with audio found in feed");
                } else {
                    for (index, episode) in episodes.iter().enumerate() {
                        println!("{}. {}", index + 1, episode.title);
                        if !episode.pub_date.is_empty() {
                            println!("   Published: {}", episode.pub_date);
                        }
                        println!("   Duration: {}", episode.duration);
                        println!("   Audio: {}", episode.audio_url);
                    }
                }
            }

            PodcastCommands::Transcribe {
                audio_url,
                title,
                no_timestamps,
                no_diarization,
                no_save,
                no_cache,
            } => {
                let gemini = GeminiClient::new(&config)?;
                let options = podcast::EpisodeOptions {
                    title,
                    include_timestamps: !no_timestamps,
                    speaker_diarization: !no_diarization,
                    save_to_disk: !no_save,
                    use_cache: !no_cache,
                };

                let transcript =
                    podcast::transcribe_episode(&config, &cache, &gemini, &audio_url, &options)
                        .await?;
                println!("{}", transcript);
            }
        },

        Commands::Batch { command } => match command {
            BatchCommands::Create {
                audio_urls,
                feed,
                limit,
                name,
                no_timestamps,
                no_diarization,
                wait,
            } => {
                let gemini = GeminiClient::new(&config)?;

                let episodes: Vec<batch::BatchEpisode> = if let Some(rss_url) = feed {
                    let http = reqwest::Client::new();
                    let limit = limit.unwrap_or(config.app.default_episode_limit);
                    podcast::fetch_episodes(&http, &rss_url, limit)
                        .await?
                        .iter()
                        .map(batch::BatchEpisode::from)
                        .collect()
                } else {
                    audio_urls
                        .iter()
                        .enumerate()
                        .map(|(index, url)| batch::BatchEpisode {
                            title: format!("Episode {}", index + 1),
                            audio_url: url.clone(),
                        })
                        .collect()
                };

                if episodes.is_empty() {
                    anyhow::bail!("Provide audio URLs or --feed with at least one episode");
                }

                let options = batch::BatchOptions {
                    name,
                    include_timestamps: !no_timestamps,
                    speaker_diarization: !no_diarization,
                };

                let info = batch::create_batch(&config, &gemini, &episodes, &options).await?;

                println!("Batch job created!");
                println!("  Job name: {}", info.job_name);
                println!("  Status: {}", info.state);
                println!("  Episodes: {}", info.episode_count);
                println!();
                println!(
                    "Use 'castscribe batch status {}' to monitor progress",
                    info.job_name
                );

                if wait {
                    println!();
                    println!("Waiting for batch completion (this may take hours)...");
                    let interval = Duration::from_secs(config.gemini.batch_poll_interval_secs);
                    let job = batch::wait_for_batch(&gemini, &info.job_name, interval).await?;
                    println!("Final status: {}", job.state_str());
                }
            }

            BatchCommands::Status { job_name } => {
                let gemini = GeminiClient::new(&config)?;
                let status = batch::batch_status(&gemini, &job_name).await?;
                print_batch_status(&status);
            }

            BatchCommands::Wait { job_name, interval } => {
                let gemini = GeminiClient::new(&config)?;
                let interval = Duration::from_secs(
                    interval.unwrap_or(config.gemini.batch_poll_interval_secs),
                );

                let job = batch::wait_for_batch(&gemini, &job_name, interval).await?;
                println!("Batch job completed: {}", job.state_str());
            }

            BatchCommands::Results { job_name, no_save } => {
                let gemini = GeminiClient::new(&config)?;
                let results =
                    batch::batch_results(&config, &gemini, &job_name, !no_save).await?;

                for result in &results {
                    println!("{}: {} chars", result.title, result.transcript.len());
                    if let Some(path) = &result.saved_to {
                        println!("  Saved: {}", path);
                    }
                }
            }

            BatchCommands::Cancel { job_name } => {
                let gemini = GeminiClient::new(&config)?;
                let status = batch::cancel_batch(&gemini, &job_name).await?;
                println!("Batch job cancelled");
                print_batch_status(&status);
            }

            BatchCommands::List { limit } => {
                let gemini = GeminiClient::new(&config)?;
                let jobs = batch::list_batches(&gemini, limit).await?;

                if jobs.is_empty() {
                    println!("No batch jobs found");
                } else {
                    for job in &jobs {
                        println!(
                            "{} [{}] {}",
                            job.job_name,
                            job.state,
                            job.display_name.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        },

        Commands::Cache { command } => match command {
            CacheCommands::Get { cache_key } => match cache.lookup(&cache_key) {
                Some(entry) => println!("{}", output::render_cache_entry(&entry)),
                None => println!(
                    "No cached transcript found with key '{}'. Use 'castscribe cache list' to see available transcripts.",
                    cache_key
                ),
            },

            CacheCommands::List { limit } => {
                let entries = cache.list(limit);

                if entries.is_empty() {
                    println!("Cache is empty");
                } else {
                    for entry in &entries {
                        println!(
                            "{} [{}] {}",
                            entry.cached_at.format("%Y-%m-%d %H:%M"),
                            entry.source_type,
                            entry.title
                        );
                        println!("   Key: {}", entry.cache_key);
                        println!("   Source: {}", entry.source);
                    }
                }
            }
        },

        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Run 'castscribe config --show' to see current values");
            }
        }
    }

    Ok(())
}

fn print_batch_status(status: &batch::BatchStatus) {
    println!("Job: {}", status.job_name);
    if let Some(name) = &status.display_name {
        println!("  Name: {}", name);
    }
    println!("  State: {}", status.state);
    if let Some(created) = &status.create_time {
        println!("  Created: {}", created);
    }
    if let Some(count) = status.request_count {
        println!("  Requests: {}", count);
    }
}
