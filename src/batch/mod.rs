use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;
use crate::gemini::{
    build_prompt, check_response, extract_text, mime_type_for, GeminiClient,
    GenerateContentResponse,
};
use crate::output;
use crate::podcast;
use crate::CastscribeError;

/// Vendor-defined batch job state, folded to the values callers act on.
///
/// The state machine belongs to the vendor; this only classifies the wire
/// strings for polling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
    Unknown,
}

impl BatchState {
    pub fn from_wire(state: &str) -> Self {
        let state = state
            .trim_start_matches("JOB_STATE_")
            .trim_start_matches("BATCH_STATE_");

        match state {
            "PENDING" | "QUEUED" => BatchState::Pending,
            "RUNNING" => BatchState::Running,
            "SUCCEEDED" => BatchState::Succeeded,
            "FAILED" => BatchState::Failed,
            "CANCELLED" => BatchState::Cancelled,
            "EXPIRED" => BatchState::Expired,
            _ => BatchState::Unknown,
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            BatchState::Failed | BatchState::Cancelled | BatchState::Expired
        )
    }
}

/// Batch job as returned by the vendor (long-running operation shape)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub name: String,

    #[serde(default)]
    pub metadata: Option<BatchJobMetadata>,

    #[serde(default)]
    pub response: Option<BatchJobResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobMetadata {
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub create_time: Option<String>,

    #[serde(default)]
    pub request_count: Option<u64>,

    #[serde(default)]
    pub output_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobResponse {
    #[serde(default)]
    pub responses_file: Option<String>,
}

impl BatchJob {
    pub fn state_str(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.state.as_deref())
            .unwrap_or("UNKNOWN")
    }

    pub fn state(&self) -> BatchState {
        BatchState::from_wire(self.state_str())
    }

    /// Name of the Files API resource holding the results, once available
    pub fn output_file(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.output_uri.as_deref())
            .or_else(|| {
                self.response
                    .as_ref()
                    .and_then(|response| response.responses_file.as_deref())
            })
    }
}

/// Display summary of a batch job
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub job_name: String,
    pub display_name: Option<String>,
    pub state: String,
    pub create_time: Option<String>,
    pub request_count: Option<u64>,
    pub output_file: Option<String>,
}

impl From<&BatchJob> for BatchStatus {
    fn from(job: &BatchJob) -> Self {
        let metadata = job.metadata.clone().unwrap_or_default();
        Self {
            job_name: job.name.clone(),
            display_name: metadata.display_name,
            state: job.state_str().to_string(),
            create_time: metadata.create_time,
            request_count: metadata.request_count,
            output_file: job.output_file().map(|name| name.to_string()),
        }
    }
}

/// One episode to include in a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchEpisode {
    pub title: String,
    pub audio_url: String,
}

impl From<&podcast::Episode> for BatchEpisode {
    fn from(episode: &podcast::Episode) -> Self {
        Self {
            title: episode.title.clone(),
            audio_url: episode.audio_url.clone(),
        }
    }
}

/// Options for creating a batch job
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub name: Option<String>,
    pub include_timestamps: bool,
    pub speaker_diarization: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            name: None,
            include_timestamps: true,
            speaker_diarization: true,
        }
    }
}

/// Info returned after creating a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchInfo {
    pub job_name: String,
    pub display_name: String,
    pub state: String,
    pub create_time: Option<String>,
    pub episode_count: usize,
    pub episodes: Vec<BatchEpisode>,
}

/// A transcript recovered from a completed batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub key: String,
    pub episode_index: usize,
    pub title: String,
    pub transcript: String,
    pub saved_to: Option<String>,
}

async fn get_batch_job(gemini: &GeminiClient, job_name: &str) -> Result<BatchJob> {
    let response = gemini
        .http()
        .get(gemini.api_url(job_name))
        .query(&[("key", gemini.api_key())])
        .send()
        .await
        .context("Failed to get batch job")?;

    let response = check_response(response).await?;

    Ok(response.json().await.context("Failed to parse batch job")?)
}

/// Check the current status of a batch job
pub async fn batch_status(gemini: &GeminiClient, job_name: &str) -> Result<BatchStatus> {
    let job = get_batch_job(gemini, job_name).await?;
    Ok(BatchStatus::from(&job))
}

/// Cancel a running batch job
pub async fn cancel_batch(gemini: &GeminiClient, job_name: &str) -> Result<BatchStatus> {
    let response = gemini
        .http()
        .post(gemini.api_url(&format!("{}:cancel", job_name)))
        .query(&[("key", gemini.api_key())])
        .send()
        .await
        .context("Failed to cancel batch job")?;

    check_response(response).await?;

    // Cancellation is asynchronous; report the state the job is now in
    batch_status(gemini, job_name).await
}

#[derive(Debug, Deserialize)]
struct ListBatchesResponse {
    #[serde(default)]
    operations: Vec<BatchJob>,
}

/// List recent batch jobs
pub async fn list_batches(gemini: &GeminiClient, limit: usize) -> Result<Vec<BatchStatus>> {
    let page_size = limit.to_string();
    let response = gemini
        .http()
        .get(gemini.api_url("batches"))
        .query(&[("key", gemini.api_key()), ("pageSize", page_size.as_str())])
        .send()
        .await
        .context("Failed to list batch jobs")?;

    let response = check_response(response).await?;

    let parsed: ListBatchesResponse = response
        .json()
        .await
        .context("Failed to parse batch job list")?;

    Ok(parsed.operations.iter().map(BatchStatus::from).collect())
}

/// Poll a batch job until it succeeds; terminal failure states are fatal
pub async fn wait_for_batch(
    gemini: &GeminiClient,
    job_name: &str,
    poll_interval: Duration,
) -> Result<BatchJob> {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    progress.set_message("Checking batch job...");

    let start_time = std::time::Instant::now();

    loop {
        let job = get_batch_job(gemini, job_name).await?;

        match job.state() {
            BatchState::Succeeded => {
                progress.finish_with_message("Batch job completed!");
                return Ok(job);
            }
            state if state.is_terminal_failure() => {
                progress.finish_with_message("Batch job failed");
                return Err(CastscribeError::BatchFailed(job.state_str().to_string()).into());
            }
            _ => {
                progress.set_message(format!(
                    "Batch {} ({}s elapsed)",
                    job.state_str(),
                    start_time.elapsed().as_secs()
                ));
                sleep(poll_interval).await;
            }
        }
    }
}

fn build_batch_input(file_uris: &[String], prompt: &str) -> String {
    file_uris
        .iter()
        .enumerate()
        .map(|(index, uri)| {
            serde_json::json!({
                "key": format!("episode-{}", index),
                "request": {
                    "contents": [{
                        "parts": [
                            {"text": prompt},
                            {"fileData": {"fileUri": uri}}
                        ]
                    }]
                }
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create a batch transcription job for multiple episodes.
///
/// Downloads each episode's audio, uploads it to the Files API, packages the
/// requests as JSONL, and submits the batch against the configured model.
pub async fn create_batch(
    config: &Config,
    gemini: &GeminiClient,
    episodes: &[BatchEpisode],
    options: &BatchOptions,
) -> Result<BatchInfo> {
    anyhow::ensure!(!episodes.is_empty(), "episodes list cannot be empty");

    let http = reqwest::Client::new();
    let cache_dir = config.cache_dir()?;

    tracing::info!("Preparing {} episodes for batch transcription", episodes.len());

    let mut uploaded = Vec::new();
    let mut local_audio = Vec::new();

    for (index, episode) in episodes.iter().enumerate() {
        tracing::info!("[{}/{}] {}", index + 1, episodes.len(), episode.title);

        let audio_path = podcast::download_audio(
            &http,
            &episode.audio_url,
            &cache_dir,
            Some(episode.title.as_str()),
        )
        .await?;

        let file = gemini
            .upload_file(&audio_path, mime_type_for(&audio_path))
            .await?;
        let file = gemini.wait_for_file_active(file).await?;

        let uri = file
            .uri
            .with_context(|| format!("Uploaded file for '{}' has no URI", episode.title))?;

        uploaded.push(uri);
        local_audio.push(audio_path);
    }

    let prompt = build_prompt(options.include_timestamps, options.speaker_diarization);
    let jsonl = build_batch_input(&uploaded, prompt);

    let jsonl_path = cache_dir.join(format!(
        "batch_input_{}.jsonl",
        chrono::Utc::now().timestamp()
    ));
    fs_err::write(&jsonl_path, &jsonl)?;

    tracing::info!("Uploading batch input file");
    let input_file = gemini.upload_file(&jsonl_path, "application/jsonl").await?;
    let input_file = gemini.wait_for_file_active(input_file).await?;

    let display_name = options
        .name
        .clone()
        .unwrap_or_else(|| format!("transcribe-batch-{}", chrono::Utc::now().timestamp()));

    tracing::info!("Creating batch job '{}'", display_name);

    let body = serde_json::json!({
        "batch": {
            "displayName": display_name,
            "inputConfig": {"fileName": input_file.name}
        }
    });

    let response = gemini
        .http()
        .post(gemini.api_url(&format!("models/{}:batchGenerateContent", gemini.model())))
        .query(&[("key", gemini.api_key())])
        .json(&body)
        .send()
        .await
        .context("Failed to create batch job")?;

    let response = check_response(response).await?;

    let job: BatchJob = response
        .json()
        .await
        .context("Failed to parse batch job response")?;

    // Local copies served their purpose once uploaded
    for path in &local_audio {
        if let Err(err) = fs_err::remove_file(path) {
            tracing::debug!("Failed to remove downloaded audio: {}", err);
        }
    }
    if let Err(err) = fs_err::remove_file(&jsonl_path) {
        tracing::debug!("Failed to remove batch input file: {}", err);
    }

    Ok(BatchInfo {
        job_name: job.name.clone(),
        display_name,
        state: job.state_str().to_string(),
        create_time: job
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.create_time.clone()),
        episode_count: episodes.len(),
        episodes: episodes.to_vec(),
    })
}

fn parse_batch_results(content: &str) -> Result<Vec<BatchResult>> {
    let mut results = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value =
            serde_json::from_str(line).context("Failed to parse batch result line")?;

        let key = value
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let response: GenerateContentResponse = serde_json::from_value(
            value
                .get("response")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        )
        .context("Failed to parse batch result response")?;

        let episode_index = key
            .rsplit('-')
            .next()
            .and_then(|suffix| suffix.parse::<usize>().ok())
            .unwrap_or(0);

        results.push(BatchResult {
            key,
            episode_index,
            title: format!("Episode {}", episode_index + 1),
            transcript: extract_text(&response),
            saved_to: None,
        });
    }

    results.sort_by_key(|result| result.episode_index);

    Ok(results)
}

/// Retrieve transcripts from a completed batch job
pub async fn batch_results(
    config: &Config,
    gemini: &GeminiClient,
    job_name: &str,
    save_to_disk: bool,
) -> Result<Vec<BatchResult>> {
    let job = get_batch_job(gemini, job_name).await?;

    if job.state() != BatchState::Succeeded {
        anyhow::bail!(
            "Batch job not completed yet. Status: {}",
            job.state_str()
        );
    }

    let output_name = job
        .output_file()
        .context("Batch job has no output file")?;

    // The job may reference the file by bare id or full resource name
    let file_id = output_name.rsplit('/').next().unwrap_or(output_name);
    let file = gemini.get_file(&format!("files/{}", file_id)).await?;
    let uri = file.uri.context("Output file has no download URI")?;

    tracing::info!("Downloading batch results");
    let content = gemini.download_file_content(&uri).await?;

    let mut results = parse_batch_results(&content)?;

    if save_to_disk {
        let output_dir = config.output_dir()?;

        for (index, result) in results.iter_mut().enumerate() {
            let path = output::save_transcript(
                &output_dir,
                &format!("batch_episode_{:03}", index + 1),
                "BATCH TRANSCRIPTION",
                &[
                    ("Episode", result.title.clone()),
                    ("Batch Job", job_name.to_string()),
                ],
                &result.transcript,
            )?;

            tracing::info!("Saved: {}", path.display());
            result.saved_to = Some(path.display().to_string());
        }
    }

    tracing::info!("Retrieved {} transcripts", results.len());

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_state_from_wire() {
        assert_eq!(BatchState::from_wire("JOB_STATE_PENDING"), BatchState::Pending);
        assert_eq!(BatchState::from_wire("JOB_STATE_RUNNING"), BatchState::Running);
        assert_eq!(BatchState::from_wire("JOB_STATE_SUCCEEDED"), BatchState::Succeeded);
        assert_eq!(BatchState::from_wire("JOB_STATE_FAILED"), BatchState::Failed);
        assert_eq!(BatchState::from_wire("JOB_STATE_CANCELLED"), BatchState::Cancelled);
        assert_eq!(BatchState::from_wire("JOB_STATE_EXPIRED"), BatchState::Expired);
        assert_eq!(BatchState::from_wire("BATCH_STATE_SUCCEEDED"), BatchState::Succeeded);
        assert_eq!(BatchState::from_wire("SOMETHING_ELSE"), BatchState::Unknown);
    }

    #[test]
    fn test_terminal_failure_states() {
        assert!(BatchState::Failed.is_terminal_failure());
        assert!(BatchState::Cancelled.is_terminal_failure());
        assert!(BatchState::Expired.is_terminal_failure());
        assert!(!BatchState::Succeeded.is_terminal_failure());
        assert!(!BatchState::Running.is_terminal_failure());
    }

    #[test]
    fn test_build_batch_input_shape() {
        let uris = vec![
            "https://generativelanguage.googleapis.com/v1beta/files/a".to_string(),
            "https://generativelanguage.googleapis.com/v1beta/files/b".to_string(),
        ];

        let jsonl = build_batch_input(&uris, "transcribe this");
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["key"], "episode-0");
        assert_eq!(
            first["request"]["contents"][0]["parts"][0]["text"],
            "transcribe this"
        );
        assert_eq!(
            first["request"]["contents"][0]["parts"][1]["fileData"]["fileUri"],
            uris[0]
        );

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["key"], "episode-1");
    }

    #[test]
    fn test_parse_batch_results_sorts_by_index() {
        let content = r#"{"key": "episode-1", "response": {"candidates": [{"content": {"parts": [{"text": "second"}]}}]}}
{"key": "episode-0", "response": {"candidates": [{"content": {"parts": [{"text": "first "}, {"text": "half"}]}}]}}"#;

        let results = parse_batch_results(content).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "episode-0");
        assert_eq!(results[0].transcript, "first half");
        assert_eq!(results[0].title, "Episode 1");
        assert_eq!(results[1].key, "episode-1");
        assert_eq!(results[1].transcript, "second");
    }

    #[test]
    fn test_parse_batch_results_tolerates_missing_response() {
        let content = r#"{"key": "episode-0"}"#;
        let results = parse_batch_results(content).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].transcript, "");
    }

    #[test]
    fn test_batch_job_state_accessors() {
        let job: BatchJob = serde_json::from_str(
            r#"{
                "name": "batches/abc123",
                "metadata": {
                    "state": "JOB_STATE_SUCCEEDED",
                    "displayName": "my-batch",
                    "createTime": "2026-08-05T10:00:00Z",
                    "requestCount": 3,
                    "outputUri": "files/out123"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(job.state(), BatchState::Succeeded);
        assert_eq!(job.state_str(), "JOB_STATE_SUCCEEDED");
        assert_eq!(job.output_file(), Some("files/out123"));

        let status = BatchStatus::from(&job);
        assert_eq!(status.job_name, "batches/abc123");
        assert_eq!(status.display_name.as_deref(), Some("my-batch"));
        assert_eq!(status.request_count, Some(3));
    }

    #[test]
    fn test_batch_job_without_metadata_is_unknown() {
        let job: BatchJob = serde_json::from_str(r#"{"name": "batches/abc"}"#).unwrap();
        assert_eq!(job.state(), BatchState::Unknown);
        assert!(job.output_file().is_none());
    }
}
