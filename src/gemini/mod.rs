use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;
use crate::utils::truncate_chars;
use crate::CastscribeError;

const API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Seconds between polls while an uploaded file is processing
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Options for a Gemini transcription request
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub include_timestamps: bool,
    pub speaker_diarization: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            speaker_diarization: true,
        }
    }
}

/// Build the transcription instruction for the given option pair
pub fn build_prompt(include_timestamps: bool, speaker_diarization: bool) -> &'static str {
    if include_timestamps && speaker_diarization {
        "Transcribe this audio accurately with speaker diarization.\n\
         Include timestamps in [MM:SS] format showing actual time in the recording.\n\
         Format: [MM:SS] Speaker A/B/C: <text>\n\n\
         Use Speaker A, Speaker B, etc. to identify different speakers.\n\
         Ensure timestamps correspond to actual positions in the audio."
    } else if include_timestamps {
        "Transcribe this audio accurately with timestamps.\n\
         Include timestamps in [MM:SS] format showing actual time in the recording.\n\
         Format: [MM:SS] <text>"
    } else if speaker_diarization {
        "Please transcribe this audio file with speaker diarization.\n\
         Format output with Speaker A, Speaker B, etc. to identify different speakers."
    } else {
        "Please transcribe this audio file accurately."
    }
}

/// MIME type for an audio file, guessed from its extension; mpeg by default
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("m4a") => "audio/mp4",
        Some("wav") => "audio/wav",
        _ => "audio/mpeg",
    }
}

/// A file tracked by the Gemini Files API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFile {
    pub name: String,
    pub uri: Option<String>,
    pub state: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    pub candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    pub parts: Option<Vec<ContentPart>>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    pub text: Option<String>,
}

/// Concatenate the text parts of every candidate
pub fn extract_text(response: &GenerateContentResponse) -> String {
    let mut text = String::new();

    for candidate in response.candidates.iter().flatten() {
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_ref());

        for part in parts.into_iter().flatten() {
            if let Some(part_text) = &part.text {
                text.push_str(part_text);
            }
        }
    }

    text
}

/// Client for the Gemini generateContent and Files endpoints.
///
/// Single-attempt, fail-fast: there is no retry or backoff layer beyond what
/// reqwest itself provides.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    upload_threshold: u64,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            api_key: config.api_key()?,
            model: config.gemini.model.clone(),
            upload_threshold: config.gemini.upload_threshold_bytes,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", API_BASE, path)
    }

    /// Transcribe an audio file.
    ///
    /// Files over the configured threshold are uploaded through the Files API
    /// and referenced by URI; smaller files are sent inline as base64.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<String> {
        let prompt = build_prompt(options.include_timestamps, options.speaker_diarization);
        let mime_type = mime_type_for(audio_path);
        let file_size = fs_err::metadata(audio_path)?.len();

        if file_size > self.upload_threshold {
            tracing::info!(
                "Audio is {} bytes, uploading through the Files API",
                file_size
            );

            let file = self.upload_file(audio_path, mime_type).await?;
            let file = self.wait_for_file_active(file).await?;

            let file_uri = file
                .uri
                .clone()
                .context("Uploaded file has no URI")?;

            let result = self.generate_with_file(prompt, &file_uri).await;

            // Uploaded audio is transient; remove it whatever the outcome
            if let Err(err) = self.delete_file(&file.name).await {
                tracing::warn!("Failed to delete uploaded file {}: {}", file.name, err);
            }

            result
        } else {
            let data = fs_err::read(audio_path)?;
            self.generate_inline(prompt, mime_type, &data).await
        }
    }

    async fn generate_inline(&self, prompt: &str, mime_type: &str, data: &[u8]) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);

        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inlineData": {"mimeType": mime_type, "data": encoded}}
                ]
            }]
        });

        self.generate(body).await
    }

    async fn generate_with_file(&self, prompt: &str, file_uri: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"fileData": {"fileUri": file_uri}}
                ]
            }]
        });

        self.generate(body).await
    }

    async fn generate(&self, body: serde_json::Value) -> Result<String> {
        let url = self.api_url(&format!("models/{}:generateContent", self.model));

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let response = check_response(response).await?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let text = extract_text(&parsed);
        if text.is_empty() {
            anyhow::bail!("Gemini response contained no text");
        }

        Ok(text)
    }

    /// Upload a file through the resumable Files API
    pub async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<GeminiFile> {
        let data = fs_err::read(path)?;
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", API_BASE))
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({"file": {"display_name": display_name}}))
            .send()
            .await
            .context("Failed to start file upload")?;

        let start = check_response(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .context("Upload session did not return an upload URL")?
            .to_string();

        let finished = self
            .http
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .body(data)
            .send()
            .await
            .context("Failed to upload file content")?;

        let finished = check_response(finished).await?;

        let parsed: UploadResponse = finished
            .json()
            .await
            .context("Failed to parse upload response")?;

        Ok(parsed.file)
    }

    pub async fn get_file(&self, name: &str) -> Result<GeminiFile> {
        let response = self
            .http
            .get(self.api_url(name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to get file status")?;

        let response = check_response(response).await?;

        Ok(response.json().await.context("Failed to parse file status")?)
    }

    /// Poll an uploaded file until it leaves the PROCESSING state
    pub async fn wait_for_file_active(&self, mut file: GeminiFile) -> Result<GeminiFile> {
        while file.state.as_deref() == Some("PROCESSING") {
            sleep(FILE_POLL_INTERVAL).await;
            file = self.get_file(&file.name).await?;
        }

        if file.state.as_deref() == Some("FAILED") {
            return Err(CastscribeError::FileProcessingFailed(file.name).into());
        }

        Ok(file)
    }

    pub async fn delete_file(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.api_url(name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to delete file")?;

        check_response(response).await?;
        Ok(())
    }

    /// Download the content behind a Files API URI
    pub async fn download_file_content(&self, uri: &str) -> Result<String> {
        let response = self
            .http
            .get(uri)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Failed to download file content")?;

        let response = check_response(response).await?;

        Ok(response.text().await?)
    }
}

/// Surface non-success responses with the (truncated) error body
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("Gemini API error {}: {}", status, truncate_chars(&body, 500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_prompt_matrix() {
        assert!(build_prompt(true, true).contains("Speaker A/B/C"));
        assert!(build_prompt(true, true).contains("[MM:SS]"));

        assert!(build_prompt(true, false).contains("[MM:SS] <text>"));
        assert!(!build_prompt(true, false).contains("Speaker"));

        assert!(build_prompt(false, true).contains("speaker diarization"));
        assert!(!build_prompt(false, true).contains("[MM:SS]"));

        assert_eq!(
            build_prompt(false, false),
            "Please transcribe this audio file accurately."
        );
    }

    #[test]
    fn test_mime_type_for_extension() {
        assert_eq!(mime_type_for(&PathBuf::from("a.mp3")), "audio/mpeg");
        assert_eq!(mime_type_for(&PathBuf::from("a.M4A")), "audio/mp4");
        assert_eq!(mime_type_for(&PathBuf::from("a.wav")), "audio/wav");
        assert_eq!(mime_type_for(&PathBuf::from("a.unknown")), "audio/mpeg");
        assert_eq!(mime_type_for(&PathBuf::from("noext")), "audio/mpeg");
    }

    #[test]
    fn test_extract_text_concatenates_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {
                        "parts": [{"text": "Hello "}, {"text": "world"}]
                    }
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(extract_text(&response), "Hello world");
    }

    #[test]
    fn test_extract_text_empty_response() {
        let response: GenerateContentResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(extract_text(&response), "");
    }
}
