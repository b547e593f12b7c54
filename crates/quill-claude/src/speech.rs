//! Speech-to-text client for voice and video-note transcription.
//!
//! Speaks the common `/v1/audio/transcriptions` multipart protocol
//! (verbose JSON response carries duration and detected language).

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use quill_core::retry::RetryPolicy;
use quill_core::Usd;

use crate::client::{check_status, ClaudeError};

/// Per-minute transcription price, USD.
const PRICE_PER_MINUTE: &str = "0.006";

#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub duration_seconds: f64,
    pub language: Option<String>,
    pub cost_usd: Usd,
}

#[derive(Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl SpeechClient {
    pub fn new(base_url: String, api_key: String, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model: "whisper-1".to_string(),
            retry,
        }
    }

    /// Transcribe an audio payload. Billing is per started second.
    pub async fn transcribe(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Transcript, ClaudeError> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url);

        let raw: RawTranscription = self
            .retry
            .run("speech", ClaudeError::is_retryable, || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.to_string())
                    .mime_str(mime_type)
                    .unwrap_or_else(|_| {
                        reqwest::multipart::Part::bytes(bytes.clone())
                            .file_name(filename.to_string())
                    });
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("model", self.model.clone())
                    .text("response_format", "verbose_json");
                let req = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .multipart(form);
                async move {
                    let resp = check_status(req.send().await?).await?;
                    resp.json::<RawTranscription>()
                        .await
                        .map_err(|e| ClaudeError::Parse(e.to_string()))
                }
            })
            .await?;

        let duration = raw.duration.unwrap_or(0.0);
        let cost = transcription_cost(duration);
        info!(
            duration_s = duration,
            language = raw.language.as_deref().unwrap_or("unknown"),
            cost_usd = %cost,
            "transcription complete"
        );

        Ok(Transcript {
            text: raw.text,
            duration_seconds: duration,
            language: raw.language,
            cost_usd: cost,
        })
    }
}

/// duration/60 · per-minute price, 4-dp half-up.
pub fn transcription_cost(duration_seconds: f64) -> Usd {
    let per_minute: Decimal = PRICE_PER_MINUTE.parse().expect("const price");
    let minutes = Decimal::try_from(duration_seconds / 60.0).unwrap_or(Decimal::ZERO);
    Usd::new(per_minute * minutes)
}

#[derive(Deserialize)]
struct RawTranscription {
    text: String,
    duration: Option<f64>,
    language: Option<String>,
}
