//! VOICEVOX engine integration for Miharu
//!
//! Drives the two-step VOICEVOX HTTP protocol: `/audio_query` builds an
//! engine-defined synthesis query for a text/speaker pair, and
//! `/synthesis` renders that query to WAV audio.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use bytes::Bytes;
use miharu_core::{AudioData, AudioFormat, MiharuError, Result, SpeechSynthesizer};
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Shared HTTP client for connection pooling
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> Client {
    HTTP_CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to create HTTP client")
        })
        .clone()
}

/// Sample rate assumed when the engine query does not carry one
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// VOICEVOX engine configuration
#[derive(Debug, Clone)]
pub struct VoicevoxConfig {
    /// Engine base URL
    pub endpoint: String,
    /// Whether to enable rising intonation on interrogative sentences
    pub interrogative_upspeak: bool,
}

impl Default for VoicevoxConfig {
    fn default() -> Self {
        Self {
            endpoint: miharu_core::config::DEFAULT_VOICEVOX_URL.to_string(),
            interrogative_upspeak: true,
        }
    }
}

/// VOICEVOX engine client
pub struct VoicevoxClient {
    config: VoicevoxConfig,
    client: Client,
}

impl VoicevoxClient {
    /// Create a client for the given engine endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(VoicevoxConfig {
            endpoint: endpoint.into(),
            ..Default::default()
        })
    }

    /// Create a client with full configuration
    pub fn with_config(config: VoicevoxConfig) -> Self {
        Self {
            config,
            client: get_http_client(),
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Build the engine synthesis query for a text/speaker pair
    ///
    /// The returned JSON is engine-defined and passed back verbatim to
    /// [`Self::synthesis`].
    pub async fn audio_query(&self, text: &str, speaker_id: u32) -> Result<serde_json::Value> {
        let speaker = speaker_id.to_string();
        let resp = self
            .client
            .post(self.build_url("/audio_query"))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await
            .map_err(|e| MiharuError::synthesis(format!("audio_query request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MiharuError::synthesis(format!(
                "audio_query error ({}): {}",
                status, body
            )));
        }

        resp.json()
            .await
            .map_err(|e| MiharuError::synthesis(format!("audio_query returned bad JSON: {}", e)))
    }

    /// Render a synthesis query to WAV bytes
    pub async fn synthesis(
        &self,
        query: &serde_json::Value,
        speaker_id: u32,
    ) -> Result<Bytes> {
        let speaker = speaker_id.to_string();
        let upspeak = if self.config.interrogative_upspeak {
            "true"
        } else {
            "false"
        };
        let resp = self
            .client
            .post(self.build_url("/synthesis"))
            .query(&[
                ("speaker", speaker.as_str()),
                ("enable_interrogative_upspeak", upspeak),
            ])
            .json(query)
            .send()
            .await
            .map_err(|e| MiharuError::synthesis(format!("synthesis request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MiharuError::synthesis(format!(
                "synthesis error ({}): {}",
                status, body
            )));
        }

        resp.bytes()
            .await
            .map_err(|e| MiharuError::synthesis(format!("synthesis body read failed: {}", e)))
    }
}

/// Sample rate declared by an audio query, or the engine default
fn sampling_rate(query: &serde_json::Value) -> u32 {
    query
        .get("outputSamplingRate")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

#[async_trait]
impl SpeechSynthesizer for VoicevoxClient {
    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<AudioData> {
        let query = self.audio_query(text, speaker_id).await?;
        let sample_rate = sampling_rate(&query);
        let data = self.synthesis(&query, speaker_id).await?;
        tracing::debug!(
            speaker_id,
            bytes = data.len(),
            sample_rate,
            "synthesized speech"
        );
        Ok(AudioData {
            data,
            format: AudioFormat::Wav,
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_strips_trailing_slash() {
        let client = VoicevoxClient::new("http://localhost:50021/");
        assert_eq!(
            client.build_url("/audio_query"),
            "http://localhost:50021/audio_query"
        );
    }

    #[test]
    fn test_default_config_endpoint() {
        let config = VoicevoxConfig::default();
        assert_eq!(config.endpoint, "http://localhost:50021");
        assert!(config.interrogative_upspeak);
    }

    #[test]
    fn test_sampling_rate_from_query() {
        let query = serde_json::json!({"outputSamplingRate": 48000, "speedScale": 1.0});
        assert_eq!(sampling_rate(&query), 48000);
    }

    #[test]
    fn test_sampling_rate_default() {
        let query = serde_json::json!({"speedScale": 1.0});
        assert_eq!(sampling_rate(&query), DEFAULT_SAMPLE_RATE);
    }
}
