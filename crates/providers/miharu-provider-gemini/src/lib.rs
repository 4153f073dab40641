//! Gemini (Google Generative Language API) integration for Miharu

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use miharu_core::{DialogueGenerator, DialogueRequest, MiharuError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Shared HTTP client for connection pooling
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

/// Get or initialize the shared HTTP client
fn get_http_client() -> Client {
    HTTP_CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client")
        })
        .clone()
}

/// Default generation model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Maximum reply length in characters; longer replies are cut off
pub const MAX_REPLY_CHARS: usize = 100;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create a new Gemini client with the shared connection pool
    pub fn new(api_key: String) -> Self {
        Self {
            client: get_http_client(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the generation model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the API base URL (used by tests against a stub server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Generate raw text for a prompt
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| MiharuError::generation(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MiharuError::generation(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        let response: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| MiharuError::generation(e.to_string()))?;

        extract_text(response)
    }
}

#[async_trait]
impl DialogueGenerator for GeminiClient {
    async fn generate(&self, request: DialogueRequest<'_>) -> Result<String> {
        let prompt = build_prompt(&request);
        let text = self.generate_text(&prompt).await?;
        let reply = truncate_reply(text.trim());
        tracing::debug!(
            character = %request.character.name,
            chars = reply.chars().count(),
            "generated dialogue line"
        );
        Ok(reply)
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Build the persona prompt for one dialogue turn
pub fn build_prompt(request: &DialogueRequest<'_>) -> String {
    let character = request.character;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "あなたは「{}」というキャラクターとして振る舞います。",
        character.name
    );
    let _ = writeln!(prompt, "\n## キャラクター設定");
    let _ = writeln!(prompt, "- 性格: {}", character.personality);
    let _ = writeln!(prompt, "- ユーザーとの関係: {}", character.relationship);

    let _ = writeln!(prompt, "\n## 指示");
    let _ = writeln!(prompt, "- 「{}」として一人称で話してください。", character.name);
    let _ = writeln!(prompt, "- 一つの発言は60文字以内にしてください。");
    let _ = writeln!(prompt, "- 必ず日本語で答えてください。");

    let _ = writeln!(prompt, "\n## 状況");
    match request.game {
        Some(game) => {
            let _ = writeln!(
                prompt,
                "ユーザーは現在「{}」というゲームをプレイ中です。そのゲームに触れた話題で話しかけてください。",
                game
            );
        }
        None => {
            let _ = writeln!(
                prompt,
                "ユーザーは特にゲームをプレイしていません。日常的な話題で軽く話しかけてください。"
            );
        }
    }

    if !request.history.is_empty() {
        let _ = writeln!(prompt, "\n## 直近の会話");
        for entry in request.history {
            let _ = writeln!(prompt, "{}: {}", entry.speaker, entry.text);
        }
    }

    let _ = write!(
        prompt,
        "\n「{}」としてユーザーに一言話しかけてください。",
        character.name
    );
    prompt
}

/// Cut a reply down to [`MAX_REPLY_CHARS`] characters
fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_REPLY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Pull the reply text out of the first candidate
fn extract_text(response: GenerateContentResponse) -> Result<String> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(MiharuError::generation("Gemini returned no candidates"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use miharu_core::character::Character;
    use miharu_core::conversation::ConversationEntry;

    fn test_character() -> Character {
        Character {
            name: "Metan".to_string(),
            personality: "おっとりしたお姉さん".to_string(),
            voicevox_speaker_id: 2,
            color: "FF6699".to_string(),
            phrases: vec!["あらあら".to_string()],
            relationship: "幼馴染".to_string(),
        }
    }

    #[test]
    fn test_build_prompt_with_game() {
        let character = test_character();
        let prompt = build_prompt(&DialogueRequest {
            character: &character,
            game: Some("Minecraft"),
            history: &[],
        });
        assert!(prompt.contains("Metan"));
        assert!(prompt.contains("おっとりしたお姉さん"));
        assert!(prompt.contains("Minecraft"));
        assert!(!prompt.contains("直近の会話"));
    }

    #[test]
    fn test_build_prompt_without_game() {
        let character = test_character();
        let prompt = build_prompt(&DialogueRequest {
            character: &character,
            game: None,
            history: &[],
        });
        assert!(prompt.contains("ゲームをプレイしていません"));
    }

    #[test]
    fn test_build_prompt_includes_history() {
        let character = test_character();
        let history = vec![ConversationEntry {
            speaker: "Zundamon".to_string(),
            text: "やっほーなのだ".to_string(),
            timestamp: chrono::Utc::now(),
        }];
        let prompt = build_prompt(&DialogueRequest {
            character: &character,
            game: None,
            history: &history,
        });
        assert!(prompt.contains("直近の会話"));
        assert!(prompt.contains("Zundamon: やっほーなのだ"));
    }

    #[test]
    fn test_extract_text_from_response() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "こんにちは！"}], "role": "model"},
                 "finishReason": "STOP"}
            ]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(response).unwrap(), "こんにちは！");
    }

    #[test]
    fn test_extract_text_empty_candidates_is_error() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(extract_text(response).is_err());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "前半"}, {"text": "後半"}]}}
            ]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(response).unwrap(), "前半後半");
    }

    #[test]
    fn test_truncate_reply_short_passthrough() {
        assert_eq!(truncate_reply("short"), "short");
    }

    #[test]
    fn test_truncate_reply_multibyte_safe() {
        let long: String = "あ".repeat(150);
        let truncated = truncate_reply(&long);
        assert_eq!(truncated.chars().count(), MAX_REPLY_CHARS + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "hi".to_string(),
                }],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }
}
