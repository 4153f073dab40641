//! Configuration management and environment variable loading

use crate::{MiharuError, Result};
use std::env;
use std::path::PathBuf;

/// Default VOICEVOX engine endpoint
pub const DEFAULT_VOICEVOX_URL: &str = "http://localhost:50021";

/// Default persona configuration file path
pub const DEFAULT_CHARACTERS_PATH: &str = "config/characters.json";

/// Load environment variables from a .env file
///
/// Variables from the process environment always win over the file.
/// A missing .env file is not an error; a malformed one is.
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(MiharuError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(MiharuError::config(format!(
            "Failed to load .env file: {}",
            e
        ))),
    }
}

/// Get required environment variable
///
/// Returns an error if the variable is not set or blank.
pub fn get_required_env(key: &str) -> Result<String> {
    let value = env::var(key).map_err(|_| {
        MiharuError::config(format!(
            "Required environment variable '{}' is not set. \
             Check your .env file or system environment.",
            key
        ))
    })?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(MiharuError::config(format!(
            "Required environment variable '{}' is empty",
            key
        )));
    }
    Ok(value)
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Get a required environment variable parsed as a Discord snowflake id
pub fn get_required_id(key: &str) -> Result<u64> {
    let raw = get_required_env(key)?;
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(MiharuError::config(format!(
            "Environment variable '{}' must be a non-zero Discord id, got '{}'",
            key, raw
        ))),
        Ok(id) => Ok(id),
    }
}

/// Get an optional environment variable parsed as a Discord snowflake id
///
/// Unset or blank is `None`; present but non-numeric is an error.
pub fn get_optional_id(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(None);
            }
            match raw.parse::<u64>() {
                Ok(0) | Err(_) => Err(MiharuError::config(format!(
                    "Environment variable '{}' must be a non-zero Discord id, got '{}'",
                    key, raw
                ))),
                Ok(id) => Ok(Some(id)),
            }
        }
    }
}

/// Bot configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Discord bot token
    pub discord_token: String,
    /// The single user whose presence/voice activity is tracked
    pub target_user_id: u64,
    /// The voice channel the bot joins and speaks in
    pub voice_channel_id: u64,
    /// Optional text channel for embed replies
    pub text_channel_id: Option<u64>,
    /// Gemini API key for dialogue generation
    pub gemini_api_key: String,
    /// VOICEVOX engine base URL
    pub voicevox_url: String,
    /// Path to the persona configuration file
    pub characters_path: PathBuf,
}

impl BotConfig {
    /// Load configuration from environment variables
    ///
    /// Required: `DISCORD_TOKEN`, `TARGET_USER_ID`, `VOICE_CHANNEL_ID`,
    /// `GEMINI_API_KEY`. Optional: `TEXT_CHANNEL_ID`,
    /// `VOICEVOX_ENGINE_URL` (default `http://localhost:50021`),
    /// `CHARACTERS_PATH` (default `config/characters.json`).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            discord_token: get_required_env("DISCORD_TOKEN")?,
            target_user_id: get_required_id("TARGET_USER_ID")?,
            voice_channel_id: get_required_id("VOICE_CHANNEL_ID")?,
            text_channel_id: get_optional_id("TEXT_CHANNEL_ID")?,
            gemini_api_key: get_required_env("GEMINI_API_KEY")?,
            voicevox_url: get_env_or("VOICEVOX_ENGINE_URL", DEFAULT_VOICEVOX_URL),
            characters_path: PathBuf::from(get_env_or(
                "CHARACTERS_PATH",
                DEFAULT_CHARACTERS_PATH,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_or() {
        env::set_var("MIHARU_TEST_STRING", "hello");
        assert_eq!(get_env_or("MIHARU_TEST_STRING", "default"), "hello");
        assert_eq!(get_env_or("MIHARU_TEST_NONEXISTENT", "default"), "default");
        env::remove_var("MIHARU_TEST_STRING");
    }

    #[test]
    fn test_get_required_env_rejects_blank() {
        env::set_var("MIHARU_TEST_BLANK", "   ");
        assert!(get_required_env("MIHARU_TEST_BLANK").is_err());
        env::remove_var("MIHARU_TEST_BLANK");
        assert!(get_required_env("MIHARU_TEST_MISSING").is_err());
    }

    #[test]
    fn test_get_required_id() {
        env::set_var("MIHARU_TEST_ID", "123456789012345678");
        assert_eq!(get_required_id("MIHARU_TEST_ID").unwrap(), 123456789012345678);
        env::set_var("MIHARU_TEST_ID", "not-a-number");
        assert!(get_required_id("MIHARU_TEST_ID").is_err());
        env::set_var("MIHARU_TEST_ID", "0");
        assert!(get_required_id("MIHARU_TEST_ID").is_err());
        env::remove_var("MIHARU_TEST_ID");
    }

    #[test]
    fn test_bot_config_from_env() {
        env::set_var("DISCORD_TOKEN", "test-token");
        env::set_var("TARGET_USER_ID", "111111111111111111");
        env::set_var("VOICE_CHANNEL_ID", "222222222222222222");
        env::set_var("GEMINI_API_KEY", "test-key");
        env::remove_var("VOICEVOX_ENGINE_URL");
        env::remove_var("TEXT_CHANNEL_ID");
        env::remove_var("CHARACTERS_PATH");

        let config = BotConfig::from_env().unwrap();
        assert_eq!(config.discord_token, "test-token");
        assert_eq!(config.target_user_id, 111111111111111111);
        assert_eq!(config.voice_channel_id, 222222222222222222);
        assert_eq!(config.text_channel_id, None);
        assert_eq!(config.voicevox_url, DEFAULT_VOICEVOX_URL);
        assert_eq!(
            config.characters_path,
            PathBuf::from(DEFAULT_CHARACTERS_PATH)
        );
    }

    #[test]
    fn test_get_optional_id() {
        assert_eq!(get_optional_id("MIHARU_TEST_OPT_MISSING").unwrap(), None);
        env::set_var("MIHARU_TEST_OPT_ID", "42");
        assert_eq!(get_optional_id("MIHARU_TEST_OPT_ID").unwrap(), Some(42));
        env::set_var("MIHARU_TEST_OPT_ID", "abc");
        assert!(get_optional_id("MIHARU_TEST_OPT_ID").is_err());
        env::remove_var("MIHARU_TEST_OPT_ID");
    }
}
