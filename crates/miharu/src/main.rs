//! Miharu entry point
//!
//! Watches one Discord user's presence and voice activity and chats
//! back through VOICEVOX personas in a voice channel.

use clap::Parser;
use miharu_adaptor_discord::{build_client, DiscordConfig};
use miharu_core::{init_logging, BotConfig, CharacterRegistry, ConversationEngine};
use miharu_provider_gemini::GeminiClient;
use miharu_provider_voicevox::VoicevoxClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "miharu", about = "Discord companion bot speaking VOICEVOX voices")]
struct Cli {
    /// Log level used when MIHARU_LOG_LEVEL/RUST_LOG are unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Persona configuration file (overrides CHARACTERS_PATH)
    #[arg(long)]
    characters: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if std::env::var("MIHARU_LOG_LEVEL").is_err() {
        std::env::set_var("MIHARU_LOG_LEVEL", &cli.log_level);
    }
    init_logging();

    let mut config = BotConfig::from_env().map_err(|e| {
        error!(error = %e, "invalid configuration");
        e
    })?;
    if let Some(path) = cli.characters {
        config.characters_path = path;
    }

    let registry = CharacterRegistry::load(&config.characters_path).map_err(|e| {
        error!(error = %e, "failed to load persona registry");
        e
    })?;

    let generator = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
    let synthesizer = Arc::new(VoicevoxClient::new(config.voicevox_url.clone()));
    let engine = Arc::new(ConversationEngine::new(registry, generator, synthesizer));

    info!(
        target_user_id = config.target_user_id,
        voice_channel_id = config.voice_channel_id,
        voicevox_url = %config.voicevox_url,
        "starting miharu"
    );

    let mut client = build_client(DiscordConfig::from_bot_config(&config), engine)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to build Discord client");
            e
        })?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.map_err(|e| {
        error!(error = %e, "client error");
        e
    })?;

    info!("miharu stopped");
    Ok(())
}
