//! Discord voice session management
//!
//! The bot owns at most one voice connection at a time. Utterances go
//! through songbird's built-in track queue, so playback is strictly
//! sequential and never overlaps.

use miharu_core::{AudioData, MiharuError, Result};
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::Input;
use songbird::Songbird;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The live voice connection
#[derive(Debug)]
pub struct VoiceSession {
    /// Guild the bot is connected in
    pub guild_id: u64,
    /// Voice channel the bot is connected to
    pub channel_id: u64,
    /// When the bot joined
    pub joined_at: Instant,
}

impl VoiceSession {
    fn new(guild_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            channel_id,
            joined_at: Instant::now(),
        }
    }
}

/// Owns the lifecycle of the bot's single voice connection
#[derive(Default)]
pub struct VoiceManager {
    songbird: RwLock<Option<Arc<Songbird>>>,
    session: RwLock<Option<VoiceSession>>,
}

impl VoiceManager {
    /// Create a manager with no voice backend yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the songbird instance once the gateway is up
    pub async fn install_songbird(&self, songbird: Arc<Songbird>) {
        *self.songbird.write().await = Some(songbird);
    }

    /// Whether a voice session is currently live
    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn songbird(&self) -> Result<Arc<Songbird>> {
        self.songbird
            .read()
            .await
            .clone()
            .ok_or_else(|| MiharuError::connection("songbird not initialized"))
    }

    /// Join the given voice channel; a no-op when already connected there
    pub async fn ensure_connected(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        let songbird = self.songbird().await?;

        {
            let session = self.session.read().await;
            if let Some(current) = session.as_ref() {
                if current.channel_id == channel_id
                    && songbird.get(GuildId::new(current.guild_id)).is_some()
                {
                    debug!(channel_id, "already connected to voice channel");
                    return Ok(());
                }
            }
        }

        match songbird
            .join(GuildId::new(guild_id), ChannelId::new(channel_id))
            .await
        {
            Ok(_call) => {
                *self.session.write().await = Some(VoiceSession::new(guild_id, channel_id));
                info!(guild_id, channel_id, "joined voice channel");
                Ok(())
            }
            Err(e) => Err(MiharuError::connection(format!(
                "failed to join voice channel {}: {}",
                channel_id, e
            ))),
        }
    }

    /// Queue audio for sequential playback
    ///
    /// Failures (no backend, no live call) are logged and the utterance
    /// dropped; playback problems never propagate to the caller.
    pub async fn play(&self, audio: AudioData) {
        let songbird = match self.songbird().await {
            Ok(s) => s,
            Err(_) => {
                warn!("voice backend not ready, dropping utterance");
                return;
            }
        };
        let guild_id = match self.session.read().await.as_ref() {
            Some(session) => session.guild_id,
            None => {
                warn!("no voice session, dropping utterance");
                return;
            }
        };
        let call_lock = match songbird.get(GuildId::new(guild_id)) {
            Some(call) => call,
            None => {
                warn!(guild_id, "voice connection dropped, discarding utterance");
                return;
            }
        };

        let audio_size = audio.data.len();
        let audio_bytes: &'static [u8] = Box::leak(audio.data.to_vec().into_boxed_slice());
        let input: Input = audio_bytes.into();

        let mut call = call_lock.lock().await;
        let _handle = call.enqueue_input(input).await;
        info!(guild_id, bytes = audio_size, "queued utterance for playback");
    }

    /// Release the voice connection; a no-op when not connected
    pub async fn disconnect(&self) {
        let session = self.session.write().await.take();
        let Some(session) = session else {
            debug!("disconnect requested with no live session");
            return;
        };

        match self.songbird().await {
            Ok(songbird) => {
                if let Err(e) = songbird.remove(GuildId::new(session.guild_id)).await {
                    warn!(error = %e, "error leaving voice channel");
                }
                info!(guild_id = session.guild_id, "left voice channel");
            }
            Err(_) => warn!("voice backend not ready during disconnect"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use miharu_core::AudioFormat;

    fn test_audio() -> AudioData {
        AudioData {
            data: Bytes::from_static(b"RIFFxxxxWAVE"),
            format: AudioFormat::Wav,
            sample_rate: 24000,
        }
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let manager = VoiceManager::new();
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_without_backend_fails() {
        let manager = VoiceManager::new();
        let err = manager.ensure_connected(1, 2).await.unwrap_err();
        assert!(matches!(err, MiharuError::Connection(_)));
    }

    #[tokio::test]
    async fn test_play_without_session_is_silent() {
        let manager = VoiceManager::new();
        // Logged and dropped, never panics or errors.
        manager.play(test_audio()).await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = VoiceManager::new();
        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_connected().await);
    }
}
