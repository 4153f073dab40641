use async_trait::async_trait;
use rand::Rng;

use miharu_core::{
    AttendanceState, BotConfig, ConversationEngine, GameActivity, GameChange, MiharuError,
    PresenceActions, PresenceWatcher, Result, VoiceEvent,
};
use serenity::all::{Colour, CreateEmbed, CreateEmbedAuthor, CreateMessage};
use serenity::client::{Client, Context, EventHandler};
use serenity::model::channel::Message;
use serenity::model::gateway::{ActivityType, GatewayIntents, Presence, Ready};
use serenity::model::voice::VoiceState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod voice;
pub use voice::{VoiceManager, VoiceSession};

use songbird::serenity::{SerenityInit, SongbirdKey};

/// Fallback embed color when a persona's hex color fails to parse
const FALLBACK_EMBED_COLOR: u32 = 0x5865F2;

/// How often the chatter loop wakes up
const CHATTER_TICK: Duration = Duration::from_secs(5);

/// Probability of an unprompted line per chatter tick
const CHATTER_PROBABILITY: f64 = 0.1;

/// Cooldown range between unprompted lines, in seconds
const CHATTER_COOLDOWN_SECS: std::ops::RangeInclusive<u64> = 10..=20;

#[derive(Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub target_user_id: u64,
    pub voice_channel_id: u64,
    /// When set, mention replies are restricted to this text channel
    pub text_channel_id: Option<u64>,
    pub intents: GatewayIntents,
}

impl DiscordConfig {
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            token: config.discord_token.clone(),
            target_user_id: config.target_user_id,
            voice_channel_id: config.voice_channel_id,
            text_channel_id: config.text_channel_id,
            intents: default_intents(),
        }
    }
}

/// Gateway intents the bot subscribes with
pub fn default_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_PRESENCES
}

/// Map a tracked user's voice-state change to a watcher event
///
/// Only transitions in and out of the tracked channel count; moves
/// between other channels and mute/deafen updates are ignored.
pub fn map_voice_event(
    old_channel: Option<u64>,
    new_channel: Option<u64>,
    tracked_channel: u64,
) -> Option<VoiceEvent> {
    let was_in = old_channel == Some(tracked_channel);
    let is_in = new_channel == Some(tracked_channel);
    match (was_in, is_in) {
        (false, true) => Some(VoiceEvent::Joined),
        (true, false) => Some(VoiceEvent::Left),
        _ => None,
    }
}

/// Extract the name of the game being played from presence activities
pub fn playing_activity<'a, I>(activities: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a ActivityType, &'a str)>,
{
    activities
        .into_iter()
        .find(|(kind, _)| **kind == ActivityType::Playing)
        .map(|(_, name)| name.to_string())
}

/// Debounced connect/disconnect actions bound to the voice pipeline
struct BotActions {
    voice: Arc<VoiceManager>,
    engine: Arc<ConversationEngine>,
    game: Arc<GameActivity>,
    voice_channel_id: u64,
    /// Guild of the tracked channel, learned from voice-state events
    guild_id: RwLock<Option<u64>>,
}

impl BotActions {
    fn set_guild(&self, guild_id: u64) {
        let mut guard = self.guild_id.write().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            info!(guild_id, "learned tracked guild from voice state");
        }
        *guard = Some(guild_id);
    }

    fn guild(&self) -> Option<u64> {
        *self.guild_id.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PresenceActions for BotActions {
    async fn connect(&self) {
        let Some(guild_id) = self.guild() else {
            warn!("tracked guild not known yet, skipping connect cycle");
            return;
        };
        match self
            .voice
            .ensure_connected(guild_id, self.voice_channel_id)
            .await
        {
            Ok(()) => {
                let game = self.game.current();
                if let Some(utterance) = self.engine.take_turn(game.as_deref()).await {
                    info!(
                        character = %utterance.line.character.name,
                        text = %utterance.line.text,
                        "speaking greeting"
                    );
                    self.voice.play(utterance.audio).await;
                }
            }
            Err(e) => warn!(error = %e, "voice connect failed, skipping this cycle"),
        }
    }

    async fn disconnect(&self) {
        self.voice.disconnect().await;
    }
}

struct Handler {
    config: DiscordConfig,
    watcher: PresenceWatcher<BotActions>,
    actions: Arc<BotActions>,
    voice: Arc<VoiceManager>,
    engine: Arc<ConversationEngine>,
    game: Arc<GameActivity>,
    chatter_started: AtomicBool,
}

impl Handler {
    /// Unprompted voice chatter while the user is present and playing
    fn spawn_chatter(&self) {
        if self.chatter_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let voice = self.voice.clone();
        let engine = self.engine.clone();
        let game = self.game.clone();
        let watcher = self.watcher.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHATTER_TICK);
            let mut next_allowed = Instant::now();
            loop {
                ticker.tick().await;
                if watcher.state().await != AttendanceState::Present {
                    continue;
                }
                if !voice.is_connected().await {
                    continue;
                }
                let Some(current_game) = game.current() else {
                    continue;
                };
                if Instant::now() < next_allowed {
                    continue;
                }
                if !rand::thread_rng().gen_bool(CHATTER_PROBABILITY) {
                    continue;
                }
                let cooldown = rand::thread_rng().gen_range(CHATTER_COOLDOWN_SECS);
                next_allowed = Instant::now() + Duration::from_secs(cooldown);

                if let Some(utterance) = engine.take_turn(Some(&current_game)).await {
                    info!(
                        character = %utterance.line.character.name,
                        text = %utterance.line.text,
                        "unprompted chatter"
                    );
                    voice.play(utterance.audio).await;
                }
            }
        });
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "bot connected");

        let songbird = {
            let data = ctx.data.read().await;
            data.get::<SongbirdKey>().cloned()
        };
        match songbird {
            Some(songbird) => self.voice.install_songbird(songbird).await,
            None => warn!("songbird not registered, voice playback disabled"),
        }

        self.spawn_chatter();
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id.get() != self.config.target_user_id {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            self.actions.set_guild(guild_id.get());
        }

        let old_channel = old.and_then(|state| state.channel_id).map(|c| c.get());
        let new_channel = new.channel_id.map(|c| c.get());
        if let Some(event) = map_voice_event(old_channel, new_channel, self.config.voice_channel_id)
        {
            info!(?event, "tracked user voice state changed");
            self.watcher.handle_event(event).await;
        }
    }

    async fn presence_update(&self, _ctx: Context, new_data: Presence) {
        if new_data.user.id.get() != self.config.target_user_id {
            return;
        }

        let game = playing_activity(
            new_data
                .activities
                .iter()
                .map(|a| (&a.kind, a.name.as_str())),
        );
        match self.game.update(game) {
            GameChange::Started(name) | GameChange::Switched(name) => {
                info!(game = %name, "tracked user started playing");
                if self.voice.is_connected().await {
                    if let Some(utterance) = self.engine.take_turn(Some(&name)).await {
                        self.voice.play(utterance.audio).await;
                    }
                }
            }
            GameChange::Stopped => {
                info!("tracked user stopped playing");
            }
            GameChange::Unchanged => {}
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if let Some(text_channel_id) = self.config.text_channel_id {
            if msg.channel_id.get() != text_channel_id {
                return;
            }
        }
        let mentioned = {
            let bot_id = ctx.cache.current_user().id;
            msg.mentions.iter().any(|user| user.id == bot_id)
        };
        if !mentioned {
            return;
        }

        debug!(author = %msg.author.name, "mention received");
        let game = self.game.current();
        let line = self.engine.compose_line(game.as_deref()).await;

        let embed = CreateEmbed::new()
            .description(line.text.as_str())
            .colour(Colour::new(
                line.character.color_value().unwrap_or(FALLBACK_EMBED_COLOR),
            ))
            .author(CreateEmbedAuthor::new(line.character.name.as_str()));
        if let Err(e) = msg
            .channel_id
            .send_message(&ctx.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(error = %e, "failed to send embed reply");
        }

        if self.voice.is_connected().await {
            if let Some(utterance) = self.engine.voice_line(line).await {
                self.voice.play(utterance.audio).await;
            }
        }
    }
}

/// Build the serenity client with songbird registered and all services
/// wired together
pub async fn build_client(config: DiscordConfig, engine: Arc<ConversationEngine>) -> Result<Client> {
    let voice = Arc::new(VoiceManager::new());
    let game = Arc::new(GameActivity::new());
    let actions = Arc::new(BotActions {
        voice: voice.clone(),
        engine: engine.clone(),
        game: game.clone(),
        voice_channel_id: config.voice_channel_id,
        guild_id: RwLock::new(None),
    });
    let watcher = PresenceWatcher::new(actions.clone());

    let handler = Handler {
        config: config.clone(),
        watcher,
        actions,
        voice,
        engine,
        game,
        chatter_started: AtomicBool::new(false),
    };

    Client::builder(&config.token, config.intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .map_err(|e| MiharuError::discord(format!("failed to create client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACKED: u64 = 100;

    #[test]
    fn test_map_voice_event_join() {
        assert_eq!(
            map_voice_event(None, Some(TRACKED), TRACKED),
            Some(VoiceEvent::Joined)
        );
        assert_eq!(
            map_voice_event(Some(999), Some(TRACKED), TRACKED),
            Some(VoiceEvent::Joined)
        );
    }

    #[test]
    fn test_map_voice_event_leave() {
        assert_eq!(
            map_voice_event(Some(TRACKED), None, TRACKED),
            Some(VoiceEvent::Left)
        );
        assert_eq!(
            map_voice_event(Some(TRACKED), Some(999), TRACKED),
            Some(VoiceEvent::Left)
        );
    }

    #[test]
    fn test_map_voice_event_ignores_unrelated_moves() {
        // Mute/deafen toggles inside the tracked channel
        assert_eq!(map_voice_event(Some(TRACKED), Some(TRACKED), TRACKED), None);
        // Activity entirely in other channels
        assert_eq!(map_voice_event(Some(999), Some(998), TRACKED), None);
        assert_eq!(map_voice_event(None, Some(999), TRACKED), None);
        assert_eq!(map_voice_event(Some(999), None, TRACKED), None);
        assert_eq!(map_voice_event(None, None, TRACKED), None);
    }

    #[test]
    fn test_playing_activity_picks_playing_kind() {
        let activities = [
            (ActivityType::Listening, "Spotify"),
            (ActivityType::Playing, "Celeste"),
        ];
        let game = playing_activity(activities.iter().map(|(k, n)| (k, *n)));
        assert_eq!(game, Some("Celeste".to_string()));
    }

    #[test]
    fn test_playing_activity_none_without_game() {
        let activities = [(ActivityType::Listening, "Spotify")];
        assert_eq!(
            playing_activity(activities.iter().map(|(k, n)| (k, *n))),
            None
        );
        assert_eq!(
            playing_activity(std::iter::empty::<(&ActivityType, &str)>()),
            None
        );
    }

    #[test]
    fn test_default_intents_include_voice_and_presence() {
        let intents = default_intents();
        assert!(intents.contains(GatewayIntents::GUILD_VOICE_STATES));
        assert!(intents.contains(GatewayIntents::GUILD_PRESENCES));
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
    }
}
