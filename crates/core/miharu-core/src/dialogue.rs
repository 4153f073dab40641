//! Dialogue and synthesis interfaces plus the per-turn conversation engine
//!
//! The engine is the single turn boundary: collaborator failures are
//! absorbed here. A failed LLM call degrades to a canned persona phrase,
//! a failed TTS call skips the utterance; neither propagates.

use crate::character::{Character, CharacterRegistry, CharacterRotation};
use crate::conversation::{ConversationEntry, ConversationHistory, PROMPT_HISTORY};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Container format of synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// RIFF WAV (VOICEVOX output)
    Wav,
}

/// Playable audio produced by a synthesizer
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Encoded audio bytes
    pub data: Bytes,
    /// Container format
    pub format: AudioFormat,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Everything a generator needs to produce one line
#[derive(Debug)]
pub struct DialogueRequest<'a> {
    /// The persona speaking this turn
    pub character: &'a Character,
    /// Name of the game currently being played, if any
    pub game: Option<&'a str>,
    /// Recent conversation lines, oldest first
    pub history: &'a [ConversationEntry],
}

/// External dialogue generator (LLM)
#[async_trait]
pub trait DialogueGenerator: Send + Sync {
    /// Produce one line of dialogue for the request's persona
    async fn generate(&self, request: DialogueRequest<'_>) -> Result<String>;
}

/// External speech synthesizer (TTS)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render text to playable audio with the given voice
    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<AudioData>;
}

/// One generated line attributed to a persona
#[derive(Debug, Clone)]
pub struct SpokenLine {
    /// The persona that speaks the line
    pub character: Character,
    /// The line text
    pub text: String,
}

/// A line with its synthesized audio, ready for playback
#[derive(Debug, Clone)]
pub struct Utterance {
    /// The attributed line
    pub line: SpokenLine,
    /// Synthesized audio
    pub audio: AudioData,
}

/// Runs conversational turns: rotation, generation, history, synthesis
pub struct ConversationEngine {
    registry: CharacterRegistry,
    rotation: Mutex<CharacterRotation>,
    history: Mutex<ConversationHistory>,
    generator: Arc<dyn DialogueGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl ConversationEngine {
    /// Build an engine over the given registry and collaborators
    pub fn new(
        registry: CharacterRegistry,
        generator: Arc<dyn DialogueGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            registry,
            rotation: Mutex::new(CharacterRotation::new()),
            history: Mutex::new(ConversationHistory::new()),
            generator,
            synthesizer,
        }
    }

    /// The persona registry this engine rotates over
    pub fn registry(&self) -> &CharacterRegistry {
        &self.registry
    }

    /// Compose the next line: rotate, generate (with phrase fallback),
    /// record into history
    ///
    /// Never fails: a generation error or empty reply falls back to the
    /// persona's static phrase list.
    pub async fn compose_line(&self, game: Option<&str>) -> SpokenLine {
        let character = {
            let mut rotation = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
            rotation.next(&self.registry).clone()
        };
        let history = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.recent(PROMPT_HISTORY)
        };

        let request = DialogueRequest {
            character: &character,
            game,
            history: &history,
        };
        let text = match self.generator.generate(request).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(character = %character.name, "generator returned empty line, using canned phrase");
                character.random_phrase().to_string()
            }
            Err(e) => {
                warn!(
                    character = %character.name,
                    error = %e,
                    "dialogue generation failed, falling back to canned phrase"
                );
                character.random_phrase().to_string()
            }
        };

        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.record(&character.name, &text);
        }

        SpokenLine { character, text }
    }

    /// Synthesize an already composed line
    ///
    /// Returns `None` on synthesis failure; the turn is skipped, logged.
    pub async fn voice_line(&self, line: SpokenLine) -> Option<Utterance> {
        match self
            .synthesizer
            .synthesize(&line.text, line.character.voicevox_speaker_id)
            .await
        {
            Ok(audio) => Some(Utterance { line, audio }),
            Err(e) => {
                warn!(
                    character = %line.character.name,
                    error = %e,
                    "speech synthesis failed, skipping utterance"
                );
                None
            }
        }
    }

    /// Run one full turn: compose a line and synthesize it
    pub async fn take_turn(&self, game: Option<&str>) -> Option<Utterance> {
        let line = self.compose_line(game).await;
        self.voice_line(line).await
    }
}
