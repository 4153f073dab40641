//! Miharu Core
//!
//! Core types and logic for the Miharu companion bot:
//!
//! - Environment configuration and persona registry loading
//! - The attendance state machine debouncing the tracked user's
//!   voice-channel joins and leaves
//! - Character rotation and bounded conversation history
//! - The conversation engine tying dialogue generation and speech
//!   synthesis into fail-soft turns
//!
//! Platform and service specifics live in the adaptor and provider
//! crates; this crate has no Discord, Gemini or VOICEVOX knowledge
//! beyond the trait seams they implement.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod character;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
pub mod logger;
pub mod presence;

// Re-export main types
pub use character::{Character, CharacterRegistry, CharacterRotation};
pub use config::{load_env, BotConfig};
pub use conversation::{ConversationEntry, ConversationHistory};
pub use dialogue::{
    AudioData, AudioFormat, ConversationEngine, DialogueGenerator, DialogueRequest,
    SpeechSynthesizer, SpokenLine, Utterance,
};
pub use error::{MiharuError, Result};
pub use logger::init_logging;
pub use presence::{
    AttendanceMachine, AttendanceState, GameActivity, GameChange, PresenceActions,
    PresenceWatcher, VoiceEvent, JOIN_DEBOUNCE, LEAVE_DEBOUNCE,
};
