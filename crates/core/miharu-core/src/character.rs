//! Persona definitions, registry loading and speaker rotation

use crate::{MiharuError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A dialogue persona with its own voice and personality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    /// Display name, used as the speaker label and embed author
    pub name: String,
    /// Personality description fed to the dialogue generator
    pub personality: String,
    /// VOICEVOX speaker id used for synthesis
    pub voicevox_speaker_id: u32,
    /// Embed color as a hex string, e.g. "FF5733"
    pub color: String,
    /// Canned lines used when dialogue generation fails
    pub phrases: Vec<String>,
    /// Relationship label toward the tracked user
    pub relationship: String,
}

impl Character {
    /// Parse the hex color string into an RGB value
    pub fn color_value(&self) -> Option<u32> {
        let hex = self
            .color
            .trim_start_matches('#')
            .trim_start_matches("0x");
        u32::from_str_radix(hex, 16).ok()
    }

    /// Pick a random canned phrase
    ///
    /// The registry guarantees a non-empty phrase list at load time.
    pub fn random_phrase(&self) -> &str {
        self.phrases
            .choose(&mut rand::thread_rng())
            .map(|s| s.as_str())
            .unwrap_or_default()
    }
}

/// Shape of the persona configuration file
#[derive(Debug, Deserialize)]
struct CharacterFile {
    characters: Vec<Character>,
}

/// Immutable set of personas loaded once at startup
#[derive(Debug, Clone)]
pub struct CharacterRegistry {
    characters: Vec<Character>,
}

impl CharacterRegistry {
    /// Load the registry from a persona JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MiharuError::config(format!(
                "Failed to read persona file {}: {}",
                path.display(),
                e
            ))
        })?;
        let registry = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            characters = registry.len(),
            "Loaded persona registry"
        );
        Ok(registry)
    }

    /// Parse and validate the registry from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let file: CharacterFile = serde_json::from_str(content)
            .map_err(|e| MiharuError::config(format!("Malformed persona file: {}", e)))?;
        let registry = Self {
            characters: file.characters,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        if self.characters.is_empty() {
            return Err(MiharuError::config(
                "Persona file contains no characters",
            ));
        }
        for character in &self.characters {
            if character.name.trim().is_empty() {
                return Err(MiharuError::config("Persona with empty name"));
            }
            if character.phrases.is_empty() {
                return Err(MiharuError::config(format!(
                    "Persona '{}' has no fallback phrases",
                    character.name
                )));
            }
            if character.color_value().is_none() {
                return Err(MiharuError::config(format!(
                    "Persona '{}' has invalid color '{}'",
                    character.name, character.color
                )));
            }
        }
        Ok(())
    }

    /// Number of personas
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    /// Whether the registry is empty (never true after validation)
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Persona at the given index
    pub fn get(&self, index: usize) -> Option<&Character> {
        self.characters.get(index)
    }

    /// All personas in declaration order
    pub fn all(&self) -> &[Character] {
        &self.characters
    }
}

/// Explicit rotation state: the index of the persona that spoke last
///
/// Selection is uniform-random among the personas that did not speak on
/// the previous turn, so with two or more personas the same one never
/// speaks twice in a row. A single-persona registry always yields that
/// persona.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterRotation {
    last: Option<usize>,
}

impl CharacterRotation {
    /// Fresh rotation state with no previous speaker
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next speaker from the registry
    pub fn next<'a>(&mut self, registry: &'a CharacterRegistry) -> &'a Character {
        let n = registry.len();
        debug_assert!(n > 0, "registry validated non-empty at load");
        let mut rng = rand::thread_rng();
        let index = match self.last {
            Some(last) if n > 1 => {
                // Draw from the n-1 eligible indices, skipping over `last`.
                let pick = rng.gen_range(0..n - 1);
                if pick >= last {
                    pick + 1
                } else {
                    pick
                }
            }
            _ => rng.gen_range(0..n),
        };
        self.last = Some(index);
        &registry.all()[index]
    }

    /// Index of the previous speaker, if any
    pub fn last(&self) -> Option<usize> {
        self.last
    }
}
