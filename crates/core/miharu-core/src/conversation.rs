//! Bounded conversation history shared between chat and voice turns

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of retained history entries
pub const HISTORY_CAPACITY: usize = 20;

/// Number of recent entries included in dialogue prompts
pub const PROMPT_HISTORY: usize = 3;

/// One spoken or written line
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    /// Persona name that produced the line
    pub speaker: String,
    /// The line itself
    pub text: String,
    /// When the line was recorded
    pub timestamp: DateTime<Utc>,
}

/// Ring of the most recent conversation lines
#[derive(Debug, Default)]
pub struct ConversationHistory {
    entries: VecDeque<ConversationEntry>,
}

impl ConversationHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line, evicting the oldest entry past capacity
    pub fn record(&mut self, speaker: &str, text: &str) {
        self.entries.push_back(ConversationEntry {
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        while self.entries.len() > HISTORY_CAPACITY {
            self.entries.pop_front();
        }
    }

    /// The most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<ConversationEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any lines have been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
