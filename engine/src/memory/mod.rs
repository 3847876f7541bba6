//! Conversation memory
//!
//! Keeps the most recent turns of every conversation, keyed by conversation id.
//! Each conversation is a FIFO bounded by `max_turns`: appending past the bound
//! evicts the oldest turn. Conversations never share turns.
//!
//! The whole map sits behind one lock, which also serializes appends to the
//! same conversation. A user/assistant exchange is appended in one call so
//! concurrent completions cannot interleave their pairs.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::llm::{estimate_tokens, Message, MessageRole};

/// One recorded turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, content)
    }

    pub fn assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::Assistant, content)
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Short description of a stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub turn_count: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub estimated_tokens: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

pub struct ConversationMemory {
    max_turns: usize,
    conversations: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
}

impl ConversationMemory {
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_max_turns(config.max_turns)
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a single turn, evicting the oldest one past the bound
    pub fn append(&self, conversation_id: &str, turn: ConversationTurn) {
        self.append_all(conversation_id, std::iter::once(turn));
    }

    /// Append several turns to one conversation atomically
    pub fn append_all(
        &self,
        conversation_id: &str,
        turns: impl IntoIterator<Item = ConversationTurn>,
    ) {
        let mut conversations = self.conversations.lock();
        let history = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_turns));

        for turn in turns {
            if history.len() >= self.max_turns {
                history.pop_front();
            }
            history.push_back(turn);
        }
    }

    /// Most recent turns, oldest first. Unknown ids yield an empty list.
    pub fn get_context(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        self.conversations
            .lock()
            .get(conversation_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Turns converted to provider messages, oldest first
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .get(conversation_id)
            .map(|h| h.iter().map(ConversationTurn::to_message).collect())
            .unwrap_or_default()
    }

    /// Replace a conversation with previously persisted turns
    pub fn restore(&self, conversation_id: &str, turns: Vec<ConversationTurn>) {
        let skip = turns.len().saturating_sub(self.max_turns);
        let history: VecDeque<_> = turns.into_iter().skip(skip).collect();
        self.conversations
            .lock()
            .insert(conversation_id.to_string(), history);
    }

    pub fn clear(&self, conversation_id: &str) -> bool {
        self.conversations.lock().remove(conversation_id).is_some()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn summary(&self, conversation_id: &str) -> ConversationSummary {
        let conversations = self.conversations.lock();
        let history = conversations.get(conversation_id);
        let turns = || history.into_iter().flatten();

        ConversationSummary {
            conversation_id: conversation_id.to_string(),
            turn_count: turns().count(),
            user_turns: turns().filter(|t| t.role == MessageRole::User).count(),
            assistant_turns: turns()
                .filter(|t| t.role == MessageRole::Assistant)
                .count(),
            estimated_tokens: turns().map(|t| estimate_tokens(&t.content)).sum(),
            last_activity: turns().map(|t| t.timestamp).max(),
        }
    }
}
