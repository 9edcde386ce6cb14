//! Token-budgeted conversation buffer shared by the model-backed nodes of a run.
//!
//! Pinned entries (operating instructions, task context) are created once at
//! initialization and are never evicted. Everything appended afterwards is
//! replaceable history that `enforce_budget` trims oldest-first.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Speaker of a buffer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Domain tag of an entry, independent of its role.
///
/// `State` marks a rendered agent turn. Roll-back counts only these; the
/// entries that follow a state turn (its reply) are removed along with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Instruction,
    Context,
    State,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: Role,
    pub kind: EntryKind,
    pub content: String,
    pub token_cost: usize,
    pub pinned: bool,
    /// Reference to an image sent alongside the text (e.g. a page capture).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error(
        "pinned messages need {pinned_tokens} tokens but the budget is {max_tokens} (shrink the system prompt or task context)"
    )]
    PinnedOverflow {
        pinned_tokens: usize,
        max_tokens: usize,
    },
}

/// Character-based token estimate with a flat cost per attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    pub chars_per_token: usize,
    pub image_tokens: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 3,
            image_tokens: 800,
        }
    }
}

impl TokenEstimator {
    pub fn estimate(&self, content: &str, has_attachment: bool) -> usize {
        let per_token = self.chars_per_token.max(1);
        let text = content.chars().count().div_ceil(per_token);
        if has_attachment {
            text + self.image_tokens
        } else {
            text
        }
    }
}

/// Ordered message history with a running token total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuffer {
    entries: Vec<MessageEntry>,
    current_tokens: usize,
}

impl MessageBuffer {
    /// Create a buffer whose first entry is the pinned system prompt.
    ///
    /// A non-blank `context` becomes a second pinned entry.
    pub fn initialize(
        system_prompt: &str,
        context: Option<&str>,
        estimator: &TokenEstimator,
    ) -> Self {
        let mut buffer = Self {
            entries: Vec::new(),
            current_tokens: 0,
        };
        buffer.push(MessageEntry {
            role: Role::System,
            kind: EntryKind::Instruction,
            content: system_prompt.to_string(),
            token_cost: estimator.estimate(system_prompt, false),
            pinned: true,
            attachment: None,
        });
        if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
            buffer.push(MessageEntry {
                role: Role::User,
                kind: EntryKind::Context,
                content: context.to_string(),
                token_cost: estimator.estimate(context, false),
                pinned: true,
                attachment: None,
            });
        }
        buffer
    }

    /// Append a non-pinned entry. Never trims.
    pub fn append(
        &mut self,
        role: Role,
        kind: EntryKind,
        content: impl Into<String>,
        token_cost: usize,
    ) {
        self.push(MessageEntry {
            role,
            kind,
            content: content.into(),
            token_cost,
            pinned: false,
            attachment: None,
        });
    }

    /// Append a non-pinned entry carrying an image reference.
    pub fn append_with_attachment(
        &mut self,
        role: Role,
        kind: EntryKind,
        content: impl Into<String>,
        attachment: impl Into<String>,
        token_cost: usize,
    ) {
        self.push(MessageEntry {
            role,
            kind,
            content: content.into(),
            token_cost,
            pinned: false,
            attachment: Some(attachment.into()),
        });
    }

    fn push(&mut self, entry: MessageEntry) {
        self.current_tokens += entry.token_cost;
        self.entries.push(entry);
    }

    /// Drop the oldest non-pinned entries until the total fits `max_tokens`.
    ///
    /// Returns the number of entries removed, or an error when the pinned
    /// entries alone exceed the budget.
    pub fn enforce_budget(&mut self, max_tokens: usize) -> Result<usize, BudgetError> {
        let mut removed = 0;
        while self.current_tokens > max_tokens {
            let Some(idx) = self.entries.iter().position(|e| !e.pinned) else {
                return Err(BudgetError::PinnedOverflow {
                    pinned_tokens: self.current_tokens,
                    max_tokens,
                });
            };
            let entry = self.entries.remove(idx);
            self.current_tokens -= entry.token_cost;
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove up to `n` of the most recent state turns, each together with the
    /// entries that follow it. Returns how many state turns were removed.
    pub fn remove_last_state_turns(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let mut turns = 0;
        let mut cut = None;
        for (idx, entry) in self.entries.iter().enumerate().rev() {
            if entry.kind == EntryKind::State && !entry.pinned {
                turns += 1;
                cut = Some(idx);
                if turns == n {
                    break;
                }
            }
        }
        let Some(cut) = cut else {
            return 0;
        };

        let tail = self.entries.split_off(cut);
        for entry in tail {
            if entry.pinned {
                self.entries.push(entry);
            } else {
                self.current_tokens -= entry.token_cost;
            }
        }
        turns
    }

    pub fn snapshot(&self) -> Vec<MessageEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn current_tokens(&self) -> usize {
        self.current_tokens
    }

    pub fn pinned_tokens(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.pinned)
            .map(|e| e.token_cost)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
