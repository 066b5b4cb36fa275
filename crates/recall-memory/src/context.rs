//! Context window budgeting.
//!
//! Token accounting over message sequences and a two-tier compression that
//! fits a history inside a token budget: a sliding window of the most recent
//! messages, backed by a hard cap that bounds the result even when a single
//! message is larger than the whole budget.
//!
//! Compression here is heuristic truncation, not summarization; the hard-cap
//! tier is the seam where an abstractive pass could slot in.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, CoreBPE};

use recall_core::config::BudgetSettings;
use recall_core::{Message, Role};

// The vocabulary is embedded in the binary; construction only parses it.
static BPE: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("embedded cl100k_base vocabulary"));

/// Tuning for token accounting and compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum tokens a prepared context may occupy.
    pub max_context_tokens: usize,
    /// Fixed framing overhead counted per message.
    pub per_message_overhead: usize,
    /// Fixed overhead counted once per sequence for priming the reply.
    pub reply_priming_overhead: usize,
    /// Unconditional tail length kept by the hard-cap tier.
    pub hard_cap_tail: usize,
    /// Usage ratio at which budget pressure is logged. Observability only;
    /// never enforced as a limit.
    pub compression_trigger_ratio: f32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 4000,
            per_message_overhead: 4,
            reply_priming_overhead: 3,
            hard_cap_tail: 5,
            compression_trigger_ratio: 0.8,
        }
    }
}

impl BudgetConfig {
    /// Build from loaded settings, keeping the framing constants at their
    /// defaults.
    pub fn from_settings(settings: &BudgetSettings) -> Self {
        Self {
            max_context_tokens: settings.max_context_tokens,
            hard_cap_tail: settings.hard_cap_tail,
            compression_trigger_ratio: settings.compression_trigger_ratio,
            ..Self::default()
        }
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, Copy)]
pub struct BudgetCheck {
    /// Framed token count of the sequence.
    pub token_count: usize,
    /// Whether the sequence exceeds the given budget.
    pub is_over_budget: bool,
}

/// Read-only usage statistics for a message sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    /// Framed token count of the sequence.
    pub token_count: usize,
    /// Number of messages.
    pub message_count: usize,
    /// Message count per role.
    pub role_counts: HashMap<Role, usize>,
    /// Whether the sequence exceeds the configured budget.
    pub is_over_budget: bool,
    /// Token count as a fraction of the configured budget.
    pub budget_ratio: f64,
}

/// Token accounting and compression for message sequences.
///
/// All operations are pure: no store access, deterministic for identical
/// input.
pub struct ContextBudgeter {
    config: BudgetConfig,
}

impl ContextBudgeter {
    /// Create a budgeter with default tuning.
    pub fn new() -> Self {
        Self {
            config: BudgetConfig::default(),
        }
    }

    /// Create a budgeter with custom tuning.
    pub fn with_config(config: BudgetConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Count tokens in a text.
    pub fn count_tokens(&self, text: &str) -> usize {
        BPE.encode_ordinary(text).len()
    }

    /// Count the framed tokens of a message sequence: content tokens plus a
    /// fixed per-message overhead, plus a fixed reply-priming overhead for
    /// the sequence. An empty sequence counts zero.
    pub fn count_messages_tokens(&self, messages: &[Message]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        let content: usize = messages
            .iter()
            .map(|m| self.count_tokens(&m.content) + self.config.per_message_overhead)
            .sum();
        content + self.config.reply_priming_overhead
    }

    /// Check a sequence against a token budget.
    pub fn check_budget(&self, messages: &[Message], max_tokens: usize) -> BudgetCheck {
        let token_count = self.count_messages_tokens(messages);
        BudgetCheck {
            token_count,
            is_over_budget: token_count > max_tokens,
        }
    }

    /// Compress a sequence to fit the budget.
    ///
    /// Under budget, the input is returned unchanged. Otherwise the most
    /// recent messages that fit are kept (sliding window); if even that
    /// result is over budget - a single message larger than the whole
    /// budget - the hard cap keeps any leading system messages plus an
    /// unconditional tail of the newest messages, token math disregarded.
    ///
    /// The output is always chronological, never empty for a non-empty
    /// input, and always contains the input's final message. Oversized
    /// content is kept intact rather than truncated.
    pub fn compress(&self, messages: &[Message], max_tokens: usize) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let check = self.check_budget(messages, max_tokens);
        if !check.is_over_budget {
            let ratio = check.token_count as f32 / max_tokens.max(1) as f32;
            if ratio >= self.config.compression_trigger_ratio {
                tracing::debug!(
                    tokens = check.token_count,
                    max_tokens,
                    "Context approaching token budget"
                );
            }
            return messages.to_vec();
        }

        tracing::warn!(
            tokens = check.token_count,
            max_tokens,
            messages = messages.len(),
            "Context over token budget, compressing"
        );

        let window = self.sliding_window(messages, max_tokens);
        if !window.is_empty() && !self.check_budget(&window, max_tokens).is_over_budget {
            return window;
        }

        self.hard_cap(messages)
    }

    /// Read-only usage statistics against the configured budget.
    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        let token_count = self.count_messages_tokens(messages);
        let mut role_counts = HashMap::new();
        for message in messages {
            *role_counts.entry(message.role).or_insert(0) += 1;
        }

        let max = self.config.max_context_tokens;
        ContextStats {
            token_count,
            message_count: messages.len(),
            role_counts,
            is_over_budget: token_count > max,
            budget_ratio: token_count as f64 / max.max(1) as f64,
        }
    }

    /// Walk newest to oldest, keeping messages while the running framed
    /// total stays within the budget. Output is chronological.
    fn sliding_window(&self, messages: &[Message], max_tokens: usize) -> Vec<Message> {
        let mut total = self.config.reply_priming_overhead;
        let mut kept = Vec::new();

        for message in messages.iter().rev() {
            let cost = self.count_tokens(&message.content) + self.config.per_message_overhead;
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            kept.push(message.clone());
        }

        kept.reverse();
        kept
    }

    /// Keep the leading run of system messages plus the newest
    /// `hard_cap_tail` messages, regardless of token counts. Guarantees a
    /// bounded, non-empty result that ends with the input's final message.
    fn hard_cap(&self, messages: &[Message]) -> Vec<Message> {
        let tail_start = messages.len().saturating_sub(self.config.hard_cap_tail);

        let mut result: Vec<Message> = messages[..tail_start]
            .iter()
            .take_while(|m| m.role == Role::System)
            .cloned()
            .collect();
        result.extend(messages[tail_start..].iter().cloned());
        result
    }
}

impl Default for ContextBudgeter {
    fn default() -> Self {
        Self::new()
    }
}
