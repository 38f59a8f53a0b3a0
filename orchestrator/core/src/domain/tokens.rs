// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Token Estimation
//
// Cheap character-ratio estimate used to decide whether an input fits a
// provider's effective context budget. This is not a tokenizer.

use serde::{Deserialize, Serialize};

/// Characters per token assumed by the estimator
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Fraction of the budget actually filled, leaving room for the prompt wrapper
pub const DEFAULT_BUDGET_RATIO: f64 = 0.9;

/// Estimate token count as `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_with_ratio(text, DEFAULT_CHARS_PER_TOKEN)
}

pub fn estimate_tokens_with_ratio(text: &str, chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(chars_per_token.max(1))
}

/// Input budget of one provider, in estimated tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub max_tokens: usize,
    pub chars_per_token: usize,
    pub budget_ratio: f64,
}

impl ContextBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            budget_ratio: DEFAULT_BUDGET_RATIO,
        }
    }

    pub fn with_ratio(mut self, chars_per_token: usize, budget_ratio: f64) -> Self {
        self.chars_per_token = chars_per_token.max(1);
        self.budget_ratio = budget_ratio;
        self
    }

    pub fn fits(&self, text: &str) -> bool {
        estimate_tokens_with_ratio(text, self.chars_per_token) <= self.max_tokens
    }

    /// Chunk size in characters: `max_tokens * chars_per_token * budget_ratio`
    pub fn chunk_chars(&self) -> usize {
        let raw = self.max_tokens as f64 * self.chars_per_token as f64 * self.budget_ratio;
        (raw.floor() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        // four multi-byte chars are still one token
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_budget_for_openai_default() {
        let budget = ContextBudget::new(3_000);
        assert_eq!(budget.chunk_chars(), 10_800);
        assert!(budget.fits(&"a".repeat(12_000)));
        assert!(!budget.fits(&"a".repeat(20_000)));
    }
}
