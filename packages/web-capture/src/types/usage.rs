//! Token usage accumulation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Accumulated completion-API token usage for a whole crawl/search tree.
///
/// Created once at the root call and shared (via `Arc`) down every branch;
/// every completion call adds its deltas in. Updates are additive only and
/// atomic, so concurrent branches can report usage without coordination.
#[derive(Debug, Default)]
pub struct TokenUsage {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    price_micro_cents: AtomicU64,
}

/// Token usage delta from a single completion call. Price is tracked in
/// micro-cents (1 USD = 100,000,000) so it stays an additive integer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub price_micro_cents: u64,
}

/// Point-in-time copy of a [`TokenUsage`] accumulator, for persistence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub price_micro_cents: u64,
}

impl TokenUsage {
    /// Create a new, empty accumulator behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a completion call's delta.
    pub fn add(&self, delta: UsageDelta) {
        self.input_tokens.fetch_add(delta.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(delta.output_tokens, Ordering::Relaxed);
        self.price_micro_cents
            .fetch_add(delta.price_micro_cents, Ordering::Relaxed);
    }

    /// Merge another accumulator's totals into this one.
    pub fn merge(&self, other: &TokenUsage) {
        self.add(UsageDelta {
            input_tokens: other.input_tokens.load(Ordering::Relaxed),
            output_tokens: other.output_tokens.load(Ordering::Relaxed),
            price_micro_cents: other.price_micro_cents.load(Ordering::Relaxed),
        });
    }

    /// Reset all counters to zero. Only valid between crawl trees, never
    /// mid-tree.
    pub fn reset(&self) {
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
        self.price_micro_cents.store(0, Ordering::Relaxed);
    }

    /// Copy out the current totals.
    pub fn snapshot(&self) -> UsageSnapshot {
        let input = self.input_tokens.load(Ordering::Relaxed);
        let output = self.output_tokens.load(Ordering::Relaxed);
        UsageSnapshot {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            price_micro_cents: self.price_micro_cents.load(Ordering::Relaxed),
        }
    }
}

impl UsageSnapshot {
    /// Accumulated price in dollars.
    pub fn price_usd(&self) -> f64 {
        self.price_micro_cents as f64 / 100_000_000.0
    }
}

impl std::fmt::Display for UsageSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in / {} out / {} total / ${:.4}",
            self.input_tokens,
            self.output_tokens,
            self.total_tokens,
            self.price_usd()
        )
    }
}
