//! Per-step result records.

use std::ops::{Add, AddAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Token usage reported by a capability call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the input.
    pub input: u64,
    /// Tokens produced in the output.
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input: self.input + rhs.input,
            output: self.output + rhs.output,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

/// The result of a single step, branch, or route invocation.
///
/// A skipped outcome (a conditional step whose predicate was false) carries
/// no content, cost, or tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Step, branch, or route name.
    pub name: String,
    /// Content produced by the capability (`null` when absent).
    pub content: Value,
    /// Cost charged for this invocation, in currency units.
    pub cost: f64,
    /// Tokens consumed.
    pub tokens: TokenUsage,
    /// Wall time spent in the invocation.
    pub duration: Duration,
    /// Set when the invocation failed or was cancelled.
    pub error: Option<ErrorKind>,
    /// True when a conditional step's predicate evaluated false.
    pub skipped: bool,
    /// True when served from the capability cache without invoking it.
    #[serde(default)]
    pub cache_hit: bool,
}

impl Outcome {
    /// A successful outcome.
    pub fn success(
        name: impl Into<String>,
        content: Value,
        cost: f64,
        tokens: TokenUsage,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            content,
            cost,
            tokens,
            duration,
            error: None,
            skipped: false,
            cache_hit: false,
        }
    }

    /// A failed outcome. Partial spend reported by the capability is kept.
    pub fn failure(
        name: impl Into<String>,
        error: ErrorKind,
        cost: f64,
        tokens: TokenUsage,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            content: Value::Null,
            cost,
            tokens,
            duration,
            error: Some(error),
            skipped: false,
            cache_hit: false,
        }
    }

    /// An outcome for a branch terminated by cancellation.
    pub fn cancelled(
        name: impl Into<String>,
        cost: f64,
        tokens: TokenUsage,
        duration: Duration,
    ) -> Self {
        Self::failure(name, ErrorKind::Cancelled, cost, tokens, duration)
    }

    /// An outcome for a conditional step whose predicate was false.
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Value::Null,
            cost: 0.0,
            tokens: TokenUsage::default(),
            duration: Duration::ZERO,
            error: None,
            skipped: true,
            cache_hit: false,
        }
    }

    /// Mark this outcome as served from the cache: no cost, no time.
    pub fn as_cache_hit(mut self) -> Self {
        self.cost = 0.0;
        self.tokens = TokenUsage::default();
        self.duration = Duration::ZERO;
        self.cache_hit = true;
        self
    }

    /// Whether the invocation ran and produced content.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.skipped
    }

    /// Whether the invocation ran and failed (including cancellation).
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this outcome was cancelled rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(ErrorKind::is_cancelled)
    }
}
