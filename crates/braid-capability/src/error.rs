//! Error types for capability calls.

use braid_types::TokenUsage;
use thiserror::Error;

/// Result type alias using the capability error type.
pub type Result<T> = std::result::Result<T, CapabilityError>;

/// Failure of a capability call.
///
/// Failed and cancelled calls still report whatever they spent before
/// stopping, so the workflow can charge it. How precise that figure is
/// depends on the provider's billing granularity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// The call ran and failed.
    #[error("{message}")]
    Failed {
        message: String,
        cost: f64,
        tokens: TokenUsage,
    },

    /// The call observed its cancellation token and stopped.
    #[error("Cancelled")]
    Cancelled { cost: f64, tokens: TokenUsage },

    /// The capability does not offer the requested operation.
    #[error("Capability '{capability}' does not support {operation}")]
    Unsupported {
        capability: String,
        operation: &'static str,
    },
}

impl CapabilityError {
    /// A failure that spent nothing.
    pub fn failed(message: impl Into<String>) -> Self {
        CapabilityError::Failed {
            message: message.into(),
            cost: 0.0,
            tokens: TokenUsage::default(),
        }
    }

    /// A cancellation that spent nothing.
    pub fn cancelled() -> Self {
        CapabilityError::Cancelled {
            cost: 0.0,
            tokens: TokenUsage::default(),
        }
    }

    /// Attach the spend reported by the provider.
    pub fn with_spend(self, spent: f64, used: TokenUsage) -> Self {
        match self {
            CapabilityError::Failed { message, .. } => CapabilityError::Failed {
                message,
                cost: spent,
                tokens: used,
            },
            CapabilityError::Cancelled { .. } => CapabilityError::Cancelled {
                cost: spent,
                tokens: used,
            },
            other => other,
        }
    }

    /// Cost spent before the call stopped.
    pub fn cost(&self) -> f64 {
        match self {
            CapabilityError::Failed { cost, .. } | CapabilityError::Cancelled { cost, .. } => *cost,
            CapabilityError::Unsupported { .. } => 0.0,
        }
    }

    /// Tokens consumed before the call stopped.
    pub fn tokens(&self) -> TokenUsage {
        match self {
            CapabilityError::Failed { tokens, .. } | CapabilityError::Cancelled { tokens, .. } => {
                *tokens
            }
            CapabilityError::Unsupported { .. } => TokenUsage::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CapabilityError::Cancelled { .. })
    }
}
