//! Capability trait definition

use crate::context::TaskContext;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error reported by a capability invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    /// Whether a retry with the same input may succeed
    pub retryable: bool,
}

impl CapabilityError {
    /// A failure worth retrying (network blip, upstream overload)
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will repeat on every attempt (invalid input, bad credentials)
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// The opaque work behind one task kind
///
/// The engine knows nothing about what a capability computes. It hands over
/// a JSON input and expects a JSON value back.
///
/// Implementations must be safe to call concurrently for distinct inputs and
/// tolerate being called again with the same input after a failed attempt.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run the capability once
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, CapabilityError>;

    /// Name used in logs
    fn name(&self) -> &str;
}
