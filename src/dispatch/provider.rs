//! Capability provider interface and the per-call execution context.

use crate::tools::{Arguments, ToolDescriptor};
use crate::types::{CallId, Error};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Provider faults
// =============================================================================

/// Failure raised by a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Backend-specific failure. `retryable` is the provider's own judgment.
    #[error("{message}")]
    Failed { message: String, retryable: bool },

    /// The call observed cancellation and stopped.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Bug or broken invariant inside the provider.
    #[error("{0}")]
    Internal(String),
}

impl ProviderError {
    /// Transient failure (connection refused, upstream 5xx, ...).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure that will repeat given the same arguments.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        Self::Internal(err.to_string())
    }
}

// =============================================================================
// Call context
// =============================================================================

/// Deadline and cancellation signal for one invocation.
#[derive(Debug, Clone)]
pub struct CallContext {
    call_id: CallId,
    tool: Arc<str>,
    deadline: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(call_id: CallId, tool: &str, budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            call_id,
            tool: Arc::from(tool),
            deadline: Instant::now() + budget,
            cancel,
        }
    }

    /// Context with a fresh token, for driving a provider outside the dispatcher.
    pub fn detached(tool: &str, budget: Duration) -> Self {
        Self::new(CallId::new(), tool, budget, CancellationToken::new())
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `fut` unless cancellation fires first.
    ///
    /// Providers wrap each I/O suspension point with this; the inner future is
    /// dropped on cancellation, so no further side effects are produced.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled(format!(
                "call {} to '{}' was cancelled",
                self.call_id, self.tool
            ))),
            out = fut => Ok(out),
        }
    }
}

// =============================================================================
// Provider trait
// =============================================================================

/// Backend-specific implementation of one tool.
///
/// `invoke` must be safe to call concurrently. Arguments have already been
/// validated against the tool's descriptor.
#[async_trait]
pub trait CapabilityProvider: Send + Sync + fmt::Debug {
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> Result<Value, ProviderError>;

    /// The dispatcher timed out a call and abandoned it. Providers holding a
    /// shared resource should recycle it on next acquisition.
    fn mark_suspect(&self) {}
}

/// Descriptor paired with the provider that implements it.
#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub descriptor: ToolDescriptor,
    pub provider: Arc<dyn CapabilityProvider>,
}

impl ToolBinding {
    pub fn new(descriptor: ToolDescriptor, provider: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            descriptor,
            provider,
        }
    }
}

// =============================================================================
// Closure-backed provider
// =============================================================================

/// Provider backed by an async closure.
pub struct FnProvider<F> {
    f: F,
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> CapabilityProvider for FnProvider<F>
where
    F: Fn(Arguments, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
{
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> Result<Value, ProviderError> {
        (self.f)(args, ctx).await
    }
}

/// Wrap an async closure as a shareable provider.
pub fn provider_fn<F, Fut>(f: F) -> Arc<dyn CapabilityProvider>
where
    F: Fn(Arguments, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
{
    Arc::new(FnProvider { f })
}
