//! Dispatcher: lookup, validation, bounded execution, outcome normalization.
//!
//! Per-request states:
//! ```text
//! Received ──► Validating ──► Executing ──► Completed(ok)
//!                  │              │
//!                  └──────────────┴──────► Completed(error)
//! ```
//! Every request ends in `Completed` with exactly one [`ToolResult`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dispatch::provider::{CallContext, CapabilityProvider, ProviderError, ToolBinding};
use crate::dispatch::result::{ToolError, ToolResult};
use crate::tools::{validate, ToolDescriptor, ToolRegistry};
use crate::types::{CallId, CorrelationId, DispatchConfig, Error, Result};

/// A decoded invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: CorrelationId,
    pub tool: String,
    /// Raw argument bag (`null` or an object).
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(id: impl Into<CorrelationId>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// Result correlated to the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: CorrelationId,
    pub result: ToolResult,
}

// =============================================================================
// Builder
// =============================================================================

/// Startup-time assembly of registry and bindings.
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    registry: ToolRegistry,
    bindings: HashMap<String, Arc<dyn CapabilityProvider>>,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            registry: ToolRegistry::new(),
            bindings: HashMap::new(),
            config,
        }
    }

    /// Register one tool. Duplicate names fail.
    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<Self> {
        let name = descriptor.name.clone();
        self.registry.register(descriptor)?;
        self.bindings.insert(name, provider);
        Ok(self)
    }

    /// Register every binding of a toolkit, in order.
    pub fn register_all(self, bindings: impl IntoIterator<Item = ToolBinding>) -> Result<Self> {
        bindings
            .into_iter()
            .try_fold(self, |builder, binding| builder.register(binding.descriptor, binding.provider))
    }

    pub fn build(self) -> Dispatcher {
        tracing::info!(
            tools = self.registry.len(),
            max_in_flight = self.config.max_in_flight,
            "dispatcher ready"
        );
        Dispatcher {
            in_flight: Arc::new(Semaphore::new(
                self.config.max_in_flight.clamp(1, Semaphore::MAX_PERMITS),
            )),
            registry: self.registry,
            bindings: self.bindings,
            config: self.config,
            shutdown: CancellationToken::new(),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes requests to providers. Shared read-only across connections.
#[derive(Debug)]
pub struct Dispatcher {
    registry: ToolRegistry,
    bindings: HashMap<String, Arc<dyn CapabilityProvider>>,
    config: DispatchConfig,
    in_flight: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn builder(config: DispatchConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Full catalog in registration order.
    pub fn catalog(&self) -> Vec<&ToolDescriptor> {
        self.registry.list()
    }

    /// Signal cancellation to every executing call.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Handle one request. Always returns exactly one response.
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let call_id = CallId::new();
        let span = tracing::info_span!(
            "dispatch",
            call_id = %call_id,
            id = %request.id,
            tool = %request.tool,
        );
        let result = self
            .execute(&request.tool, &request.arguments, call_id)
            .instrument(span)
            .await;
        ToolResponse {
            id: request.id,
            result,
        }
    }

    async fn execute(&self, tool: &str, raw: &Value, call_id: CallId) -> ToolResult {
        // Validating
        let args = match self
            .registry
            .lookup(tool)
            .and_then(|descriptor| {
                validate(descriptor, raw, self.config.unknown_arguments)
                    .map_err(|failure| Error::validation(failure.to_string()))
            }) {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!("rejected: {}", e);
                return ToolError::rejected(&e).into();
            }
        };
        let Some(provider) = self.bindings.get(tool).cloned() else {
            tracing::error!("tool is registered without a provider binding");
            return ToolError::internal(format!("no provider bound for '{}'", tool)).into();
        };

        // Backpressure: waiters are served in arrival order.
        let _permit = match self.in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return ToolError::internal("dispatcher is shutting down").into(),
        };

        // Executing
        let budget = self.config.timeout_for(tool);
        let ctx = CallContext::new(call_id, tool, budget, self.shutdown.child_token());
        let deadline = ctx.deadline();
        let cancel = ctx.cancellation_token();
        let started = tokio::time::Instant::now();

        let invocation = Arc::clone(&provider);
        let mut handle = tokio::spawn(
            async move { invocation.invoke(args, ctx).await }.in_current_span(),
        );

        let outcome = tokio::time::timeout_at(deadline, &mut handle).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(Ok(value))) => {
                tracing::debug!(elapsed_ms, "completed");
                ToolResult::Ok(value)
            }
            Ok(Ok(Err(ProviderError::Failed { message, retryable }))) => {
                tracing::warn!(elapsed_ms, retryable, "provider error: {}", message);
                ToolError::provider(message, retryable).into()
            }
            Ok(Ok(Err(ProviderError::Cancelled(message)))) => {
                // only reachable through dispatcher shutdown
                tracing::warn!(elapsed_ms, "{}", message);
                ToolError::provider(message, true).into()
            }
            Ok(Ok(Err(ProviderError::Internal(message)))) => {
                tracing::error!(elapsed_ms, "provider internal fault: {}", message);
                ToolError::internal(format!("internal fault while executing '{}'", tool)).into()
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    tracing::error!(elapsed_ms, "provider panicked");
                } else {
                    tracing::error!(elapsed_ms, "provider task aborted: {}", join_error);
                }
                ToolError::internal(format!("internal fault while executing '{}'", tool)).into()
            }
            Err(_elapsed) => {
                // The task is detached, not aborted: it stops at its next
                // cancellation point and the provider recycles its resource.
                cancel.cancel();
                provider.mark_suspect();
                tracing::warn!(budget_ms = budget.as_millis() as u64, "timed out");
                ToolError::timeout(tool, budget).into()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::provider::provider_fn;
    use crate::dispatch::result::ErrorKind;
    use crate::tools::{Arguments, ParamKind, ParameterSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("echo", "Return the input")
            .param(ParameterSpec::required("text", ParamKind::String, "Text to echo"))
    }

    fn echo() -> Arc<dyn CapabilityProvider> {
        provider_fn(|args: Arguments, _ctx: CallContext| async move { Ok(args.to_json()) })
    }

    fn config(timeout_ms: u64) -> DispatchConfig {
        DispatchConfig {
            default_timeout: Duration::from_millis(timeout_ms),
            ..DispatchConfig::default()
        }
    }

    fn kind(response: &ToolResponse) -> Option<ErrorKind> {
        response.result.error().map(|e| e.kind)
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let dispatcher = Dispatcher::builder(config(1000))
            .register(echo_descriptor(), echo())
            .unwrap()
            .build();

        let response = dispatcher
            .dispatch(ToolRequest::new(1, "echo", json!({"text": "hi"})))
            .await;

        assert_eq!(response.id, CorrelationId::from(1));
        assert_eq!(response.result, ToolResult::Ok(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let result = Dispatcher::builder(config(1000))
            .register(echo_descriptor(), echo())
            .unwrap()
            .register(echo_descriptor(), echo());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_client_fault() {
        let dispatcher = Dispatcher::builder(config(1000)).build();
        let response = dispatcher
            .dispatch(ToolRequest::new(2, "missing", json!({})))
            .await;

        let err = response.result.error().unwrap();
        assert_eq!(err.kind, ErrorKind::ClientFault);
        assert!(err.message.contains("missing"));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = provider_fn(move |_args: Arguments, _ctx: CallContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!(null)) }
        });
        let dispatcher = Dispatcher::builder(config(1000))
            .register(echo_descriptor(), provider)
            .unwrap()
            .build();

        let missing = dispatcher.dispatch(ToolRequest::new(1, "echo", json!({}))).await;
        let unknown = dispatcher
            .dispatch(ToolRequest::new(2, "echo", json!({"text": "a", "txet": "b"})))
            .await;
        let mistyped = dispatcher.dispatch(ToolRequest::new(3, "echo", json!({"text": 5}))).await;

        for response in [&missing, &unknown, &mistyped] {
            assert_eq!(kind(response), Some(ErrorKind::ClientFault));
        }
        assert!(missing
            .result
            .error()
            .unwrap()
            .message
            .contains("missing required parameter"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_error_keeps_retryable_flag() {
        let provider = provider_fn(|_args: Arguments, _ctx: CallContext| async {
            Err(ProviderError::retryable("connection refused"))
        });
        let dispatcher = Dispatcher::builder(config(1000))
            .register(ToolDescriptor::new("flaky", ""), provider)
            .unwrap()
            .build();

        let response = dispatcher.dispatch(ToolRequest::new(1, "flaky", json!({}))).await;
        let err = response.result.error().unwrap();
        assert_eq!(err.kind, ErrorKind::ProviderError);
        assert_eq!(err.message, "connection refused");
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_internal_provider_error_is_generic() {
        let provider = provider_fn(|_args: Arguments, _ctx: CallContext| async {
            Err(ProviderError::internal("secret detail"))
        });
        let dispatcher = Dispatcher::builder(config(1000))
            .register(ToolDescriptor::new("broken", ""), provider)
            .unwrap()
            .build();

        let response = dispatcher.dispatch(ToolRequest::new(1, "broken", json!({}))).await;
        let err = response.result.error().unwrap();
        assert_eq!(err.kind, ErrorKind::InternalFault);
        assert!(!err.message.contains("secret detail"));
    }

    #[derive(Debug, Default)]
    struct SlowProvider {
        observed_cancel: Arc<AtomicBool>,
        suspect: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl CapabilityProvider for SlowProvider {
        async fn invoke(&self, _args: Arguments, ctx: CallContext) -> std::result::Result<Value, ProviderError> {
            let outcome = ctx.guard(tokio::time::sleep(Duration::from_secs(30))).await;
            if outcome.is_err() {
                self.observed_cancel.store(true, Ordering::SeqCst);
            }
            outcome.map(|_| json!("finished"))
        }

        fn mark_suspect(&self) {
            self.suspect.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_marks_suspect() {
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let suspect = Arc::new(AtomicBool::new(false));
        let slow = Arc::new(SlowProvider {
            observed_cancel: observed_cancel.clone(),
            suspect: suspect.clone(),
        });
        let dispatcher = Dispatcher::builder(config(50))
            .register(ToolDescriptor::new("slow", ""), slow)
            .unwrap()
            .register(echo_descriptor(), echo())
            .unwrap()
            .build();

        let response = dispatcher.dispatch(ToolRequest::new(1, "slow", json!({}))).await;
        let err = response.result.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.retryable);
        assert!(suspect.load(Ordering::SeqCst));

        // the abandoned call observes cancellation shortly after
        for _ in 0..50 {
            if observed_cancel.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(observed_cancel.load(Ordering::SeqCst));

        // and later requests are unaffected
        let response = dispatcher
            .dispatch(ToolRequest::new(2, "echo", json!({"text": "after"})))
            .await;
        assert!(response.result.is_ok());
    }

    #[tokio::test]
    async fn test_per_tool_timeout_override() {
        let mut cfg = config(5_000);
        cfg.timeout_overrides_ms.insert("slow".to_string(), 30);
        let dispatcher = Dispatcher::builder(cfg)
            .register(ToolDescriptor::new("slow", ""), Arc::new(SlowProvider::default()))
            .unwrap()
            .build();

        let started = std::time::Instant::now();
        let response = dispatcher.dispatch(ToolRequest::new(1, "slow", json!({}))).await;
        assert_eq!(kind(&response), Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_panic_is_contained() {
        let provider = provider_fn(|args: Arguments, _ctx: CallContext| async move {
            if args.is_present("text") {
                panic!("provider blew up");
            }
            Ok(json!(null))
        });
        let dispatcher = Dispatcher::builder(config(1000))
            .register(
                ToolDescriptor::new("fragile", "")
                    .param(ParameterSpec::optional("text", ParamKind::String, "")),
                provider,
            )
            .unwrap()
            .register(echo_descriptor(), echo())
            .unwrap()
            .build();

        let crashed = dispatcher
            .dispatch(ToolRequest::new(1, "fragile", json!({"text": "x"})))
            .await;
        assert_eq!(kind(&crashed), Some(ErrorKind::InternalFault));
        assert!(logs_contain("provider panicked"));

        // registry and bindings survive
        assert_eq!(dispatcher.registry().len(), 2);
        let ok = dispatcher.dispatch(ToolRequest::new(2, "fragile", json!({}))).await;
        assert!(ok.result.is_ok());
        let echoed = dispatcher
            .dispatch(ToolRequest::new(3, "echo", json!({"text": "still here"})))
            .await;
        assert_eq!(echoed.result, ToolResult::Ok(json!({"text": "still here"})));
    }

    #[tokio::test]
    async fn test_concurrent_requests_each_get_their_own_result() {
        let provider = provider_fn(|args: Arguments, _ctx: CallContext| async move {
            let delay = args.int("delay_ms").map_err(ProviderError::from)?;
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            Ok::<Value, ProviderError>(json!({"delay_ms": delay}))
        });
        let dispatcher = Arc::new(
            Dispatcher::builder(config(5_000))
                .register(
                    ToolDescriptor::new("sleepy", "")
                        .param(ParameterSpec::required("delay_ms", ParamKind::Integer, "")),
                    provider,
                )
                .unwrap()
                .build(),
        );

        let handles: Vec<_> = (0..20u64)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                // later requests finish first
                let delay = (20 - i) * 5;
                tokio::spawn(async move {
                    dispatcher
                        .dispatch(ToolRequest::new(i, "sleepy", json!({"delay_ms": delay})))
                        .await
                })
            })
            .collect();

        for (i, response) in futures::future::join_all(handles).await.into_iter().enumerate() {
            let response = response.unwrap();
            let i = i as u64;
            assert_eq!(response.id, CorrelationId::from(i));
            assert_eq!(response.result, ToolResult::Ok(json!({"delay_ms": (20 - i) * 5})));
        }
    }

    #[tokio::test]
    async fn test_max_in_flight_bounds_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (current.clone(), peak.clone());
        let provider = provider_fn(move |_args: Arguments, _ctx: CallContext| {
            let (current, peak) = (c.clone(), p.clone());
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        });
        let cfg = DispatchConfig {
            max_in_flight: 2,
            ..config(5_000)
        };
        let dispatcher = Arc::new(
            Dispatcher::builder(cfg)
                .register(ToolDescriptor::new("work", ""), provider)
                .unwrap()
                .build(),
        );

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.dispatch(ToolRequest::new(i, "work", json!({}))).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().result.is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_executing_calls() {
        let dispatcher = Arc::new(
            Dispatcher::builder(config(5_000))
                .register(ToolDescriptor::new("slow", ""), Arc::new(SlowProvider::default()))
                .unwrap()
                .build(),
        );
        let d = dispatcher.clone();
        let pending =
            tokio::spawn(async move { d.dispatch(ToolRequest::new(1, "slow", json!({}))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.shutdown();

        let response = pending.await.unwrap();
        assert_eq!(kind(&response), Some(ErrorKind::ProviderError));
    }

    #[tokio::test]
    async fn test_lenient_policy_drops_unknown_keys() {
        let cfg = DispatchConfig {
            unknown_arguments: crate::types::UnknownArgumentPolicy::Lenient,
            ..config(1000)
        };
        let dispatcher = Dispatcher::builder(cfg)
            .register(echo_descriptor(), echo())
            .unwrap()
            .build();
        let response = dispatcher
            .dispatch(ToolRequest::new(1, "echo", json!({"text": "hi", "extra": 1})))
            .await;
        assert_eq!(response.result, ToolResult::Ok(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_out_of_range_in_flight_is_clamped() {
        for max_in_flight in [0, usize::MAX] {
            let cfg = DispatchConfig {
                max_in_flight,
                ..config(1000)
            };
            let dispatcher = Dispatcher::builder(cfg)
                .register(echo_descriptor(), echo())
                .unwrap()
                .build();
            let response = dispatcher
                .dispatch(ToolRequest::new(1, "echo", json!({"text": "hi"})))
                .await;
            assert!(response.result.is_ok());
        }
    }

    #[test]
    fn test_catalog_in_registration_order() {
        let dispatcher = Dispatcher::builder(config(1000))
            .register(ToolDescriptor::new("b", ""), echo())
            .unwrap()
            .register(ToolDescriptor::new("a", ""), echo())
            .unwrap()
            .build();
        let names: Vec<&str> = dispatcher.catalog().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
