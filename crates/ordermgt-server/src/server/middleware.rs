//! Before/after hooks wrapping every order management call.
//!
//! A [`HookChain`] is an ordered list of [`CallHook`]s. When a call starts,
//! `before` runs on each hook in registration order and any hook may reject
//! the call with a [`Status`], in which case the handler body never runs.
//! When the call ends (for streams: when the stream ends), `after` runs in
//! reverse order on every hook whose `before` succeeded.
//!
//! The handlers never embed cross-cutting logic; logging and metrics are
//! provided by [`LoggingHook`] and [`TelemetryHook`], and deployments can add
//! their own (authentication, metadata propagation, ...).

use crate::server::telemetry::{
    decrement_streams_inflight, increment_requests, increment_stream_errors,
    increment_streams_inflight, record_call_duration,
};
use core::time::Duration;
use ordermgt_core::REQUEST_ID_HEADER;
use std::{sync::Arc, time::Instant};
use tonic::{Code, Status, metadata::MetadataMap};

/// The RPCs of the `OrderManagement` service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    AddOrder,
    GetOrder,
    SearchOrders,
    UpdateOrders,
    ProcessOrders,
}

impl Method {
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddOrder => "AddOrder",
            Self::GetOrder => "GetOrder",
            Self::SearchOrders => "SearchOrders",
            Self::UpdateOrders => "UpdateOrders",
            Self::ProcessOrders => "ProcessOrders",
        }
    }

    /// gRPC path of the method, e.g. `/ordermgt.OrderManagement/AddOrder`.
    pub fn full_name(self) -> String {
        format!("/ordermgt.OrderManagement/{}", self.name())
    }

    pub const fn is_streaming(self) -> bool {
        matches!(
            self,
            Self::SearchOrders | Self::UpdateOrders | Self::ProcessOrders
        )
    }
}

/// Per-call information shared with every hook.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub method: Method,
    /// Taken from the `x-request-id` metadata entry, or freshly generated.
    pub request_id: String,
    pub started: Instant,
    /// Caller deadline from the `grpc-timeout` header, if any.
    pub timeout: Option<Duration>,
}

impl CallContext {
    pub fn new(method: Method, metadata: &MetadataMap) -> Self {
        let request_id = metadata
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let timeout = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);

        Self {
            method,
            request_id,
            started: Instant::now(),
            timeout,
        }
    }

    /// Span covering the whole call, streams included.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "call",
            method = self.method.name(),
            request_id = %self.request_id
        )
    }
}

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parses a `grpc-timeout` value: at most 8 ASCII digits followed by one of
/// `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 60 * 60)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// How a call ended, as seen by `after` hooks.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub code: Code,
    pub message: String,
    /// Messages delivered to the client (1 for a successful unary call).
    pub messages_sent: usize,
    pub elapsed: Duration,
}

impl CallOutcome {
    pub fn ok(ctx: &CallContext, messages_sent: usize) -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
            messages_sent,
            elapsed: ctx.started.elapsed(),
        }
    }

    pub fn failed(ctx: &CallContext, status: &Status, messages_sent: usize) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
            messages_sent,
            elapsed: ctx.started.elapsed(),
        }
    }

    pub fn from_result<T>(ctx: &CallContext, result: &Result<T, Status>) -> Self {
        match result {
            Ok(_) => Self::ok(ctx, 1),
            Err(status) => Self::failed(ctx, status, 0),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Extension point around each call.
pub trait CallHook: Send + Sync {
    /// Runs before the handler. Returning an error rejects the call.
    fn before(&self, _ctx: &CallContext) -> Result<(), Status> {
        Ok(())
    }

    /// Runs once the call has fully completed.
    fn after(&self, _ctx: &CallContext, _outcome: &CallOutcome) {}
}

/// Ordered pipeline of [`CallHook`]s.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CallHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logging then telemetry.
    pub fn standard() -> Self {
        Self::new().with(LoggingHook).with(TelemetryHook)
    }

    pub fn with(mut self, hook: impl CallHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs every `before` hook for a new call.
    ///
    /// If a hook rejects the call, the hooks that already ran see the
    /// rejection through `after` and the rejecting status is returned.
    pub fn start(&self, method: Method, metadata: &MetadataMap) -> Result<CallContext, Status> {
        let ctx = CallContext::new(method, metadata);

        for (idx, hook) in self.hooks.iter().enumerate() {
            if let Err(status) = hook.before(&ctx) {
                let outcome = CallOutcome::failed(&ctx, &status, 0);
                for hook in self.hooks[..idx].iter().rev() {
                    hook.after(&ctx, &outcome);
                }
                return Err(status);
            }
        }

        Ok(ctx)
    }

    /// Runs every `after` hook, last registered first.
    pub fn finish(&self, ctx: &CallContext, outcome: &CallOutcome) {
        for hook in self.hooks.iter().rev() {
            hook.after(ctx, outcome);
        }
    }
}

/// Logs the start and end of every call.
pub struct LoggingHook;

impl CallHook for LoggingHook {
    fn before(&self, ctx: &CallContext) -> Result<(), Status> {
        tracing::info!(
            method = %ctx.method.full_name(),
            request_id = %ctx.request_id,
            "Call started"
        );
        Ok(())
    }

    fn after(&self, ctx: &CallContext, outcome: &CallOutcome) {
        let elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0;
        if outcome.is_ok() {
            tracing::info!(
                method = %ctx.method.full_name(),
                request_id = %ctx.request_id,
                sent = outcome.messages_sent,
                elapsed_ms,
                "Call completed"
            );
        } else {
            tracing::warn!(
                method = %ctx.method.full_name(),
                request_id = %ctx.request_id,
                code = ?outcome.code,
                sent = outcome.messages_sent,
                elapsed_ms,
                "Call failed: {}",
                outcome.message
            );
        }
    }
}

/// Feeds the request, in-flight, error and duration metrics.
pub struct TelemetryHook;

impl CallHook for TelemetryHook {
    fn before(&self, ctx: &CallContext) -> Result<(), Status> {
        increment_requests(ctx.method.name());
        if ctx.method.is_streaming() {
            increment_streams_inflight();
        }
        Ok(())
    }

    fn after(&self, ctx: &CallContext, outcome: &CallOutcome) {
        if ctx.method.is_streaming() {
            decrement_streams_inflight();
        }
        if !outcome.is_ok() {
            increment_stream_errors(ctx.method.name());
        }
        record_call_duration(ctx.method.name(), outcome.elapsed.as_secs_f64() * 1000.0);
    }
}
