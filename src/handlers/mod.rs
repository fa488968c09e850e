//! Protocol handlers
//!
//! A handler owns one wire protocol. The orchestrator never looks at the
//! request itself: it asks the [`HandlerRegistry`], which offers the request
//! to every handler registered for its protocol tag in registration order.
//! The first handler answering `true` is authoritative.

pub mod amqp;
pub mod envelope;
pub mod grpc;
pub mod http;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EnvironmentConfig;
use crate::error::{Result, SendError};
use crate::hooks::{Hook, HookResult};
use crate::processor::ProcessorContext;
use crate::types::Protocol;

pub use amqp::{AmqpHandler, AmqpTransport};
pub use envelope::{after_response, before_request};
pub use grpc::{GrpcHandler, RpcTransport};
pub use http::HttpHandler;
pub use sse::EventSourceHandler;

/// A pluggable wire protocol implementation.
///
/// `process` must return `false` without side effects when the active
/// request does not carry this handler's protocol. Otherwise it runs the
/// exchange inside the request/response envelope (see [`envelope`]).
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn id(&self) -> &str;

    fn protocol(&self) -> Protocol;

    async fn process(&self, ctx: &mut ProcessorContext) -> Result<bool>;
}

/// Explicit, ordered handler registry.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.ids())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP and event source handlers.
    pub fn with_defaults(config: &EnvironmentConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpHandler::new(&config.request)?))?;
        registry.register(Arc::new(EventSourceHandler::new(&config.request)?))?;
        Ok(registry)
    }

    /// Add a handler; ids must be unique.
    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) -> Result<()> {
        if self.get(handler.id()).is_some() {
            return Err(SendError::ConfigurationError(format!(
                "protocol handler '{}' is already registered",
                handler.id()
            )));
        }
        tracing::debug!(target: "regionflow::orchestrator", handler = handler.id(), protocol = %handler.protocol(), "registered protocol handler");
        self.handlers.push(handler);
        Ok(())
    }

    pub fn with(mut self, handler: Arc<dyn ProtocolHandler>) -> Result<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.id()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ProtocolHandler>> {
        self.handlers.iter().find(|h| h.id() == id)
    }

    /// Offer the active request to the handlers of its protocol.
    ///
    /// A region without request has nothing to send and succeeds.
    pub async fn dispatch(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        let Some(protocol) = ctx.request.as_ref().map(|r| r.protocol()) else {
            return Ok(true);
        };
        let candidates: Vec<Arc<dyn ProtocolHandler>> = self
            .handlers
            .iter()
            .filter(|h| h.protocol() == protocol)
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(SendError::ConfigurationError(format!(
                "no protocol handler registered for {protocol}"
            )));
        }
        for handler in candidates {
            if handler.process(ctx).await? {
                return Ok(true);
            }
            tracing::debug!(target: "regionflow::orchestrator", handler = handler.id(), "handler declined request");
        }
        Ok(false)
    }
}

/// Region action dispatching the active request to the registry.
#[derive(Debug, Clone)]
pub struct ProtocolDispatch {
    registry: Arc<HandlerRegistry>,
}

impl ProtocolDispatch {
    pub const NAME: &'static str = "protocol";

    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Hook<ProcessorContext, bool> for ProtocolDispatch {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<bool>> {
        Ok(HookResult::Value(self.registry.dispatch(ctx).await?))
    }
}
