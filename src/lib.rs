//! # regionflow - hook-driven execution of request regions
//!
//! A request file is parsed (elsewhere) into regions. Each region carries a
//! protocol-tagged request template and a set of hook points. `regionflow`
//! resolves variables and environments, runs each region's action chain and
//! dispatches its request to an explicit registry of protocol handlers
//! (HTTP, server-sent events, gRPC, AMQP). Streamed responses are folded
//! into one normalized [`Response`](types::Response).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use regionflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EnvironmentConfig::default();
//!     let registry = Arc::new(HandlerRegistry::with_defaults(&config)?);
//!     let sender = Sender::new(registry);
//!
//!     let mut file = HttpFile::new("api.http");
//!     let region = file.push_region(
//!         Region::new("ping").with_request(HttpRequest::new("GET", "{{host}}/ping")),
//!     );
//!     let context = SendContext::region(Arc::new(file), region).with_config(config);
//!     let ok = sender.send(context).await?;
//!     println!("success: {ok}");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod orchestrator;
pub mod processor;
pub mod streaming;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use error::{Result, SendError};

/// Commonly used items.
pub mod prelude {
    pub use crate::config::{
        ConfigProvider, EnvironmentConfig, JsonFileConfigProvider, RequestConfig, StaticConfigProvider,
    };
    pub use crate::error::{Result, SendError};
    pub use crate::handlers::{
        AmqpHandler, AmqpTransport, EventSourceHandler, GrpcHandler, HandlerRegistry, HttpHandler,
        ProtocolHandler, RpcTransport,
    };
    pub use crate::hooks::streaming::{StreamingTimeout, UntilClosed, WaitForMessages};
    pub use crate::hooks::{Hook, HookConstraints, HookOutcome, HookPoint, HookResult};
    pub use crate::orchestrator::{SendContext, SendTarget, Sender};
    pub use crate::processor::ProcessorContext;
    pub use crate::streaming::{LogStream, StreamChunk, StreamFailure};
    pub use crate::types::{
        AmqpMethod, AmqpRequest, Body, EventSourceRequest, GrpcRequest, Headers, HttpFile,
        HttpRequest, Protocol, Region, Request, Response, Variables,
    };
    pub use crate::utils::{CancelHandle, Dispose};
}
