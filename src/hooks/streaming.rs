//! Built-in `on_streaming` hooks.
//!
//! They only decide *when* a streaming handler stops listening; the handler
//! closes the stream once the hook point resolves.

use std::time::Duration;

use async_trait::async_trait;

use super::{Hook, HookResult};
use crate::error::Result;
use crate::processor::ProcessorContext;

/// Stop after `n` messages, or earlier if the stream closes.
#[derive(Debug, Clone, Copy)]
pub struct WaitForMessages(pub usize);

#[async_trait]
impl Hook<ProcessorContext, ()> for WaitForMessages {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        if let Some(session) = &ctx.streaming {
            if !session.wait_for_messages(self.0).await {
                tracing::debug!(target: "regionflow::hooks", expected = self.0, received = session.received(), "stream closed early");
            }
        }
        Ok(HookResult::Value(()))
    }
}

/// Stop after a fixed duration, or earlier if the stream closes.
#[derive(Debug, Clone, Copy)]
pub struct StreamingTimeout(pub Duration);

#[async_trait]
impl Hook<ProcessorContext, ()> for StreamingTimeout {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        if let Some(session) = &ctx.streaming {
            let _ = tokio::time::timeout(self.0, session.closed()).await;
        }
        Ok(HookResult::Value(()))
    }
}

/// Keep listening until the remote side closes the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct UntilClosed;

#[async_trait]
impl Hook<ProcessorContext, ()> for UntilClosed {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        if let Some(session) = &ctx.streaming {
            session.closed().await;
        }
        Ok(HookResult::Value(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;
    use crate::streaming::StreamSignals;
    use crate::types::HttpFile;
    use std::sync::Arc;

    fn context() -> ProcessorContext {
        ProcessorContext::new(
            Arc::new(HttpFile::new("stream.http")),
            Arc::new(EnvironmentConfig::default()),
        )
    }

    #[tokio::test]
    async fn wait_for_messages_returns_after_count() {
        let (signals, session) = StreamSignals::new();
        let mut ctx = context();
        ctx.streaming = Some(session);
        signals.message_received();
        signals.message_received();
        WaitForMessages(2).call(&mut ctx).await.unwrap();
        assert_eq!(ctx.streaming.as_ref().map(|s| s.received()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_elapses_while_stream_stays_open() {
        let (_signals, session) = StreamSignals::new();
        let mut ctx = context();
        ctx.streaming = Some(session);
        let started = tokio::time::Instant::now();
        StreamingTimeout(Duration::from_secs(30)).call(&mut ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn until_closed_returns_once_producer_is_gone() {
        let (signals, session) = StreamSignals::new();
        let mut ctx = context();
        ctx.streaming = Some(session);
        drop(signals);
        UntilClosed.call(&mut ctx).await.unwrap();
    }
}
