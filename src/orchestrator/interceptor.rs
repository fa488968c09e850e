//! Middleware wrapped around every region's action loop.

use async_trait::async_trait;
use tracing::Instrument;

use crate::error::Result;
use crate::hooks::{ActionMiddleware, HookOutcome, LoopInterceptor, Next};
use crate::processor::ProcessorContext;

/// Materializes a fresh copy of the region's request template before any
/// action runs, so handlers never touch the shared template.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateRequestInterceptor;

#[async_trait]
impl LoopInterceptor<ProcessorContext> for CreateRequestInterceptor {
    async fn before_loop(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        ctx.request = ctx.region.request.clone();
        Ok(true)
    }
}

/// Runs the loop inside a `region` span carrying the region name and a
/// per-execution id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionSpanMiddleware;

#[async_trait]
impl ActionMiddleware<ProcessorContext> for RegionSpanMiddleware {
    async fn around(
        &self,
        ctx: &mut ProcessorContext,
        next: Next<'_, ProcessorContext>,
    ) -> Result<HookOutcome<bool>> {
        let span = tracing::info_span!(
            target: "regionflow::orchestrator",
            "region",
            name = %ctx.region.name,
            execution_id = %uuid::Uuid::new_v4(),
        );
        async move {
            let outcome = next.run(ctx).await;
            match &outcome {
                Ok(HookOutcome::Completed(ok)) => {
                    tracing::debug!(target: "regionflow::orchestrator", success = ok, "region finished")
                }
                Ok(HookOutcome::Cancelled) => {
                    tracing::debug!(target: "regionflow::orchestrator", "region cancelled")
                }
                Err(err) => tracing::warn!(target: "regionflow::orchestrator", error = %err, "region failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
