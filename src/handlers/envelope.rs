//! Request/response hook envelope shared by every protocol handler.
//!
//! ```text
//! before_request -> protocol exchange -> after_response
//! ```
//!
//! File-level and region-level hooks are merged for each call; a region
//! hook replaces a file hook of the same name.

use crate::error::Result;
use crate::processor::ProcessorContext;
use crate::streaming::log_best_effort;
use crate::types::Response;

/// Trigger the merged `on_request` hooks.
///
/// Returns `false` when a hook cancelled, in which case the handler must
/// not send anything.
pub async fn before_request(ctx: &mut ProcessorContext) -> Result<bool> {
    let hooks = ctx.on_request_hooks();
    if hooks.trigger_collect(ctx).await?.is_cancelled() {
        tracing::debug!(target: "regionflow::hooks", region = %ctx.region.name, "request cancelled by on_request hook");
        return Ok(false);
    }
    Ok(true)
}

/// Store the final response and trigger the response side of the envelope:
/// `on_response`, then `response_logging`, then the response logger sink.
pub async fn after_response(ctx: &mut ProcessorContext, response: Response) -> Result<()> {
    ctx.response = Some(response);

    let hooks = ctx.on_response_hooks();
    if hooks.trigger_collect(ctx).await?.is_cancelled() {
        return Ok(());
    }
    let hooks = ctx.response_logging_hooks();
    if hooks.trigger_collect(ctx).await?.is_cancelled() {
        return Ok(());
    }

    if let (Some(sink), Some(response)) = (ctx.log_response.clone(), ctx.response.as_ref()) {
        let label = response
            .name
            .clone()
            .unwrap_or_else(|| ctx.region.name.clone());
        log_best_effort(sink.as_ref(), &label, response).await;
    }
    Ok(())
}
