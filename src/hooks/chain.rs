//! Around-style middleware for boolean action loops.
//!
//! An [`ActionChain`] pairs a `HookPoint<A, bool>` with an ordered list of
//! [`ActionMiddleware`]. Each middleware receives the argument and a [`Next`]
//! handle; calling `next.run(arg)` continues with the remaining middleware and
//! finally the hook loop itself. Not calling it aborts the loop.
//!
//! [`LoopInterceptor`] is the narrower before/after flavour; wrap it with
//! [`Intercept`] to place it in a chain next to ordinary middleware.

use std::sync::Arc;

use async_trait::async_trait;

use super::{HookOutcome, HookPoint};
use crate::error::Result;

#[async_trait]
pub trait ActionMiddleware<A>: Send + Sync {
    async fn around(&self, arg: &mut A, next: Next<'_, A>) -> Result<HookOutcome<bool>>;
}

/// Remaining middleware plus the hook loop they wrap.
pub struct Next<'a, A> {
    middlewares: &'a [Arc<dyn ActionMiddleware<A>>],
    hooks: &'a HookPoint<A, bool>,
}

impl<'a, A: Send> Next<'a, A> {
    pub async fn run(self, arg: &mut A) -> Result<HookOutcome<bool>> {
        match self.middlewares.split_first() {
            Some((first, rest)) => {
                first
                    .around(
                        arg,
                        Next {
                            middlewares: rest,
                            hooks: self.hooks,
                        },
                    )
                    .await
            }
            None => self.hooks.trigger_until_false(arg).await,
        }
    }
}

/// Callbacks around one run of a hook loop.
///
/// Returning `false` from `before_loop` aborts before any hook runs; returning
/// `false` from `after_loop` turns a successful loop into a failure.
#[async_trait]
pub trait LoopInterceptor<A: Send>: Send + Sync {
    async fn before_loop(&self, _arg: &mut A) -> Result<bool> {
        Ok(true)
    }

    async fn after_loop(&self, _arg: &mut A, _outcome: &HookOutcome<bool>) -> Result<bool> {
        Ok(true)
    }
}

/// Adapts a [`LoopInterceptor`] into an [`ActionMiddleware`].
pub struct Intercept<I>(pub I);

#[async_trait]
impl<A, I> ActionMiddleware<A> for Intercept<I>
where
    A: Send,
    I: LoopInterceptor<A>,
{
    async fn around(&self, arg: &mut A, next: Next<'_, A>) -> Result<HookOutcome<bool>> {
        if !self.0.before_loop(arg).await? {
            return Ok(HookOutcome::Completed(false));
        }
        let outcome = next.run(arg).await?;
        if matches!(outcome, HookOutcome::Completed(true)) && !self.0.after_loop(arg, &outcome).await? {
            return Ok(HookOutcome::Completed(false));
        }
        Ok(outcome)
    }
}

/// A hook loop composed with its middleware.
pub struct ActionChain<A> {
    hooks: HookPoint<A, bool>,
    middlewares: Vec<Arc<dyn ActionMiddleware<A>>>,
}

impl<A: Send> ActionChain<A> {
    pub fn new(hooks: HookPoint<A, bool>) -> Self {
        Self {
            hooks,
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware; the first one added is the outermost.
    pub fn with_middleware(mut self, middleware: Arc<dyn ActionMiddleware<A>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn hooks(&self) -> &HookPoint<A, bool> {
        &self.hooks
    }

    pub async fn run(&self, arg: &mut A) -> Result<HookOutcome<bool>> {
        Next {
            middlewares: &self.middlewares,
            hooks: &self.hooks,
        }
        .run(arg)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{Hook, HookConstraints, HookResult};

    struct Push(&'static str);

    #[async_trait]
    impl Hook<Vec<String>, bool> for Push {
        async fn call(&self, arg: &mut Vec<String>) -> Result<HookResult<bool>> {
            arg.push(self.0.to_string());
            Ok(HookResult::Value(true))
        }
    }

    struct Around(&'static str);

    #[async_trait]
    impl ActionMiddleware<Vec<String>> for Around {
        async fn around(
            &self,
            arg: &mut Vec<String>,
            next: Next<'_, Vec<String>>,
        ) -> Result<HookOutcome<bool>> {
            arg.push(format!("{}:in", self.0));
            let outcome = next.run(arg).await?;
            arg.push(format!("{}:out", self.0));
            Ok(outcome)
        }
    }

    struct Gate(bool);

    #[async_trait]
    impl LoopInterceptor<Vec<String>> for Gate {
        async fn before_loop(&self, arg: &mut Vec<String>) -> Result<bool> {
            arg.push("gate".to_string());
            Ok(self.0)
        }
    }

    fn hooks() -> HookPoint<Vec<String>, bool> {
        let mut point = HookPoint::new("execute");
        point.add_hook("h", Push("hook"), HookConstraints::none()).unwrap();
        point
    }

    #[tokio::test]
    async fn middleware_wraps_in_registration_order() {
        let chain = ActionChain::new(hooks())
            .with_middleware(Arc::new(Around("outer")))
            .with_middleware(Arc::new(Around("inner")));
        let mut seen = Vec::new();
        let outcome = chain.run(&mut seen).await.unwrap();
        assert_eq!(outcome, HookOutcome::Completed(true));
        assert_eq!(seen, ["outer:in", "inner:in", "hook", "inner:out", "outer:out"]);
    }

    #[tokio::test]
    async fn interceptor_veto_skips_the_hooks() {
        let chain = ActionChain::new(hooks())
            .with_middleware(Arc::new(Intercept(Gate(false))))
            .with_middleware(Arc::new(Around("inner")));
        let mut seen = Vec::new();
        let outcome = chain.run(&mut seen).await.unwrap();
        assert_eq!(outcome, HookOutcome::Completed(false));
        assert_eq!(seen, ["gate"]);
    }
}
