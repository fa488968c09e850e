//! Hook pipeline
//!
//! A [`HookPoint`] is an ordered registry of named async callbacks bound to
//! one extension point (variable providers, request/response observers,
//! region actions, streaming governors...). Ordering follows the declared
//! `before`/`after` constraints and is resolved when a hook is registered,
//! so triggering never re-sorts.
//!
//! Two trigger modes exist:
//! - [`HookPoint::trigger_collect`]: every hook runs, results are collected.
//! - [`HookPoint::trigger_until_false`] (boolean hook points only): a hook
//!   returning `false` stops the chain and the trigger reports `false`.
//!
//! Any hook may answer [`HookResult::Cancel`]; the trigger then stops and
//! reports [`HookOutcome::Cancelled`], which callers treat as a deliberate
//! short-circuit rather than a failure.

pub mod chain;
pub mod ordering;
pub mod streaming;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, SendError};

pub use chain::{ActionChain, ActionMiddleware, Intercept, LoopInterceptor, Next};
pub use ordering::HookConstraints;

/// Value returned by a single hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookResult<R> {
    Value(R),
    Cancel,
}

/// Result of triggering a whole hook point.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> HookOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HookOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            HookOutcome::Completed(value) => Some(value),
            HookOutcome::Cancelled => None,
        }
    }
}

/// An async callback registered on a [`HookPoint`].
#[async_trait]
pub trait Hook<A, R>: Send + Sync {
    async fn call(&self, arg: &mut A) -> Result<HookResult<R>>;
}

struct HookEntry<A, R> {
    name: String,
    hook: Arc<dyn Hook<A, R>>,
    constraints: HookConstraints,
}

impl<A, R> Clone for HookEntry<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            hook: Arc::clone(&self.hook),
            constraints: self.constraints.clone(),
        }
    }
}

/// Ordered registry of named hooks for one extension point.
pub struct HookPoint<A, R> {
    id: String,
    // registration order
    entries: Vec<HookEntry<A, R>>,
    // indices into `entries`, in execution order
    order: Vec<usize>,
}

impl<A, R> Clone for HookPoint<A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            entries: self.entries.clone(),
            order: self.order.clone(),
        }
    }
}

impl<A, R> fmt::Debug for HookPoint<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPoint")
            .field("id", &self.id)
            .field("hooks", &self.names())
            .finish()
    }
}

impl<A, R> HookPoint<A, R> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: Vec::new(),
            order: Vec::new(),
        }
    }

    /// A hook point holding a single unconstrained hook.
    pub fn with_hook(id: impl Into<String>, name: impl Into<String>, hook: impl Hook<A, R> + 'static) -> Self {
        Self {
            id: id.into(),
            entries: vec![HookEntry {
                name: name.into(),
                hook: Arc::new(hook),
                constraints: HookConstraints::none(),
            }],
            order: vec![0],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a hook under a unique name.
    ///
    /// Registering a name twice, or adding constraints that close a cycle,
    /// is a configuration error and leaves the hook point unchanged.
    pub fn add_hook(
        &mut self,
        name: impl Into<String>,
        hook: impl Hook<A, R> + 'static,
        constraints: HookConstraints,
    ) -> Result<()> {
        self.add_shared_hook(name, Arc::new(hook), constraints)
    }

    /// Same as [`add_hook`](Self::add_hook) for an already shared hook.
    pub fn add_shared_hook(
        &mut self,
        name: impl Into<String>,
        hook: Arc<dyn Hook<A, R>>,
        constraints: HookConstraints,
    ) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(SendError::ConfigurationError(format!(
                "hook '{name}' is already registered on '{}'",
                self.id
            )));
        }
        self.entries.push(HookEntry {
            name,
            hook,
            constraints,
        });
        match self.resolve() {
            Ok(order) => {
                self.order = order;
                Ok(())
            }
            Err(err) => {
                self.entries.pop();
                Err(err)
            }
        }
    }

    /// Remove a hook by name. Returns whether it was present.
    pub fn remove_hook(&mut self, name: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.name == name) else {
            return false;
        };
        self.entries.remove(pos);
        // removing a node can never introduce a cycle
        self.order = self.resolve().unwrap_or_default();
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hook names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.entries[i].name.as_str())
            .collect()
    }

    /// Combine two hook points into a new one.
    ///
    /// Entries of `other` replace same-named entries of `self` in place and
    /// are appended otherwise. If the combined constraints cannot be
    /// satisfied, `other`'s conflicting entries are skipped with a warning.
    pub fn merge(&self, other: &HookPoint<A, R>) -> HookPoint<A, R> {
        let mut merged = self.clone();
        for entry in &other.entries {
            if let Some(slot) = merged.entries.iter_mut().find(|e| e.name == entry.name) {
                *slot = entry.clone();
            } else {
                merged.entries.push(entry.clone());
            }
            match merged.resolve() {
                Ok(order) => merged.order = order,
                Err(err) => {
                    tracing::warn!(target: "regionflow::hooks", hook_point=%self.id, hook=%entry.name, error=%err, "skipping hook while merging");
                    merged = merged.without(&entry.name, self);
                }
            }
        }
        merged
    }

    // Drop `name` from `self` and restore the original entry from `base` if any.
    fn without(mut self, name: &str, base: &HookPoint<A, R>) -> Self {
        if let Some(pos) = self.entries.iter().position(|e| e.name == name) {
            match base.entries.iter().find(|e| e.name == name) {
                Some(original) => self.entries[pos] = original.clone(),
                None => {
                    self.entries.remove(pos);
                }
            }
        }
        self.order = self.resolve().unwrap_or_default();
        self
    }

    fn resolve(&self) -> Result<Vec<usize>> {
        let nodes: Vec<(&str, &HookConstraints)> = self
            .entries
            .iter()
            .map(|e| (e.name.as_str(), &e.constraints))
            .collect();
        ordering::resolve_order(&nodes)
    }

    fn ordered(&self) -> impl Iterator<Item = &HookEntry<A, R>> {
        self.order.iter().map(move |&i| &self.entries[i])
    }
}

impl<A: Send, R: Send> HookPoint<A, R> {
    /// Run every hook in order and collect their values.
    ///
    /// Stops at the first hook answering [`HookResult::Cancel`].
    pub async fn trigger_collect(&self, arg: &mut A) -> Result<HookOutcome<Vec<R>>> {
        let mut results = Vec::with_capacity(self.entries.len());
        for entry in self.ordered() {
            tracing::trace!(target: "regionflow::hooks", hook_point=%self.id, hook=%entry.name, "trigger");
            match entry.hook.call(arg).await? {
                HookResult::Value(value) => results.push(value),
                HookResult::Cancel => {
                    tracing::debug!(target: "regionflow::hooks", hook_point=%self.id, hook=%entry.name, "hook cancelled trigger");
                    return Ok(HookOutcome::Cancelled);
                }
            }
        }
        Ok(HookOutcome::Completed(results))
    }
}

impl<A: Send> HookPoint<A, bool> {
    /// Run hooks in order until one answers `false`.
    pub async fn trigger_until_false(&self, arg: &mut A) -> Result<HookOutcome<bool>> {
        for entry in self.ordered() {
            tracing::trace!(target: "regionflow::hooks", hook_point=%self.id, hook=%entry.name, "trigger");
            match entry.hook.call(arg).await? {
                HookResult::Value(true) => {}
                HookResult::Value(false) => {
                    tracing::debug!(target: "regionflow::hooks", hook_point=%self.id, hook=%entry.name, "hook stopped chain");
                    return Ok(HookOutcome::Completed(false));
                }
                HookResult::Cancel => return Ok(HookOutcome::Cancelled),
            }
        }
        Ok(HookOutcome::Completed(true))
    }
}
