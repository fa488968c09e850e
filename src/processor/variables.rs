//! Variable and environment resolution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::hooks::{Hook, HookOutcome, HookPoint, HookResult};
use crate::types::{HttpFile, Variables};

/// Argument of the provide-variables and provide-environments hooks.
#[derive(Debug, Clone)]
pub struct VariableProviderContext {
    pub file: Arc<HttpFile>,
    pub config: Arc<EnvironmentConfig>,
    /// Active environments.
    pub environments: Vec<String>,
    /// Caller supplied variables; they win over provider values.
    pub variables: Variables,
}

impl VariableProviderContext {
    pub fn new(file: Arc<HttpFile>, config: Arc<EnvironmentConfig>) -> Self {
        let environments = file
            .active_environment
            .clone()
            .unwrap_or_else(|| config.default_environments.clone());
        Self {
            file,
            config,
            environments,
            variables: Variables::new(),
        }
    }
}

/// Merge every provider contribution left to right, then the caller's
/// variables on top. A cancelling provider yields no variables at all.
pub async fn get_variables(
    providers: &HookPoint<VariableProviderContext, Variables>,
    ctx: &mut VariableProviderContext,
) -> Result<Variables> {
    match providers.trigger_collect(ctx).await? {
        HookOutcome::Cancelled => {
            tracing::debug!(target: "regionflow::orchestrator", "variable providers cancelled");
            Ok(Variables::new())
        }
        HookOutcome::Completed(contributions) => {
            let mut variables = Variables::new();
            for contribution in contributions {
                variables.extend(contribution);
            }
            variables.extend(ctx.variables.clone());
            tracing::debug!(target: "regionflow::orchestrator", count = variables.len(), "variables resolved");
            Ok(variables)
        }
    }
}

/// Environment names from every provider, deduplicated and sorted.
pub async fn get_environments(
    providers: &HookPoint<VariableProviderContext, Vec<String>>,
    ctx: &mut VariableProviderContext,
) -> Result<Vec<String>> {
    let HookOutcome::Completed(contributions) = providers.trigger_collect(ctx).await? else {
        return Ok(Vec::new());
    };
    let mut environments: Vec<String> = Vec::new();
    for name in contributions.into_iter().flatten() {
        if !environments.contains(&name) {
            environments.push(name);
        }
    }
    environments.sort();
    Ok(environments)
}

/// Provides the configured variables of the active environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigVariableProvider;

#[async_trait]
impl Hook<VariableProviderContext, Variables> for ConfigVariableProvider {
    async fn call(&self, ctx: &mut VariableProviderContext) -> Result<HookResult<Variables>> {
        Ok(HookResult::Value(ctx.config.variables_for(&ctx.environments)))
    }
}

/// Provides the environment names declared in the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigEnvironmentProvider;

#[async_trait]
impl Hook<VariableProviderContext, Vec<String>> for ConfigEnvironmentProvider {
    async fn call(&self, ctx: &mut VariableProviderContext) -> Result<HookResult<Vec<String>>> {
        Ok(HookResult::Value(ctx.config.environment_names()))
    }
}
