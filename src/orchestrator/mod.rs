//! Execution orchestrator
//!
//! Three entry shapes share one context builder:
//!
//! - single region: global pre-scripts, then the region's action chain.
//! - region list: global pre-scripts once, then every region in order on the
//!   same context; the first failing region stops the batch.
//! - whole file: every region in file order, regions rejected by the
//!   predicate are skipped; failures do not stop the run and the call
//!   reports success.
//!
//! A region's action chain is its `execute` hooks plus two built-in actions,
//! [`ReplaceVariables`] and [`ProtocolDispatch`], wrapped by the configured
//! middleware.

pub mod interceptor;

use std::sync::Arc;

use crate::config::{ConfigProvider, EnvironmentConfig, JsonFileConfigProvider};
use crate::error::Result;
use crate::handlers::{HandlerRegistry, ProtocolDispatch};
use crate::hooks::{ActionChain, ActionMiddleware, Hook, HookConstraints, HookOutcome, HookPoint, Intercept};
use crate::processor::{
    ConfigEnvironmentProvider, ConfigVariableProvider, ContextOptions, ProcessorContext,
    ReplaceVariables, VariableProviderContext,
};
use crate::streaming::LogStream;
use crate::types::{HttpFile, Region, Variables};
use crate::utils::CancelHandle;

pub use interceptor::{CreateRequestInterceptor, RegionSpanMiddleware};

/// Name of the built-in variable replacement action.
pub const REPLACE_VARIABLES: &str = "replaceVariables";

/// Decides whether a region takes part in a whole-file send.
pub type RegionPredicate = Arc<dyn Fn(&Region) -> bool + Send + Sync>;

/// What a send executes.
#[derive(Clone)]
pub enum SendTarget {
    Region(Arc<Region>),
    Regions(Vec<Arc<Region>>),
    File { predicate: Option<RegionPredicate> },
}

impl std::fmt::Debug for SendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendTarget::Region(region) => f.debug_tuple("Region").field(&region.name).finish(),
            SendTarget::Regions(regions) => f
                .debug_tuple("Regions")
                .field(&regions.iter().map(|r| r.name.as_str()).collect::<Vec<_>>())
                .finish(),
            SendTarget::File { predicate } => f
                .debug_struct("File")
                .field("predicate", &predicate.is_some())
                .finish(),
        }
    }
}

/// Caller side input of a send.
pub struct SendContext {
    pub file: Arc<HttpFile>,
    pub target: SendTarget,
    /// Caller variables; they win over every provider.
    pub variables: Variables,
    /// Caller configuration, merged over whatever the config provider loads.
    pub config: Option<EnvironmentConfig>,
    /// Overrides the file's active environments.
    pub active_environment: Option<Vec<String>>,
    pub progress: Option<CancelHandle>,
    /// Sink for interim responses of streamed exchanges.
    pub log_stream: Option<Arc<dyn LogStream>>,
    /// Sink for final responses.
    pub log_response: Option<Arc<dyn LogStream>>,
    /// Initial context options, e.g. parsed proto definitions.
    pub options: ContextOptions,
}

impl std::fmt::Debug for SendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendContext")
            .field("file", &self.file.file_name)
            .field("target", &self.target)
            .field("variables", &self.variables)
            .field("active_environment", &self.active_environment)
            .finish_non_exhaustive()
    }
}

impl SendContext {
    fn with_target(file: Arc<HttpFile>, target: SendTarget) -> Self {
        Self {
            file,
            target,
            variables: Variables::new(),
            config: None,
            active_environment: None,
            progress: None,
            log_stream: None,
            log_response: None,
            options: ContextOptions::new(),
        }
    }

    pub fn region(file: Arc<HttpFile>, region: Arc<Region>) -> Self {
        Self::with_target(file, SendTarget::Region(region))
    }

    pub fn regions(file: Arc<HttpFile>, regions: Vec<Arc<Region>>) -> Self {
        Self::with_target(file, SendTarget::Regions(regions))
    }

    pub fn file(file: Arc<HttpFile>) -> Self {
        Self::with_target(file, SendTarget::File { predicate: None })
    }

    /// Only meaningful for whole-file sends.
    pub fn with_predicate(mut self, predicate: impl Fn(&Region) -> bool + Send + Sync + 'static) -> Self {
        if let SendTarget::File { predicate: slot } = &mut self.target {
            *slot = Some(Arc::new(predicate));
        }
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_config(mut self, config: EnvironmentConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_environment = Some(environments.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_progress(mut self, progress: CancelHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_log_stream(mut self, sink: Arc<dyn LogStream>) -> Self {
        self.log_stream = Some(sink);
        self
    }

    pub fn with_log_response(mut self, sink: Arc<dyn LogStream>) -> Self {
        self.log_response = Some(sink);
        self
    }

    pub fn with_option<T: std::any::Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.options.insert(key, value);
        self
    }
}

/// Runs regions against an explicit handler registry.
#[derive(Clone)]
pub struct Sender {
    registry: Arc<HandlerRegistry>,
    config_provider: Arc<dyn ConfigProvider>,
    variable_providers: HookPoint<VariableProviderContext, Variables>,
    environment_providers: HookPoint<VariableProviderContext, Vec<String>>,
    middlewares: Vec<Arc<dyn ActionMiddleware<ProcessorContext>>>,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("registry", &self.registry)
            .field("variable_providers", &self.variable_providers)
            .field("environment_providers", &self.environment_providers)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Sender with the default providers and middleware.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: Arc<HandlerRegistry>) -> SenderBuilder {
        SenderBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Execute whatever `context.target` names.
    pub async fn send(&self, context: SendContext) -> Result<bool> {
        match context.target.clone() {
            SendTarget::Region(region) => self.send_region(&context, region).await,
            SendTarget::Regions(regions) => self.send_regions(&context, &regions).await,
            SendTarget::File { predicate } => self.send_file(&context, predicate.as_ref()).await,
        }
    }

    async fn send_region(&self, context: &SendContext, region: Arc<Region>) -> Result<bool> {
        let mut ctx = self.create_empty_processor_context(context).await?;
        if !self.execute_global_scripts(&mut ctx).await? {
            tracing::debug!(target: "regionflow::orchestrator", region = %region.name, "global scripts stopped the send");
            return Ok(false);
        }
        ctx.for_region(region);
        self.process_region_actions(&mut ctx).await
    }

    async fn send_regions(&self, context: &SendContext, regions: &[Arc<Region>]) -> Result<bool> {
        let mut ctx = self.create_empty_processor_context(context).await?;
        if !self.execute_global_scripts(&mut ctx).await? {
            tracing::debug!(target: "regionflow::orchestrator", "global scripts stopped the send");
            return Ok(false);
        }
        for region in regions {
            ctx.for_region(region.clone());
            if !self.process_region_actions(&mut ctx).await? {
                tracing::debug!(target: "regionflow::orchestrator", region = %region.name, "region failed, stopping");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn send_file(&self, context: &SendContext, predicate: Option<&RegionPredicate>) -> Result<bool> {
        let mut ctx = self.create_empty_processor_context(context).await?;
        for region in &context.file.regions {
            if region.request.is_some() && predicate.is_some_and(|accept| !accept(region.as_ref())) {
                tracing::debug!(target: "regionflow::orchestrator", region = %region.name, "region disabled by predicate");
                continue;
            }
            ctx.for_region(region.clone());
            if !self.process_region_actions(&mut ctx).await? {
                tracing::debug!(target: "regionflow::orchestrator", region = %region.name, "region failed, continuing");
            }
        }
        Ok(true)
    }

    /// Resolve configuration and variables into a context without region.
    pub async fn create_empty_processor_context(&self, context: &SendContext) -> Result<ProcessorContext> {
        let mut provider_ctx = self
            .variable_provider_context(&context.file, context.config.as_ref(), context.active_environment.clone())
            .await?;
        provider_ctx.variables = context.variables.clone();
        let variables = self.get_variables(&mut provider_ctx).await?;

        let mut ctx = ProcessorContext::new(context.file.clone(), provider_ctx.config.clone());
        ctx.variables = variables;
        ctx.environments = provider_ctx.environments;
        ctx.options = context.options.clone();
        ctx.progress = context.progress.clone();
        ctx.log_stream = context.log_stream.clone();
        ctx.log_response = context.log_response.clone();
        Ok(ctx)
    }

    /// Built-in providers merged with the file's own, file entries winning.
    pub async fn get_variables(&self, ctx: &mut VariableProviderContext) -> Result<Variables> {
        let providers = self.variable_providers.merge(&ctx.file.hooks.provide_variables);
        crate::processor::get_variables(&providers, ctx).await
    }

    /// Every environment name known to the providers, sorted.
    pub async fn get_environments(&self, file: Arc<HttpFile>, config: Option<&EnvironmentConfig>) -> Result<Vec<String>> {
        let mut ctx = self.variable_provider_context(&file, config, None).await?;
        let providers = self.environment_providers.merge(&file.hooks.provide_environments);
        crate::processor::get_environments(&providers, &mut ctx).await
    }

    async fn variable_provider_context(
        &self,
        file: &Arc<HttpFile>,
        config: Option<&EnvironmentConfig>,
        active_environment: Option<Vec<String>>,
    ) -> Result<VariableProviderContext> {
        let config = self.config_provider.load(config, file.root_dir.as_deref()).await?;
        let mut ctx = VariableProviderContext::new(file.clone(), Arc::new(config));
        if let Some(environments) = active_environment {
            ctx.environments = environments;
        }
        tracing::debug!(target: "regionflow::orchestrator", file = %file.file_name, environments = ?ctx.environments, "environment resolved");
        Ok(ctx)
    }

    /// Run the file's global regions in order. `false` when one of them
    /// fails or cancels.
    pub async fn execute_global_scripts(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        for global in &ctx.file.global_regions.clone() {
            ctx.for_region(global.clone());
            if !self.process_region_actions(ctx).await? {
                tracing::debug!(target: "regionflow::orchestrator", region = %global.name, "global script failed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run the action chain of `ctx.region`.
    pub async fn process_region_actions(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        if ctx.is_cancelled() {
            tracing::debug!(target: "regionflow::orchestrator", region = %ctx.region.name, "cancelled before start");
            return Ok(false);
        }
        let chain = self.action_chain(&ctx.region)?;
        match chain.run(ctx).await? {
            HookOutcome::Completed(success) => Ok(success),
            HookOutcome::Cancelled => Ok(false),
        }
    }

    fn action_chain(&self, region: &Region) -> Result<ActionChain<ProcessorContext>> {
        let mut hooks = region.hooks.execute.clone();
        if !hooks.contains(REPLACE_VARIABLES) {
            hooks.add_hook(
                REPLACE_VARIABLES,
                ReplaceVariables,
                HookConstraints::before([ProtocolDispatch::NAME]),
            )?;
        }
        if !hooks.contains(ProtocolDispatch::NAME) {
            hooks.add_hook(
                ProtocolDispatch::NAME,
                ProtocolDispatch::new(self.registry.clone()),
                HookConstraints::none(),
            )?;
        }
        Ok(self
            .middlewares
            .iter()
            .cloned()
            .fold(ActionChain::new(hooks), ActionChain::with_middleware))
    }
}

/// Builder for [`Sender`].
pub struct SenderBuilder {
    registry: Arc<HandlerRegistry>,
    config_provider: Option<Arc<dyn ConfigProvider>>,
    variable_providers: HookPoint<VariableProviderContext, Variables>,
    environment_providers: HookPoint<VariableProviderContext, Vec<String>>,
    middlewares: Vec<Arc<dyn ActionMiddleware<ProcessorContext>>>,
    default_middleware: bool,
}

impl SenderBuilder {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            config_provider: None,
            variable_providers: HookPoint::with_hook("provideVariables", "config", ConfigVariableProvider),
            environment_providers: HookPoint::with_hook(
                "provideEnvironments",
                "config",
                ConfigEnvironmentProvider,
            ),
            middlewares: Vec::new(),
            default_middleware: true,
        }
    }

    /// Defaults to [`JsonFileConfigProvider`].
    pub fn config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    pub fn variable_provider(
        mut self,
        name: impl Into<String>,
        provider: impl Hook<VariableProviderContext, Variables> + 'static,
        constraints: HookConstraints,
    ) -> Result<Self> {
        self.variable_providers.add_hook(name, provider, constraints)?;
        Ok(self)
    }

    pub fn environment_provider(
        mut self,
        name: impl Into<String>,
        provider: impl Hook<VariableProviderContext, Vec<String>> + 'static,
        constraints: HookConstraints,
    ) -> Result<Self> {
        self.environment_providers.add_hook(name, provider, constraints)?;
        Ok(self)
    }

    /// Drop the built-in providers reading the environment config.
    pub fn without_config_providers(mut self) -> Self {
        self.variable_providers.remove_hook("config");
        self.environment_providers.remove_hook("config");
        self
    }

    /// Extra middleware, inside the built-in span and request interceptor.
    pub fn middleware(mut self, middleware: Arc<dyn ActionMiddleware<ProcessorContext>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Leave out [`RegionSpanMiddleware`] and [`CreateRequestInterceptor`].
    pub fn without_default_middleware(mut self) -> Self {
        self.default_middleware = false;
        self
    }

    pub fn build(self) -> Sender {
        let mut middlewares: Vec<Arc<dyn ActionMiddleware<ProcessorContext>>> = Vec::new();
        if self.default_middleware {
            middlewares.push(Arc::new(RegionSpanMiddleware));
            middlewares.push(Arc::new(Intercept(CreateRequestInterceptor)));
        }
        middlewares.extend(self.middlewares);
        Sender {
            registry: self.registry,
            config_provider: self
                .config_provider
                .unwrap_or_else(|| Arc::new(JsonFileConfigProvider::default())),
            variable_providers: self.variable_providers,
            environment_providers: self.environment_providers,
            middlewares,
        }
    }
}
