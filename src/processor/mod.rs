//! Per-execution state shared by hooks and protocol handlers.

pub mod replace;
pub mod variables;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::EnvironmentConfig;
use crate::streaming::{LogStream, StreamingSession};
use crate::types::{ContextHooks, FileHooks, HttpFile, Region, RegionHooks, Request, Response, Variables};
use crate::utils::CancelHandle;

pub use replace::ReplaceVariables;
pub use variables::{
    ConfigEnvironmentProvider, ConfigVariableProvider, VariableProviderContext, get_environments,
    get_variables,
};

/// Free-form side channel for artifacts computed during an execution,
/// such as parsed protocol definitions.
#[derive(Clone, Default)]
pub struct ContextOptions {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup; `None` when missing or stored with another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Mutable state of one execution.
///
/// List executions reuse the same context for every region: variables and
/// options carry over while the request and response slots are reset.
pub struct ProcessorContext {
    pub file: Arc<HttpFile>,
    pub region: Arc<Region>,
    /// Working copy of the region's request template.
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub variables: Variables,
    pub options: ContextOptions,
    pub config: Arc<EnvironmentConfig>,
    pub environments: Vec<String>,
    pub progress: Option<CancelHandle>,
    /// Sink for interim responses of streamed exchanges.
    pub log_stream: Option<Arc<dyn LogStream>>,
    /// Sink for final responses.
    pub log_response: Option<Arc<dyn LogStream>>,
    /// Set while `on_streaming` hooks run.
    pub streaming: Option<StreamingSession>,
}

impl fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("file", &self.file.file_name)
            .field("region", &self.region.name)
            .field("request", &self.request)
            .field("variables", &self.variables)
            .field("options", &self.options)
            .field("environments", &self.environments)
            .finish_non_exhaustive()
    }
}

impl ProcessorContext {
    /// Context without a region; [`for_region`](Self::for_region) selects one.
    pub fn new(file: Arc<HttpFile>, config: Arc<EnvironmentConfig>) -> Self {
        Self {
            file,
            region: Arc::new(Region::default()),
            request: None,
            response: None,
            variables: Variables::new(),
            options: ContextOptions::new(),
            config,
            environments: Vec::new(),
            progress: None,
            log_stream: None,
            log_response: None,
            streaming: None,
        }
    }

    /// Point the context at another region, keeping variables and options.
    pub fn for_region(&mut self, region: Arc<Region>) {
        self.region = region;
        self.request = None;
        self.response = None;
        self.streaming = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.as_ref().is_some_and(CancelHandle::is_cancelled)
    }

    pub fn on_request_hooks(&self) -> ContextHooks {
        self.merged(|f| &f.on_request, |r| &r.on_request)
    }

    pub fn on_response_hooks(&self) -> ContextHooks {
        self.merged(|f| &f.on_response, |r| &r.on_response)
    }

    pub fn on_streaming_hooks(&self) -> ContextHooks {
        self.merged(|f| &f.on_streaming, |r| &r.on_streaming)
    }

    pub fn response_logging_hooks(&self) -> ContextHooks {
        self.merged(|f| &f.response_logging, |r| &r.response_logging)
    }

    // file-level hooks first, region entries replace same-named ones
    fn merged(
        &self,
        file: fn(&FileHooks) -> &ContextHooks,
        region: fn(&RegionHooks) -> &ContextHooks,
    ) -> ContextHooks {
        file(&self.file.hooks).merge(region(&self.region.hooks))
    }
}
