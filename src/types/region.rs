//! Regions and the files that own them.
//!
//! Both are produced by the (external) parser and treated as immutable
//! templates by the pipeline; execution state lives in
//! [`ProcessorContext`](crate::processor::ProcessorContext).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::Variables;
use super::request::Request;
use crate::hooks::HookPoint;
use crate::processor::{ProcessorContext, VariableProviderContext};

/// Boolean action hooks: a `false` stops the region.
pub type ActionHooks = HookPoint<ProcessorContext, bool>;
/// Observer hooks over the processor context.
pub type ContextHooks = HookPoint<ProcessorContext, ()>;

/// Flags attached to a region by the parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMetadata {
    /// Do not emit interim responses for streamed chunks.
    pub no_streaming_log: bool,
    /// Accept invalid TLS certificates.
    pub no_reject_unauthorized: bool,
    /// Any other `# @key value` metadata.
    pub extra: HashMap<String, String>,
}

/// Hook points a region can carry on top of the file-level ones.
#[derive(Debug, Clone)]
pub struct RegionHooks {
    pub execute: ActionHooks,
    pub on_request: ContextHooks,
    pub on_response: ContextHooks,
    pub on_streaming: ContextHooks,
    pub response_logging: ContextHooks,
}

impl Default for RegionHooks {
    fn default() -> Self {
        Self {
            execute: HookPoint::new("execute"),
            on_request: HookPoint::new("onRequest"),
            on_response: HookPoint::new("onResponse"),
            on_streaming: HookPoint::new("onStreaming"),
            response_logging: HookPoint::new("responseLogging"),
        }
    }
}

/// One executable unit of a request file.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub name: String,
    pub request: Option<Request>,
    pub metadata: RegionMetadata,
    pub hooks: RegionHooks,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: impl Into<Request>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn with_metadata(mut self, metadata: RegionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// File-level hook points shared by every region of a file.
#[derive(Debug, Clone)]
pub struct FileHooks {
    pub provide_variables: HookPoint<VariableProviderContext, Variables>,
    pub provide_environments: HookPoint<VariableProviderContext, Vec<String>>,
    pub on_request: ContextHooks,
    pub on_response: ContextHooks,
    pub on_streaming: ContextHooks,
    pub response_logging: ContextHooks,
}

impl Default for FileHooks {
    fn default() -> Self {
        Self {
            provide_variables: HookPoint::new("provideVariables"),
            provide_environments: HookPoint::new("provideEnvironments"),
            on_request: HookPoint::new("onRequest"),
            on_response: HookPoint::new("onResponse"),
            on_streaming: HookPoint::new("onStreaming"),
            response_logging: HookPoint::new("responseLogging"),
        }
    }
}

/// A parsed request file.
#[derive(Debug, Clone, Default)]
pub struct HttpFile {
    pub file_name: String,
    pub root_dir: Option<PathBuf>,
    /// Regions in file order.
    pub regions: Vec<Arc<Region>>,
    /// Pre-script regions run once before region and list sends.
    pub global_regions: Vec<Arc<Region>>,
    pub active_environment: Option<Vec<String>>,
    pub hooks: FileHooks,
}

impl HttpFile {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn push_region(&mut self, region: Region) -> Arc<Region> {
        let region = Arc::new(region);
        self.regions.push(region.clone());
        region
    }

    pub fn push_global_region(&mut self, region: Region) -> Arc<Region> {
        let region = Arc::new(region);
        self.global_regions.push(region.clone());
        region
    }

    pub fn region(&self, name: &str) -> Option<&Arc<Region>> {
        self.regions.iter().find(|r| r.name == name)
    }
}
