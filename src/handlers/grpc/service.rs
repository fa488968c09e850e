//! Protocol definitions and target resolution.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::transport::CallShape;
use crate::error::{Result, SendError};

/// Key of the parsed [`ProtoDefinitions`] in the context options.
pub const PROTO_DEFINITIONS: &str = "protoDefinitions";

lazy_static! {
    static ref GRPC_URL: Regex = RegexBuilder::new(
        r"^\s*((?P<protocol>grpc|https?)://)?(?P<server>[^/]+?)(/(?P<path>.+))?/(?P<service>[^/]+?)/(?P<method>[^/]+?)$"
    )
    .case_insensitive(true)
    .build()
    .expect("grpc url pattern is valid");
}

/// `[protocol://]server[/path]/service/method`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcUrl {
    pub protocol: Option<String>,
    pub server: String,
    pub path: Option<String>,
    pub service: String,
    pub method: String,
}

impl GrpcUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let caps = GRPC_URL.captures(url).ok_or_else(|| {
            SendError::ConfigurationError(format!(
                "Url {url} does not match pattern <server>/<service>/<method>"
            ))
        })?;
        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        Ok(Self {
            protocol: group("protocol").map(|p| p.to_ascii_lowercase()),
            server: group("server").unwrap_or_default(),
            path: group("path"),
            service: group("service").unwrap_or_default(),
            method: group("method").unwrap_or_default(),
        })
    }

    pub fn uses_tls(&self) -> bool {
        self.protocol.as_deref() == Some("https")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDefinition {
    #[serde(default)]
    pub request_stream: bool,
    #[serde(default)]
    pub response_stream: bool,
    /// Full method path; derived from service and method when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MethodDefinition {
    pub fn unary() -> Self {
        Self::default()
    }

    pub fn streaming(request_stream: bool, response_stream: bool) -> Self {
        Self {
            request_stream,
            response_stream,
            path: None,
        }
    }

    pub fn shape(&self) -> CallShape {
        CallShape::of(self.request_stream, self.response_stream)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    pub methods: IndexMap<String, MethodDefinition>,
}

impl ServiceDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, name: impl Into<String>, method: MethodDefinition) -> Self {
        self.methods.insert(name.into(), method);
        self
    }
}

/// A package tree node: either a service or a nested package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtoNode {
    Service(ServiceDefinition),
    Package(IndexMap<String, ProtoNode>),
}

/// Loaded protocol definitions, nested by package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtoDefinitions {
    root: IndexMap<String, ProtoNode>,
}

/// Target of one call after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub service: String,
    pub method: String,
    pub definition: MethodDefinition,
}

impl ResolvedMethod {
    pub fn path(&self) -> String {
        self.definition
            .path
            .clone()
            .unwrap_or_else(|| format!("/{}/{}", self.service, self.method))
    }
}

impl ProtoDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service under its dotted name, creating packages as needed.
    pub fn insert_service(&mut self, qualified_name: &str, service: ServiceDefinition) {
        let mut segments: Vec<&str> = qualified_name.split('.').collect();
        let Some(name) = segments.pop() else {
            return;
        };
        let mut level = &mut self.root;
        for package in segments {
            let node = level
                .entry(package.to_string())
                .or_insert_with(|| ProtoNode::Package(IndexMap::new()));
            if matches!(node, ProtoNode::Service(_)) {
                *node = ProtoNode::Package(IndexMap::new());
            }
            let ProtoNode::Package(children) = node else {
                return;
            };
            level = children;
        }
        level.insert(name.to_string(), ProtoNode::Service(service));
    }

    pub fn with_service(mut self, qualified_name: &str, service: ServiceDefinition) -> Self {
        self.insert_service(qualified_name, service);
        self
    }

    /// Merge another set of definitions into this one.
    pub fn extend(&mut self, other: ProtoDefinitions) {
        for (name, service) in other.services() {
            self.insert_service(&name, service.clone());
        }
    }

    /// Services keyed by their dotted, fully qualified name.
    pub fn services(&self) -> IndexMap<String, &ServiceDefinition> {
        let mut flat = IndexMap::new();
        flatten("", &self.root, &mut flat);
        flat
    }

    /// Find the service and method addressed by `url`.
    ///
    /// Services match exactly first and then by substring; methods exactly
    /// first and then case-insensitively.
    pub fn resolve(&self, url: &GrpcUrl) -> Result<ResolvedMethod> {
        let services = self.services();
        let (service_name, service) = match services.get_key_value(url.service.as_str()) {
            Some((name, service)) => (name.clone(), *service),
            None => {
                let Some((name, service)) = services.iter().find(|(name, _)| name.contains(&url.service)) else {
                    let available: Vec<&str> = services.keys().map(String::as_str).collect();
                    return Err(SendError::ConfigurationError(if available.is_empty() {
                        format!("Service {} does not exist. No Service imported", url.service)
                    } else {
                        format!(
                            "Service {} does not exist. Available Services: {}",
                            url.service,
                            available.join(", ")
                        )
                    }));
                };
                tracing::warn!(target: "regionflow::grpc", service = %url.service, similar = %name, "service not found, using similar service");
                (name.clone(), *service)
            }
        };

        let method = service
            .methods
            .get_key_value(url.method.as_str())
            .or_else(|| {
                service
                    .methods
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&url.method))
            })
            .ok_or_else(|| {
                let available: Vec<&str> = service.methods.keys().map(String::as_str).collect();
                SendError::ConfigurationError(format!(
                    "Method {} does not exist on {service_name}. Available Methods: {}",
                    url.method,
                    available.join(", ")
                ))
            })?;

        Ok(ResolvedMethod {
            service: service_name,
            method: method.0.clone(),
            definition: method.1.clone(),
        })
    }
}

fn flatten<'a>(
    prefix: &str,
    nodes: &'a IndexMap<String, ProtoNode>,
    out: &mut IndexMap<String, &'a ServiceDefinition>,
) {
    for (name, node) in nodes {
        let qualified = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match node {
            ProtoNode::Service(service) => {
                out.insert(qualified, service);
            }
            ProtoNode::Package(children) => flatten(&qualified, children, out),
        }
    }
}
