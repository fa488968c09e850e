//! Core data model: requests, responses, regions and headers.

pub mod headers;
pub mod region;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use region::{ActionHooks, ContextHooks, FileHooks, HttpFile, Region, RegionHooks, RegionMetadata};
pub use request::{
    AmqpMethod, AmqpRequest, Body, ChannelCredentials, EventSourceRequest, GrpcRequest,
    HttpRequest, Protocol, Request,
};
pub use response::{ContentType, Response, STATUS_PROTOCOL_ERROR, STATUS_UNSET, Timings};

/// Resolved variables; later writers win on merge.
pub type Variables = serde_json::Map<String, serde_json::Value>;
