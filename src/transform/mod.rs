//! Transform service integration: contract, HTTP transport, resilient
//! response decoding.

pub mod decode;
pub mod http;
pub mod service;

pub use decode::decode;
pub use http::{HttpTransformService, ServiceConfig};
pub use service::{MockTransformService, TransformRequest, TransformService};
