//! odata-core: protocol core for an OData-style resource query service
//!
//! This crate contains everything between the transport and the storage:
//! - EDM: declarative type definitions, validating builder, cached registry
//! - URI grammar: resource path resolution, key predicates, query options
//! - Expression grammar for `$filter` / `$orderby`
//! - Batch decomposition of `multipart/mixed` bodies
//! - Content negotiation over registered renderers and unmarshallers
//! - The staged request pipeline (Parse → Unmarshal → Process → Render)
//!
//! Transport bootstrap and storage engines live outside; storage is reached
//! through the [`processor::DataSource`] port.
//!
//! ## Pipeline Flow
//!
//! ```text
//! ODataRequest → Parse (UriParser + EDM) → ODataUri
//!                      ↓
//!        Unmarshal (writes only, negotiated Unmarshaller)
//!                      ↓
//!        Process (Read / Write / Batch fan-out via DataSource)
//!                      ↓
//!        Render (negotiated Renderer or ChunkedRenderer) → ODataResponse
//! ```

pub mod batch;
pub mod config;
pub mod edm;
pub mod error;
pub mod expr;
pub mod negotiation;
pub mod pipeline;
pub mod processor;
pub mod render;
pub mod request;
pub mod result;
pub mod uri;

// Re-export commonly used types
pub use config::{ServiceConfig, ServiceRoot};
pub use edm::{Declaration, EdmRegistry, EntityDataModel, ModelDefinition};
pub use error::{ErrorPayload, ODataError};
pub use negotiation::{ContentNegotiator, RequestContext};
pub use pipeline::{Pipeline, PipelineRun, PipelineState};
pub use processor::{ChangesetTransaction, DataSource, DataSourceError};
pub use request::{Headers, Method, ODataRequest, ODataResponse, ResponseBody};
pub use result::QueryResult;
pub use uri::{ODataUri, UriParseError, UriParser};
