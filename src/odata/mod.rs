//! OData module
//!
//! Protocol client for OData v2 and v4 services: request construction, the
//! CSRF handshake, version translation, response normalization and error
//! synthesis.

pub mod client;
pub mod csrf;
pub mod error;
pub mod metadata;
pub mod request;
pub mod response;
pub mod session;
pub mod version;

pub use client::{ClientSettings, FunctionMethod, ODataClient, UpdateMethod};
pub use error::{ErrorDetail, ODataError, ServiceError};
pub use metadata::{EntitySet, EntityType, FunctionImport, Property, ServiceMetadata};
pub use request::ODataRequest;
pub use response::ResponseEnvelope;
pub use session::{ClientSession, Credentials, ODataVersion};
pub use version::{KeyPredicate, ODataLiteral, QueryOptions, QueryParams};
