//! OData Client module
//!
//! HTTP client for OData v2 and v4 services.
//!
//! The client itself is stateless apart from the underlying connection pool;
//! everything that changes while talking to a service lives in the
//! [`ClientSession`] passed to each operation. Every operation also takes a
//! `CancellationToken` that aborts in-flight requests, including the CSRF
//! replay.

use super::error::{self, ODataError};
use super::metadata::{self, ServiceMetadata};
use super::request::{ODataRequest, RequestBuilder, CONTENT_TYPE_JSON, CONTENT_TYPE_XML, DEFAULT_USER_AGENT};
use super::response::{self, ResponseEnvelope};
use super::session::{ClientSession, ODataVersion, SessionCookie};
use super::version::{self, KeyPredicate, QueryOptions};
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Path of the metadata document
pub const METADATA_ENDPOINT: &str = "$metadata";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Verb used by update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMethod {
    #[default]
    Put,
    Patch,
    Merge,
}

impl UpdateMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "PUT" => Some(UpdateMethod::Put),
            "PATCH" => Some(UpdateMethod::Patch),
            "MERGE" => Some(UpdateMethod::Merge),
            _ => None,
        }
    }

    fn to_method(self) -> Method {
        match self {
            UpdateMethod::Put => Method::PUT,
            UpdateMethod::Patch => Method::PATCH,
            UpdateMethod::Merge => Method::from_bytes(b"MERGE").unwrap_or(Method::PATCH),
        }
    }
}

/// Verb used to invoke a function import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionMethod {
    #[default]
    Get,
    Post,
}

impl FunctionMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(FunctionMethod::Get),
            "POST" => Some(FunctionMethod::Post),
            _ => None,
        }
    }
}

/// Transport settings shared by all sessions of a client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub insecure_ssl: bool,
    pub user_agent: String,
    /// Log payloads and include inner errors in error messages
    pub verbose: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            insecure_ssl: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            verbose: false,
        }
    }
}

/// Fully read HTTP response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cookies: Vec<SessionCookie>,
    pub body: Bytes,
}

impl RawResponse {
    async fn read(response: reqwest::Response) -> Result<Self, ODataError> {
        let status = response.status();
        let headers = response.headers().clone();
        let cookies = response
            .cookies()
            .map(|c| SessionCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
            })
            .collect();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            cookies,
            body,
        })
    }
}

/// OData client
#[derive(Debug, Clone)]
pub struct ODataClient {
    http: Client,
    user_agent: String,
    verbose: bool,
}

impl ODataClient {
    /// Create a new OData client
    pub fn new(settings: ClientSettings) -> Result<Self, ODataError> {
        let mut builder = Client::builder().timeout(settings.timeout);
        if settings.insecure_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            user_agent: settings.user_agent,
            verbose: settings.verbose,
        })
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Build and send one request, honoring cancellation. No retry.
    pub(crate) async fn dispatch(
        &self,
        session: &ClientSession,
        cancel: &CancellationToken,
        request: &ODataRequest,
    ) -> Result<RawResponse, ODataError> {
        let built = RequestBuilder::new(&self.http, &self.user_agent).build(session, request)?;
        tracing::debug!("{} {}", built.method(), built.url());

        if cancel.is_cancelled() {
            return Err(ODataError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ODataError::Cancelled),
            result = async {
                let response = self.http.execute(built).await?;
                RawResponse::read(response).await
            } => result,
        }
    }

    async fn execute_envelope(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        request: ODataRequest,
    ) -> Result<ResponseEnvelope, ODataError> {
        let response = self.execute(session, cancel, request).await?;
        response::normalize(
            response.status.as_u16(),
            &response.body,
            session.version(),
            self.verbose,
        )
    }

    /// Fetch and parse `$metadata`, switching the session into v2 or v4 mode.
    ///
    /// If the document cannot be parsed, the service document is fetched
    /// instead and a minimal v2 model is returned.
    pub async fn get_metadata(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
    ) -> Result<ServiceMetadata, ODataError> {
        let request = ODataRequest::get(METADATA_ENDPOINT).with_header(ACCEPT.as_str(), CONTENT_TYPE_XML)?;
        let response = self.execute(session, cancel, request).await?;

        if !response.status.is_success() {
            return Err(error::synthesize(
                response.status.as_u16(),
                &response.body,
                self.verbose,
            ));
        }

        match metadata::parse_metadata(&response.body, session.base_url()) {
            Ok(parsed) => {
                let version = ODataVersion::from_metadata_version(&parsed.version);
                tracing::info!(
                    "Parsed metadata: version {}, {} entity sets, {} function imports",
                    parsed.version,
                    parsed.entity_sets.len(),
                    parsed.function_imports.len()
                );
                session.set_version(version);
                Ok(parsed)
            }
            Err(e) => {
                tracing::warn!("Failed to parse metadata, falling back to service document: {}", e);
                self.get_service_document(session, cancel).await
            }
        }
    }

    async fn get_service_document(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
    ) -> Result<ServiceMetadata, ODataError> {
        let request = ODataRequest::get("").with_header(ACCEPT.as_str(), CONTENT_TYPE_JSON)?;
        let response = self.execute(session, cancel, request).await?;

        if !response.status.is_success() {
            return Err(error::synthesize(
                response.status.as_u16(),
                &response.body,
                self.verbose,
            ));
        }

        session.set_version(ODataVersion::V2);
        Ok(ServiceMetadata::minimal(session.base_url()))
    }

    /// List entities of an entity set
    pub async fn get_entity_set(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        entity_set: &str,
        options: &QueryOptions,
    ) -> Result<ResponseEnvelope, ODataError> {
        let params = version::list_query(session.version(), options);
        let endpoint = version::with_query(entity_set, &params);

        let envelope = self
            .execute_envelope(session, cancel, ODataRequest::get(endpoint))
            .await?;

        tracing::debug!(
            "Fetched {} records from {}, count: {:?}, next_link: {}",
            envelope.record_count(),
            entity_set,
            envelope.count,
            envelope.next_link.is_some()
        );

        Ok(envelope)
    }

    /// Get single entity by key. Options are passed through unchanged.
    pub async fn get_entity(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        entity_set: &str,
        key: &KeyPredicate,
        options: &QueryOptions,
    ) -> Result<ResponseEnvelope, ODataError> {
        let path = version::entity_path(entity_set, key);
        let endpoint = version::with_query(&path, &options.to_params());
        self.execute_envelope(session, cancel, ODataRequest::get(endpoint))
            .await
    }

    /// Create a new entity
    pub async fn create_entity(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        entity_set: &str,
        data: &Map<String, Value>,
    ) -> Result<ResponseEnvelope, ODataError> {
        self.prefetch_csrf_token(session, cancel).await?;

        let request = ODataRequest::new(Method::POST, entity_set).with_json(data)?;
        if self.verbose {
            let payload = Value::Object(data.clone());
            tracing::debug!("Creating entity with data: {}", payload);
        }

        self.execute_envelope(session, cancel, request).await
    }

    /// Update an existing entity
    pub async fn update_entity(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        entity_set: &str,
        key: &KeyPredicate,
        data: &Map<String, Value>,
        method: UpdateMethod,
    ) -> Result<ResponseEnvelope, ODataError> {
        self.prefetch_csrf_token(session, cancel).await?;

        let endpoint = version::entity_path(entity_set, key);
        let request = ODataRequest::new(method.to_method(), endpoint).with_json(data)?;
        if self.verbose {
            let payload = Value::Object(data.clone());
            tracing::debug!("Updating entity with data: {}", payload);
        }

        self.execute_envelope(session, cancel, request).await
    }

    /// Delete an entity
    pub async fn delete_entity(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        entity_set: &str,
        key: &KeyPredicate,
    ) -> Result<ResponseEnvelope, ODataError> {
        self.prefetch_csrf_token(session, cancel).await?;

        let endpoint = version::entity_path(entity_set, key);
        self.execute_envelope(session, cancel, ODataRequest::new(Method::DELETE, endpoint))
            .await
    }

    /// Call a function import.
    ///
    /// GET encodes parameters as OData literals in the query string; POST
    /// sends them as a JSON body and goes through the CSRF handshake.
    pub async fn call_function(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        function_name: &str,
        parameters: &Map<String, Value>,
        method: FunctionMethod,
    ) -> Result<ResponseEnvelope, ODataError> {
        let request = match method {
            FunctionMethod::Get => {
                let endpoint = if parameters.is_empty() {
                    function_name.to_string()
                } else {
                    format!("{}?{}", function_name, version::function_query(parameters))
                };
                ODataRequest::get(endpoint)
            }
            FunctionMethod::Post => {
                self.prefetch_csrf_token(session, cancel).await?;
                if self.verbose {
                    let payload = Value::Object(parameters.clone());
                    tracing::debug!("Calling function with data: {}", payload);
                }
                ODataRequest::new(Method::POST, function_name).with_json(parameters)?
            }
        };

        self.execute_envelope(session, cancel, request).await
    }
}
