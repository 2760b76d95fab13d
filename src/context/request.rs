//! The request facet of a context.

use std::collections::HashMap;

use bytes::Bytes;
use url::Url;

use super::ContextError;
use crate::http::request::parse_query_string;
use crate::http::{ContentKind, Exchange, Headers, Method};
use crate::router::PathParams;

/// Request data of one exchange.
///
/// After a forward, [`full_url`](Self::full_url) and [`path`](Self::path)
/// describe the forward target while
/// [`original_full_url`](Self::original_full_url) keeps the URL the client sent.
#[derive(Debug, Clone)]
pub struct RequestData {
    method: Method,
    original_url: Url,
    url: Url,
    headers: Headers,
    body: Bytes,
    query: HashMap<String, String>,
    path_params: PathParams,
}

impl RequestData {
    pub(crate) fn from_exchange(exchange: &dyn Exchange) -> Result<Self, ContextError> {
        let raw = exchange.full_url();
        let url = Url::parse(&raw).map_err(|source| ContextError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        let query = url.query().map(parse_query_string).unwrap_or_default();

        Ok(Self {
            method: exchange.method(),
            original_url: url.clone(),
            url,
            headers: exchange.request_headers(),
            body: exchange.request_body(),
            query,
            path_params: PathParams::new(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The (possibly forwarded) path, still percent-encoded.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn full_url(&self) -> &str {
        self.url.as_str()
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    /// The URL the client requested, before any forward.
    pub fn original_full_url(&self) -> &str {
        self.original_url.as_str()
    }

    pub fn is_forwarded(&self) -> bool {
        self.url != self.original_url
    }

    pub fn query_string(&self) -> Option<&str> {
        self.url.query()
    }

    /// A decoded query parameter of the current URL.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// Parameters captured by the route of the running handler.
    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// The format the client prefers among those the engine renders.
    pub fn content_type_best_match(&self) -> ContentKind {
        ContentKind::best_match(self.headers.get("accept"))
    }

    pub(crate) fn forward_to(&mut self, url: Url) {
        self.query = url.query().map(parse_query_string).unwrap_or_default();
        self.url = url;
    }

    pub(crate) fn set_path_params(&mut self, params: PathParams) {
        self.path_params = params;
    }
}
