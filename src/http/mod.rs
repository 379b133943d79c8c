//! HTTP-shaped requests and responses, and the network seam they travel through.

pub mod client;

pub use client::ReqwestNetwork;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Header name to value map. Names are kept as given.
pub type Headers = BTreeMap<String, String>;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }

  /// Methods that change server state and may be queued while offline.
  pub fn is_mutation(&self) -> bool {
    matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "HEAD" => Ok(Self::Head),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "PATCH" => Ok(Self::Patch),
      "DELETE" => Ok(Self::Delete),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_headers(mut self, headers: Headers) -> Self {
    self.headers.extend(headers);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Request identity used as the cache key: method plus absolute URL.
  pub fn cache_key(&self) -> String {
    cache_key(self.method, &self.url)
  }
}

/// Build the cache key for a method and absolute URL.
pub fn cache_key(method: Method, url: &Url) -> String {
  format!("{} {}", method, url)
}

/// How a response relates to the request origin, mirroring fetch response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with CORS
  Cors,
  /// Cross-origin response without CORS
  Opaque,
  /// Built locally (seeded or synthesized)
  Default,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Default => "default",
    }
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "default" => Ok(Self::Default),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// Whether the response came from a followed redirect
  pub redirected: bool,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  /// A JSON response built locally.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    let mut response = Self::new(status, value.to_string());
    response.response_type = ResponseType::Default;
    response
      .headers
      .insert("content-type".to_string(), "application/json".to_string());
    response
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Complete same-origin 200 that can be replayed from cache as-is.
  pub fn is_complete_basic(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic && !self.redirected
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Failure to get any response over the wire.
///
/// An HTTP error status is not a transport error; it arrives as an `HttpResponse`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("request timed out")]
  Timeout,
  #[error("transport error: {0}")]
  Other(String),
}

/// The network as seen by the offline layer.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<N: Network + ?Sized> Network for Arc<N> {
  async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
    (**self).fetch(request).await
  }
}
