use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use super::{Headers, HttpRequest, HttpResponse, Method, Network, ResponseType, TransportError};

/// Network implementation backed by reqwest.
#[derive(Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
  /// Application origin, used to tell same-origin responses from cross-origin ones
  origin: Url,
}

impl ReqwestNetwork {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

/// Classify a response the way fetch does: same origin is basic, cross origin is
/// cors when the server opted in and opaque otherwise.
fn response_type(origin: &Url, final_url: &Url, headers: &Headers) -> ResponseType {
  if final_url.origin() == origin.origin() {
    ResponseType::Basic
  } else if headers
    .keys()
    .any(|k| k.eq_ignore_ascii_case("access-control-allow-origin"))
  {
    ResponseType::Cors
  } else {
    ResponseType::Opaque
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn classify(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else if e.is_connect() {
    TransportError::Connect(e.to_string())
  } else {
    TransportError::Other(e.to_string())
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify)?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response.bytes().await.map_err(classify)?.to_vec();

    Ok(HttpResponse {
      status,
      response_type: response_type(&self.origin, &final_url, &headers),
      redirected: final_url != request.url,
      headers,
      body,
    })
  }
}
