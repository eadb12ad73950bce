//! The HTTP primitive every backend call goes through.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HttpError, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((key.into(), value.into()));
    self
  }

  pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, HttpError> {
    let bytes = serde_json::to_vec(body)
      .map_err(|e| HttpError::InvalidRequest(format!("unserializable body: {}", e)))?;
    self.body = Some(bytes);
    Ok(self.with_header("content-type", "application/json"))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Outbound HTTP call primitive.
///
/// A response with any status is `Ok`; only failures to get a response at
/// all are `Err`.
#[async_trait]
pub trait HttpClient: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
    (**self).send(request).await
  }
}

/// Production client backed by reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
  client: reqwest::Client,
}

impl ReqwestClient {
  pub fn new(request_timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(request_timeout)
      .user_agent(concat!("acon/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl HttpClient for ReqwestClient {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let url = reqwest::Url::parse(&request.url)
      .map_err(|e| HttpError::InvalidRequest(format!("{}: {}", request.url, e)))?;

    let mut builder = self.client.request(method, url);
    for (key, value) in &request.headers {
      builder = builder.header(key.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(transport_error)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(transport_error)?;

    Ok(HttpResponse {
      status,
      body: body.to_vec(),
    })
  }
}

fn transport_error(err: reqwest::Error) -> HttpError {
  if err.is_builder() {
    return HttpError::InvalidRequest(error_chain(&err));
  }

  let message = error_chain(&err);
  let kind = if err.is_timeout() {
    TransportKind::Timeout
  } else if err.is_connect() {
    if message.to_lowercase().contains("dns error") {
      TransportKind::Dns
    } else {
      TransportKind::Connect
    }
  } else if err.is_request() || err.is_body() {
    TransportKind::Reset
  } else {
    TransportKind::Other
  };

  HttpError::Transport { kind, message }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
  let mut message = err.to_string();
  let mut source = err.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_with_json_sets_body_and_content_type() {
    let request = HttpRequest::new(Method::Post, "https://api.example.com/v1/books")
      .with_json(&serde_json::json!({ "title": "Physics" }))
      .unwrap();

    assert_eq!(request.body.as_deref(), Some(&br#"{"title":"Physics"}"#[..]));
    assert!(request
      .headers
      .iter()
      .any(|(k, v)| k == "content-type" && v == "application/json"));
  }

  #[test]
  fn test_response_success_range() {
    let ok = HttpResponse {
      status: 204,
      body: Vec::new(),
    };
    let not_found = HttpResponse {
      status: 404,
      body: Vec::new(),
    };
    assert!(ok.is_success());
    assert!(!not_found.is_success());
  }
}
