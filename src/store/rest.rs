//! Document store over plain HTTPS + JSON.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET    v1/{collection}`       -> `{"documents": [{"id": .., "data": ..}]}`
//! - `POST   v1/{collection}`       -> the stored document
//! - `PUT    v1/{collection}/{id}`  -> the stored document
//! - `DELETE v1/{collection}/{id}`  -> any 2xx

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{Document, DocumentStore};
use crate::error::{Error, Result};
use crate::net::{HttpClient, HttpRequest, HttpResponse, Method};

#[derive(Debug, Deserialize)]
struct ListResponse {
  #[serde(default)]
  documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
  Message { message: String },
  Text(String),
}

pub struct RestDocumentStore<H> {
  http: H,
  base_url: Url,
  token: Option<String>,
}

impl<H: HttpClient> RestDocumentStore<H> {
  pub fn new(http: H, base_url: Url, token: Option<String>) -> Self {
    Self {
      http,
      base_url,
      token,
    }
  }

  fn url(&self, segments: &[&str]) -> Result<String> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| Error::Validation(format!("invalid backend URL {}", self.base_url)))?
      .pop_if_empty()
      .push("v1")
      .extend(segments);
    Ok(url.to_string())
  }

  fn request(&self, method: Method, url: String) -> HttpRequest {
    let request = HttpRequest::new(method, url).with_header("accept", "application/json");
    match &self.token {
      Some(token) => request.with_header("authorization", format!("Bearer {}", token)),
      None => request,
    }
  }

  async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
    let response = self.http.send(request).await?;
    if response.is_success() {
      Ok(response)
    } else {
      Err(status_error(&response))
    }
  }
}

/// Map a non-2xx response onto the error taxonomy.
fn status_error(response: &HttpResponse) -> Error {
  let detail = error_message(response);
  let message = format!("HTTP {}: {}", response.status, detail);
  match response.status {
    401 | 403 => Error::Unauthorized(message),
    408 | 429 | 500..=599 => Error::TransientNetwork(message),
    _ => Error::Validation(message),
  }
}

fn error_message(response: &HttpResponse) -> String {
  if let Ok(body) = response.json::<ErrorBody>() {
    match (body.error, body.message) {
      (Some(ErrorDetail::Message { message }), _) => return message,
      (Some(ErrorDetail::Text(text)), _) => return text,
      (None, Some(message)) => return message,
      (None, None) => {}
    }
  }
  let text = response.text();
  let text = text.trim();
  if text.is_empty() {
    "no details".to_string()
  } else {
    text.chars().take(200).collect()
  }
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T> {
  response
    .json()
    .map_err(|e| Error::Decode(format!("{}", e)))
}

#[async_trait]
impl<H: HttpClient> DocumentStore for RestDocumentStore<H> {
  async fn list(&self, collection: &str) -> Result<Vec<Document>> {
    let url = self.url(&[collection])?;
    let response = self.execute(self.request(Method::Get, url)).await?;
    let list: ListResponse = decode(&response)?;
    Ok(list.documents)
  }

  async fn create(&self, collection: &str, data: Value) -> Result<Document> {
    let url = self.url(&[collection])?;
    let request = self.request(Method::Post, url).with_json(&data)?;
    let response = self.execute(request).await?;
    decode(&response)
  }

  async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document> {
    let url = self.url(&[collection, id])?;
    let request = self.request(Method::Put, url).with_json(&data)?;
    let response = self.execute(request).await?;
    decode(&response)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<()> {
    let url = self.url(&[collection, id])?;
    self.execute(self.request(Method::Delete, url)).await?;
    Ok(())
  }
}
