//! Network access used for seeding and for cache misses.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;
use crate::http::{Headers, Request, Response, ResponseKind};

/// Something that can turn a request into a response.
///
/// A returned `Err` means no response arrived at all (offline, DNS failure,
/// connection reset). HTTP error statuses are responses, not errors.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// HTTP network backed by reqwest.
///
/// Responses from `origin` are classified as basic; everything else is a CORS
/// response and is never written back by the interceptor.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| FetchError::new(origin.as_str(), e))?;

    Ok(Self { client, origin })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  fn kind_for(&self, url: &Url) -> ResponseKind {
    if url.origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::new(request.url.as_str(), e))?;

    let url = response.url().clone();
    let redirected = without_fragment(&url) != without_fragment(&request.url);
    let status = response.status().as_u16();
    let headers = Headers::from_header_map(response.headers());
    let kind = self.kind_for(&url);

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::new(request.url.as_str(), e))?;

    Ok(Response {
      url,
      status,
      headers,
      body,
      kind,
      redirected,
    })
  }
}

fn without_fragment(url: &Url) -> Url {
  let mut url = url.clone();
  url.set_fragment(None);
  url
}
