//! Request and response snapshots exchanged between clients, the network and the store.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub use reqwest::Method;

/// Ordered header list with case-insensitive lookup.
///
/// Names are stored lowercased so stored snapshots compare byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a header, keeping any earlier value with the same name.
  pub fn append(&mut self, name: &str, value: impl Into<String>) {
    self.0.push((name.to_ascii_lowercase(), value.into()));
  }

  pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
    self.append(name, value);
    self
  }

  /// First value for `name`.
  pub fn get(&self, name: &str) -> Option<&str> {
    let name = name.to_ascii_lowercase();
    self
      .0
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Copy headers out of a reqwest header map, skipping values that are not UTF-8.
  pub fn from_header_map(map: &reqwest::header::HeaderMap) -> Self {
    let mut headers = Self::new();
    for (name, value) in map {
      if let Ok(value) = value.to_str() {
        headers.append(name.as_str(), value);
      }
    }
    headers
  }
}

/// An outbound request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.append(name, value);
    self
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response, fully readable.
  Basic,
  /// Cross-origin response readable through CORS.
  Cors,
  /// Cross-origin response whose status and body cannot be inspected.
  Opaque,
  /// Network-level error response.
  Error,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
      ResponseKind::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseKind::Basic),
      "cors" => Some(ResponseKind::Cors),
      "opaque" => Some(ResponseKind::Opaque),
      "error" => Some(ResponseKind::Error),
      _ => None,
    }
  }
}

impl fmt::Display for ResponseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fully buffered response.
///
/// The body is an immutable shared buffer, so cloning a response hands an
/// independent reader to each consumer without copying or draining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after any redirects
  pub url: Url,
  pub status: u16,
  pub headers: Headers,
  pub body: Bytes,
  pub kind: ResponseKind,
  /// Whether the network followed at least one redirect to produce this response
  pub redirected: bool,
}

impl Response {
  pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      url,
      status,
      headers: Headers::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
      redirected: false,
    }
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.append(name, value);
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether a network response may be written back into the store.
  ///
  /// Only plain same-origin 200s qualify: opaque and CORS responses,
  /// redirects and every other status are handed to the caller untouched.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }
}

/// Normalized lookup key for a cache entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_ascii_uppercase(),
      url: url.into(),
    }
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_drops_fragment() {
    let a = Request::get(url("https://app.test/shell.html#top")).key();
    let b = Request::get(url("https://app.test/shell.html")).key();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "GET https://app.test/shell.html");
  }

  #[test]
  fn test_key_keeps_query() {
    let a = Request::get(url("https://app.test/data.json?page=1")).key();
    let b = Request::get(url("https://app.test/data.json?page=2")).key();
    assert_ne!(a, b);
  }

  #[test]
  fn test_headers_case_insensitive() {
    let headers = Headers::new().with("Content-Type", "text/html");
    assert_eq!(headers.get("content-type"), Some("text/html"));
    assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    assert_eq!(headers.get("accept"), None);
  }

  #[test]
  fn test_cacheable_requires_basic_200() {
    let base = Response::new(url("https://app.test/a"), 200, "ok");
    assert!(base.is_cacheable());

    assert!(!base.clone().with_kind(ResponseKind::Opaque).is_cacheable());
    assert!(!base.clone().with_kind(ResponseKind::Cors).is_cacheable());

    let mut not_found = base.clone();
    not_found.status = 404;
    assert!(!not_found.is_cacheable());

    let mut created = base.clone();
    created.status = 201;
    assert!(created.is_ok());
    assert!(!created.is_cacheable());

    let mut redirected = base;
    redirected.redirected = true;
    assert!(!redirected.is_cacheable());
  }

  #[test]
  fn test_clone_shares_body() {
    let original = Response::new(url("https://app.test/a"), 200, Bytes::from_static(b"shell"));
    let copy = original.clone();
    assert_eq!(original.body, copy.body);
    assert_eq!(original.body.as_ptr(), copy.body.as_ptr());
  }

  #[test]
  fn test_kind_parse() {
    for kind in [
      ResponseKind::Basic,
      ResponseKind::Cors,
      ResponseKind::Opaque,
      ResponseKind::Error,
    ] {
      assert_eq!(ResponseKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ResponseKind::parse("default"), None);
  }
}
