//! Build-time resource lists: the pre-cache manifest and the bypass rules.

use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

use crate::error::{CacheError, Result};

/// Ordered list of resource locators every generation must hold after install.
///
/// Locators may be absolute URLs or paths relative to the application origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
  pub fn new<I, T>(locators: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    Self(locators.into_iter().map(Into::into).collect())
  }

  pub fn locators(&self) -> &[String] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Resolve every locator against `origin`, in manifest order.
  ///
  /// Two locators that resolve to the same URL (fragments ignored) make the
  /// manifest invalid.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    let mut seen = HashSet::new();
    let mut urls = Vec::with_capacity(self.0.len());

    for locator in &self.0 {
      let mut url = origin
        .join(locator)
        .map_err(|source| CacheError::InvalidLocator {
          locator: locator.clone(),
          source,
        })?;
      url.set_fragment(None);

      if !seen.insert(url.clone()) {
        return Err(CacheError::DuplicateLocator(url.to_string()));
      }
      urls.push(url);
    }

    Ok(urls)
  }
}

/// Substring patterns for requests that always go straight to the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ExclusionRules(Vec<String>);

impl ExclusionRules {
  pub fn new<I, T>(patterns: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    Self(patterns.into_iter().map(Into::into).collect())
  }

  /// Whether any pattern occurs in the full URL.
  pub fn matches(&self, url: &Url) -> bool {
    let url = url.as_str();
    self
      .0
      .iter()
      .filter(|pattern| !pattern.is_empty())
      .any(|pattern| url.contains(pattern.as_str()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://walksafe.test/app/").unwrap()
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let manifest = Manifest::new([
      "/walksafe_app.html",
      "style.css",
      "https://cdn.tailwindcss.com",
    ]);
    let urls: Vec<String> = manifest
      .resolve(&origin())
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();

    assert_eq!(
      urls,
      vec![
        "https://walksafe.test/walksafe_app.html",
        "https://walksafe.test/app/style.css",
        "https://cdn.tailwindcss.com/",
      ]
    );
  }

  #[test]
  fn test_resolve_rejects_duplicates() {
    let manifest = Manifest::new(["/shell.html", "https://walksafe.test/shell.html#main"]);
    let err = manifest.resolve(&origin()).unwrap_err();
    assert!(matches!(err, CacheError::DuplicateLocator(_)));
  }

  #[test]
  fn test_resolve_rejects_bad_locator() {
    let manifest = Manifest::new(["http://[::1"]);
    let err = manifest.resolve(&origin()).unwrap_err();
    assert!(matches!(err, CacheError::InvalidLocator { .. }));
  }

  #[test]
  fn test_exclusion_substring_match() {
    let rules = ExclusionRules::new(["googleapis.com"]);
    let auth = Url::parse("https://identitytoolkit.googleapis.com/v1/accounts").unwrap();
    let shell = Url::parse("https://walksafe.test/shell.html").unwrap();
    assert!(rules.matches(&auth));
    assert!(!rules.matches(&shell));
  }

  #[test]
  fn test_empty_pattern_matches_nothing() {
    let rules = ExclusionRules::new([""]);
    assert!(!rules.matches(&origin()));
    assert!(!ExclusionRules::default().matches(&origin()));
  }
}
