//! Offline-capable resource cache between a web client and the network.
//!
//! A *generation* of the caching logic owns one versioned store. Installing a
//! generation seeds its store with a fixed manifest; activating it deletes
//! every other store; once active it answers GET requests cache-first and
//! writes successful same-origin network responses back in the background.

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod manifest;
pub mod network;

pub use cache::{CacheStorage, SqliteStorage, Store, StoreId, StoreManager};
pub use config::{Config, GenerationConfig};
pub use controller::{ActivationReport, GenerationController, GenerationState, InstallOutcome};
pub use error::{CacheError, FetchError, Result};
pub use host::{ClientId, Host, Registration};
pub use http::{Headers, Method, Request, RequestKey, Response, ResponseKind};
pub use interceptor::{Bypass, Handled, RequestInterceptor};
pub use manifest::{ExclusionRules, Manifest};
pub use network::{HttpNetwork, Network};
