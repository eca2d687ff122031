//! wikigate-core - authenticated access to wiki REST APIs behind
//! inconsistent auth front-ends.
//!
//! Some deployments accept a personal access token or password directly.
//! Others sit behind an nginx reverse proxy that demands HTTP Basic auth
//! and an application session cookie that can only be obtained through a
//! browser login. [`ApiClient`] picks the right scheme per instance, caches
//! browser sessions on disk, and re-authenticates once when a session is
//! rejected.

pub mod api;
pub mod auth;
pub mod browser;
pub mod config;
pub mod discover;
pub mod error;

pub use api::ApiClient;
pub use auth::{AuthStrategy, CachedSession, InstanceCredentialConfig, SessionCache};
pub use config::Config;
pub use error::{Error, Result};
