//! REST API client module.
//!
//! This module provides the `ApiClient` for calling `<base>/rest/api/...`
//! on a configured instance. Depending on the instance, requests carry
//! Basic credentials directly or a browser-obtained session cookie plus the
//! reverse proxy's Basic credentials.

pub mod client;
pub mod request;

pub use client::ApiClient;
pub use request::{AuthMaterials, AuthenticatedRequest};

pub use reqwest::Method;
