//! Authentication module for resolving credentials and managing sessions.
//!
//! This module provides:
//! - `InstanceCredentialConfig` / `AuthStrategy`: which credentials an
//!   instance has and how they are used
//! - `SessionCache`: cookie sessions persisted per instance, trusted for 7 days
//! - `SessionValidator`: a cheap probe that confirms a cached session
//! - `BrowserLoginDriver`: form login in a headless browser
//! - `SessionManager`: ties the above together for the API client

pub mod credentials;
pub mod login;
pub mod manager;
pub mod session;
pub mod validator;

pub use credentials::{AuthStrategy, BasicCredentials, InstanceCredentialConfig};
pub use login::BrowserLoginDriver;
pub use manager::SessionManager;
pub use session::{CachedSession, SessionCache};
pub use validator::SessionValidator;
