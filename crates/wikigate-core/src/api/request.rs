use reqwest::{header, Client, Method, RequestBuilder};
use serde_json::Value;

/// Credentials attached to one outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthMaterials {
    /// Full `Authorization` header value
    pub authorization: Option<String>,
    /// Full `Cookie` header value
    pub cookie: Option<String>,
}

/// One API call, rebuilt for every attempt so a retry picks up fresh
/// credentials. Never persisted.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub auth: AuthMaterials,
}

impl AuthenticatedRequest {
    pub fn builder(&self, client: &Client) -> RequestBuilder {
        let mut request = client
            .request(self.method.clone(), &self.url)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json");

        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if let Some(ref authorization) = self.auth.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        if let Some(ref cookie) = self.auth.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        if let Some(ref body) = self.body {
            request = request.json(body);
        }
        request
    }
}
