//! Instance discovery from a shell secrets file.
//!
//! Instances are configured as `export CONFLUENCE_<NAME>_<FIELD>="..."`
//! lines, usually in `~/.secrets`. Discovery reads that file without
//! sourcing it and reports which auth strategy each instance would use.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::auth::AuthStrategy;

/// Shown for instances that have a URL but no usable credentials
const INCOMPLETE_AUTH_TYPE: &str = "incomplete (missing credentials)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InstanceSummary {
    pub name: String,
    pub url: String,
    pub username: String,
    pub auth_type: String,
    pub has_nginx: bool,
    pub has_pat: bool,
    pub has_password: bool,
}

#[derive(Debug, Default)]
struct RawInstance {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    pat: Option<String>,
    basic_user: Option<String>,
    basic_pass: Option<String>,
}

fn url_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^export\s+CONFLUENCE_([A-Z0-9_]+)_URL="?([^"]+)"?"#).expect("valid regex")
    })
}

fn field_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^export\s+CONFLUENCE_([A-Z0-9_]+)_(USERNAME|PASSWORD|PAT|BASIC_USER|BASIC_PASS)="?([^"]*)"?"#,
        )
        .expect("valid regex")
    })
}

/// Parse secrets-file contents into instance summaries, sorted by name.
pub fn parse_secrets(contents: &str) -> Vec<InstanceSummary> {
    let mut instances: BTreeMap<String, RawInstance> = BTreeMap::new();

    for line in contents.lines().map(str::trim) {
        if let Some(caps) = url_line().captures(line) {
            instances.entry(caps[1].to_string()).or_default().url = Some(caps[2].to_string());
        } else if let Some(caps) = field_line().captures(line) {
            let raw = instances.entry(caps[1].to_string()).or_default();
            let value = Some(caps[3].to_string()).filter(|v| !v.is_empty());
            match &caps[2] {
                "USERNAME" => raw.username = value,
                "PASSWORD" => raw.password = value,
                "PAT" => raw.pat = value,
                "BASIC_USER" => raw.basic_user = value,
                "BASIC_PASS" => raw.basic_pass = value,
                _ => {}
            }
        }
    }

    instances
        .into_iter()
        .filter_map(|(name, raw)| {
            let url = raw.url?;
            let has_nginx = raw.basic_user.is_some() && raw.basic_pass.is_some();
            let has_pat = raw.pat.is_some();
            let has_password = raw.password.is_some();
            let auth_type = AuthStrategy::select(has_nginx, has_pat, has_password)
                .map(|s| s.description())
                .unwrap_or(INCOMPLETE_AUTH_TYPE);
            Some(InstanceSummary {
                name,
                url,
                username: raw.username.unwrap_or_else(|| "N/A".to_string()),
                auth_type: auth_type.to_string(),
                has_nginx,
                has_pat,
                has_password,
            })
        })
        .collect()
}

/// Read and parse a secrets file. A missing file means no instances.
pub fn discover(path: &Path) -> std::io::Result<Vec<InstanceSummary>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(parse_secrets(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No secrets file");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
