//! Transport for pulling a tenant's configuration document from the config server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};

use crate::error::{CacError, Result};

const TENANT_HEADER: &str = "x-tenant";

/// Result of one successful round-trip to the config server.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A new document, with the server's `Last-Modified` if it sent one.
    Modified {
        document: Map<String, Value>,
        last_modified: Option<DateTime<Utc>>,
    },
    /// The server's copy has not changed since `since`.
    NotModified,
}

/// Source of configuration documents.
///
/// The registry and pollers depend only on this trait; `since` carries the `Last-Modified` of
/// the document already cached, if any.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, tenant: &str, hostname: &str, since: Option<DateTime<Utc>>) -> Result<FetchOutcome>;
}

/// HTTP fetcher: `GET {hostname}/config` with the tenant in the `x-tenant` header.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }

    fn endpoint(hostname: &str) -> String {
        format!("{}/config", hostname.trim_end_matches('/'))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, tenant: &str, hostname: &str, since: Option<DateTime<Utc>>) -> Result<FetchOutcome> {
        let mut request = self
            .client
            .get(Self::endpoint(hostname))
            .header(TENANT_HEADER, tenant);
        if let Some(since) = since {
            request = request.header(IF_MODIFIED_SINCE, http_date(since));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => return Ok(FetchOutcome::NotModified),
            StatusCode::OK => {}
            status => {
                return Err(CacError::Transport(format!(
                    "config fetch for tenant `{}` failed with status {}",
                    tenant, status
                )))
            }
        }

        let last_modified = parse_last_modified(response.headers());
        let body: Value = response.json().await?;
        match body {
            Value::Object(document) => Ok(FetchOutcome::Modified {
                document,
                last_modified,
            }),
            _ => Err(CacError::Transport(format!(
                "config document for tenant `{}` is not a JSON object",
                tenant
            ))),
        }
    }
}

/// IMF-fixdate, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
fn http_date(stamp: DateTime<Utc>) -> String {
    stamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    match DateTime::parse_from_rfc2822(raw) {
        Ok(stamp) => Some(stamp.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(header = raw, error = %e, "ignoring unparseable Last-Modified header");
            None
        }
    }
}
