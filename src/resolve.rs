//! Query and layered-resolution engine.
//!
//! Every function reads one immutable snapshot per layer, so it runs concurrently with pollers
//! publishing new ones and never blocks on them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::context::ContextDocument;
use crate::error::{CacError, Result};
use crate::merge::MergeStrategy;
use crate::query::Query;

/// Evaluate `query` against the client's current snapshot.
pub fn get_config(client: &Client, query: &str) -> Result<Value> {
    let query = Query::parse(query)?;
    let snapshot = client.snapshot()?;
    query.select(snapshot.document()).ok_or_else(|| {
        CacError::NotFound(format!(
            "query selected nothing in the configuration of tenant `{}`",
            client.tenant()
        ))
    })
}

/// Subset of the default layer matching `filter_keys`; empty filter returns the whole layer.
pub fn get_default_config(default_layer: &Map<String, Value>, filter_keys: &str) -> Result<Map<String, Value>> {
    Query::parse_filter(filter_keys)?
        .project(default_layer)
        .ok_or_else(|| CacError::NotFound("filter keys selected nothing in the default configuration".to_string()))
}

/// Tenant subset (by `query`) merged over the default subset (by `filter_keys`).
///
/// `NotFound` only when neither stage selects anything.
pub fn get_resolved_config(
    client: &Client,
    default_layer: &Map<String, Value>,
    query: &str,
    filter_keys: &str,
    merge_strategy: &str,
) -> Result<Map<String, Value>> {
    let strategy: MergeStrategy = merge_strategy.parse()?;
    let query = Query::parse(query)?;
    let filter = Query::parse_filter(filter_keys)?;
    let snapshot = client.snapshot()?;

    let tenant = query.project(snapshot.document());
    let defaults = filter.project(default_layer);
    if tenant.is_none() && defaults.is_none() {
        return Err(CacError::NotFound(format!(
            "query and filter keys selected nothing for tenant `{}`",
            client.tenant()
        )));
    }

    Ok(strategy.apply(&defaults.unwrap_or_default(), &tenant.unwrap_or_default()))
}

/// Evaluate a context-aware tenant document against a request `context`.
///
/// Matching overrides are layered over `default_configs` with `merge_strategy`; the result is
/// then narrowed to `filter_keys` (empty selects everything, unmatched keys are simply absent).
pub fn eval_context(
    client: &Client,
    context: &Map<String, Value>,
    filter_keys: &str,
    merge_strategy: &str,
) -> Result<Map<String, Value>> {
    let strategy: MergeStrategy = merge_strategy.parse()?;
    let filter = Query::parse_filter(filter_keys)?;
    let snapshot = client.snapshot()?;
    let resolved = ContextDocument::from_document(snapshot.document())?.eval(context, strategy)?;
    Ok(filter.project(&resolved).unwrap_or_default())
}

/// Publish time of the client's current snapshot.
pub fn get_last_modified(client: &Client) -> Result<DateTime<Utc>> {
    Ok(client.snapshot()?.fetched_at())
}
