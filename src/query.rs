//! Key-path queries over configuration documents.
//!
//! A query is a comma-separated list of selectors. Each selector is either `*` (the whole
//! document) or a dot-separated key path such as `db.host`.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::CacError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    All,
    Path(Vec<String>),
}

impl Selector {
    fn parse(raw: &str) -> Result<Self, CacError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Selector::All);
        }
        if raw.is_empty() {
            return Err(CacError::InvalidArgument("empty selector in query".to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CacError::InvalidArgument(format!("malformed key path `{}`", raw)));
        }
        Ok(Selector::Path(segments))
    }

    fn lookup<'a>(&self, document: &'a Map<String, Value>) -> Option<&'a Value> {
        let Selector::Path(segments) = self else {
            return None;
        };
        let (first, rest) = segments.split_first()?;
        let mut current = document.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    selectors: Vec<Selector>,
}

impl Query {
    /// Parse a query. An empty query is rejected.
    pub fn parse(raw: &str) -> Result<Self, CacError> {
        if raw.trim().is_empty() {
            return Err(CacError::InvalidArgument("query must not be empty".to_string()));
        }
        let selectors = raw.split(',').map(Selector::parse).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    /// Parse a key filter. An empty filter selects everything.
    pub fn parse_filter(raw: &str) -> Result<Self, CacError> {
        if raw.trim().is_empty() {
            return Ok(Self::all());
        }
        Self::parse(raw)
    }

    pub fn all() -> Self {
        Self {
            selectors: vec![Selector::All],
        }
    }

    fn selects_all(&self) -> bool {
        self.selectors.iter().any(|s| *s == Selector::All)
    }

    /// Evaluate against `document`.
    ///
    /// A single key path yields the value at that path, `*` yields the whole document, and a
    /// list of selectors yields their projection. `None` when nothing matched.
    pub fn select(&self, document: &Map<String, Value>) -> Option<Value> {
        match self.selectors.as_slice() {
            [selector @ Selector::Path(_)] => selector.lookup(document).cloned(),
            _ => self.project(document).map(Value::Object),
        }
    }

    /// Sub-document holding only the matched paths, nesting preserved.
    ///
    /// `None` when nothing matched.
    pub fn project(&self, document: &Map<String, Value>) -> Option<Map<String, Value>> {
        if self.selects_all() {
            return Some(document.clone());
        }
        let mut result = Map::new();
        let mut matched = false;
        for selector in &self.selectors {
            let (Selector::Path(segments), Some(value)) = (selector, selector.lookup(document)) else {
                continue;
            };
            insert_at(&mut result, segments, value.clone());
            matched = true;
        }
        matched.then_some(result)
    }
}

impl FromStr for Query {
    type Err = CacError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

fn insert_at(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = target;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}
