use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::transport::{ApiRequest, Transport};

/// Parameters to echo back on the next call of a continued query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    params: Vec<(String, String)>,
}

impl Continuation {
    /// Reads the legacy `query-continue.<field>.<param>` marker, falling back to
    /// the flat `continue` object newer wikis send.
    pub fn from_response(response: &Value, field: &str, param: &str) -> Option<Self> {
        if let Some(marker) = response.get("query-continue") {
            let token = marker.get(field)?.get(param)?;
            return Some(Self {
                params: vec![(param.to_string(), token_string(token))],
            });
        }

        let marker = response.get("continue")?.as_object()?;
        if marker.is_empty() {
            return None;
        }
        Some(Self {
            params: marker
                .iter()
                .map(|(key, token)| (key.clone(), token_string(token)))
                .collect(),
        })
    }

    pub fn apply(&self, request: &mut ApiRequest) {
        for (key, value) in &self.params {
            request.set_param(key, value);
        }
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

fn token_string(token: &Value) -> String {
    match token {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// Issues `request`, then keeps re-issuing it with the continuation token
/// while the wiki reports more results and fewer than `call_limit` calls were
/// made. All partial responses are merged in arrival order.
pub fn run_continued<T>(
    transport: &T,
    mut request: ApiRequest,
    field: &str,
    param: &str,
    call_limit: Option<usize>,
) -> Result<Value>
where
    T: Transport + ?Sized,
{
    let mut merged = transport.issue_once(&request)?;
    let mut calls = 1;
    let mut next = Continuation::from_response(&merged, field, param);

    while let Some(continuation) = next {
        if call_limit.is_some_and(|limit| calls >= limit) {
            break;
        }
        continuation.apply(&mut request);
        debug!(field, calls, params = ?continuation.params(), "continuing query");

        let response = transport.issue_once(&request)?;
        calls += 1;
        next = Continuation::from_response(&response, field, param);
        merge_value(&mut merged, response);
    }

    Ok(merged)
}

/// Folds `incoming` into `target`: lists are concatenated, maps are merged
/// key by key with the same rule, anything else is overwritten.
pub fn merge_value(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Array(existing), Value::Array(items)) => existing.extend(items),
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                match existing.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

/// Merges a sequence of partial responses in order; `None` for no partials.
pub fn merge_partials<I>(partials: I) -> Option<Value>
where
    I: IntoIterator<Item = Value>,
{
    let mut partials = partials.into_iter();
    let mut merged = partials.next()?;
    for partial in partials {
        merge_value(&mut merged, partial);
    }
    Some(merged)
}
