use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Sort order for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A structured find request.
///
/// `request` maps property names to one accepted value or a list of accepted
/// values; `free_text` may embed `name:=value` exact clauses which are folded
/// into `request` before execution. `order_by` takes an optional `+`/`-`
/// direction prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub offset: usize,
    pub limit: usize,
    pub request: HashMap<String, JsonValue>,
    pub free_text: String,
    pub reply: Vec<String>,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
}

impl Default for Query {
    fn default() -> Self {
        Query {
            offset: 0,
            limit: 40,
            request: HashMap::new(),
            free_text: String::new(),
            reply: Vec::new(),
            order_by: None,
            group_by: None,
        }
    }
}

impl Query {
    /// Sort key with the direction prefix stripped.
    pub fn order_key(&self) -> Option<&str> {
        self.order_by
            .as_deref()
            .map(|key| key.trim_start_matches(['+', '-']))
    }

    pub fn sort_order(&self) -> SortOrder {
        match self.order_by.as_deref() {
            Some(key) if key.starts_with('-') => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }

    /// Server-side page clamp: offset is taken as-is, limit is capped.
    pub fn page(&self, max_limit: usize) -> (usize, usize) {
        (self.offset, self.limit.min(max_limit))
    }
}

/// Accepted values for one request property: a scalar is a single-element
/// list, an array means "any of".
pub fn request_values(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(values) => values.iter().collect(),
        v => vec![v],
    }
}
