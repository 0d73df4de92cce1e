use serde::{Serialize, Deserialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// A document's property map. Values are untyped JSON; the registry's
/// typecast decides how they are stored and decoded.
pub type Props = HashMap<String, JsonValue>;

/// A (property, canonical value) pair eligible for exact/boolean filtering.
/// Distinct from full-text tokens.
pub type TermSet = HashSet<(String, String)>;

/// One mutation accepted by the write queue but not yet committed by the
/// index writer. Ordered by seqno, monotonically increasing, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWrite {
    pub seqno: u64,
    pub guid: String,
    pub op: PendingOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingOp {
    Store { props: Props, is_new: bool },
    Delete,
}

/// Merged effect of all pending writes for one guid.
///
/// `original_terms` is fixed at the first observation of the guid's durable
/// snapshot (empty when the document is newly created); `current_terms` is
/// recomputed after every merge. The overlay for a guid, merged over its
/// pending entries in seqno order, equals the guid's true current property
/// state even though the index has not committed it.
#[derive(Debug, Clone)]
pub struct CachedDocument {
    pub guid: String,
    pub props: Props,
    pub is_new: bool,
    pub deleted: bool,
    pub current_terms: TermSet,
    pub original_terms: TermSet,
}

impl CachedDocument {
    pub fn fresh(guid: &str) -> Self {
        CachedDocument {
            guid: guid.to_string(),
            props: Props::new(),
            is_new: true,
            deleted: false,
            current_terms: TermSet::new(),
            original_terms: TermSet::new(),
        }
    }

    /// Seed from the last-known durable snapshot of an existing document.
    pub fn from_snapshot(guid: &str, snapshot: Props, original_terms: TermSet) -> Self {
        CachedDocument {
            guid: guid.to_string(),
            current_terms: original_terms.clone(),
            original_terms,
            props: snapshot,
            is_new: false,
            deleted: false,
        }
    }
}

/// One row of a find result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub guid: String,
    pub props: Props,
}

/// Rows plus an approximate match count. `total` compares as a plain
/// integer and is always >= the number of rows actually returned.
#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub rows: Vec<ResultRow>,
    pub total: usize,
}
