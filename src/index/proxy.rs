use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{CachedDocument, FindResult, PendingOp, PendingWrite, Props, ResultRow, TermSet};
use crate::index::reader::IndexReader;
use crate::query::parser::{parse_query, ParsedQuery};
use crate::query::types::{request_values, Query};
use crate::queue::write_queue::{WriteOp, WriteQueue};
use crate::schema::registry::{PropertyRegistry, SharedRegistry, GUID_PROP};
use crate::storage::store::DocumentStorage;

/// Read-your-writes front for the index reader.
///
/// Every reader process puts one of these in front of its `IndexReader`. A
/// store updates the overlay cache synchronously *before* the operation is
/// handed to the write queue, so a find issued immediately after a store
/// returns already sees the update. A background reconciler retires overlay
/// entries once the writer reports them committed.
pub struct IndexProxy {
    config: Config,
    registry: SharedRegistry,
    storage: Arc<dyn DocumentStorage>,
    queue: Arc<dyn WriteQueue>,
    reader: TokioMutex<IndexReader>,
    overlay: Mutex<Overlay>,
}

#[derive(Default)]
struct Overlay {
    cache: HashMap<String, CachedDocument>,
    log: VecDeque<PendingWrite>,
}

/// Result-set corrections derived by comparing the query's filter terms
/// against each cached document's current and original term sets.
#[derive(Default)]
struct OverlayDiff {
    /// Documents the raw (stale) result cannot contain yet: newly created,
    /// or updated into the filter. Synthesized into the result tail.
    adds: Vec<(String, Props)>,
    /// Documents the raw result still contains but that no longer match.
    deletes: HashSet<String>,
    /// Documents present in the raw result whose non-filter property values
    /// are stale and must be overwritten from the cache.
    updates: HashMap<String, Props>,
}

impl OverlayDiff {
    fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty() && self.updates.is_empty()
    }
}

impl IndexProxy {
    pub fn new(
        config: Config,
        registry: SharedRegistry,
        storage: Arc<dyn DocumentStorage>,
        queue: Arc<dyn WriteQueue>,
    ) -> Self {
        IndexProxy {
            reader: TokioMutex::new(IndexReader::new(config.clone(), Arc::clone(&registry))),
            overlay: Mutex::new(Overlay::default()),
            config,
            registry,
            storage,
            queue,
        }
    }

    /// Merge into the overlay, then submit to the write queue. The cache
    /// must be updated before the queue hand-off: the acknowledgment the
    /// caller sees is "my next find reflects this", not "this is durable".
    pub async fn store(&self, guid: &str, props: Props, is_new: bool) -> Result<()> {
        self.registry.validate_store(&props, is_new)?;
        let props = if is_new {
            self.registry.apply_defaults(props)
        } else {
            props
        };
        {
            let mut overlay = self.overlay.lock();
            self.apply_store(&mut overlay, guid, &props, is_new);
        }
        let seqno = self
            .queue
            .put(WriteOp::Store {
                guid: guid.to_string(),
                props: props.clone(),
                is_new,
            })
            .await?;
        self.overlay.lock().log.push_back(PendingWrite {
            seqno,
            guid: guid.to_string(),
            op: PendingOp::Store { props, is_new },
        });
        Ok(())
    }

    /// Record the deletion in the overlay (current terms emptied, so the
    /// term-diff subtracts any matches) and forward to the queue.
    pub async fn delete(&self, guid: &str) -> Result<()> {
        {
            let mut overlay = self.overlay.lock();
            self.apply_delete(&mut overlay, guid);
        }
        let seqno = self
            .queue
            .put(WriteOp::Delete { guid: guid.to_string() })
            .await?;
        self.overlay.lock().log.push_back(PendingWrite {
            seqno,
            guid: guid.to_string(),
            op: PendingOp::Delete,
        });
        Ok(())
    }

    /// Read-your-writes point lookup bypassing the search engine entirely.
    pub fn get_cached(&self, guid: &str) -> Option<Props> {
        let overlay = self.overlay.lock();
        overlay.cache.get(guid).and_then(|doc| {
            if doc.deleted {
                None
            } else {
                Some(doc.props.clone())
            }
        })
    }

    /// Number of pending writes still unconfirmed by the writer.
    pub fn pending_writes(&self) -> usize {
        self.overlay.lock().log.len()
    }

    pub async fn find(&self, query: &Query) -> Result<FindResult> {
        self.registry.validate_request(query)?;
        let parsed = parse_query(&self.registry, query);
        let (offset, limit) = query.page(self.config.max_query_limit);

        if parsed.is_guid_only() {
            return self.find_by_guid(query, &parsed).await;
        }

        let diff = {
            let overlay = self.overlay.lock();
            if overlay.cache.is_empty() {
                None
            } else {
                let filters = filter_terms(&parsed.request);
                let diff = compute_diff(&overlay, &filters);
                if diff.is_empty() { None } else { Some(diff) }
            }
        };

        // Nothing in the overlay is relevant to this query.
        let Some(diff) = diff else {
            return self.reader.lock().await.find_paged(query, offset, limit).await;
        };

        // Raise the raw limit so the page stays full after subtraction.
        let raw = self
            .reader
            .lock()
            .await
            .find_paged(query, offset, limit + diff.deletes.len())
            .await?;

        let mut total = raw.total + diff.adds.len();
        let mut rows = Vec::with_capacity(raw.rows.len() + diff.adds.len());
        for row in raw.rows {
            if diff.deletes.contains(&row.guid) {
                total = total.saturating_sub(1);
                continue;
            }
            if let Some(patch) = diff.updates.get(&row.guid) {
                rows.push(ResultRow {
                    props: self.project(patch, &query.reply),
                    guid: row.guid,
                });
            } else {
                rows.push(row);
            }
        }

        // Injected rows keep a deterministic guid order at the tail; they are
        // not re-sorted by the query's order_by key (documented limitation).
        let mut adds: Vec<ResultRow> = diff
            .adds
            .into_iter()
            .map(|(guid, props)| ResultRow {
                props: self.project(&props, &query.reply),
                guid,
            })
            .collect();
        adds.sort_by(|a, b| a.guid.cmp(&b.guid));
        rows.extend(adds);
        rows.truncate(limit);

        Ok(FindResult { rows, total })
    }

    /// Cheap path for a pure guid filter: direct lookup plus overlay patch,
    /// no term reasoning.
    async fn find_by_guid(&self, query: &Query, parsed: &ParsedQuery) -> Result<FindResult> {
        let guid = parsed
            .request
            .get(GUID_PROP)
            .and_then(|value| request_values(value).first().map(|v| PropertyRegistry::term_value(v)))
            .unwrap_or_default();

        let cached = {
            let overlay = self.overlay.lock();
            overlay.cache.get(&guid).cloned()
        };
        match cached {
            Some(doc) if doc.deleted => Ok(FindResult::default()),
            Some(doc) => Ok(FindResult {
                rows: vec![ResultRow {
                    props: self.project(&doc.props, &query.reply),
                    guid,
                }],
                total: 1,
            }),
            None => {
                let stored = self.reader.lock().await.get(&guid)?;
                Ok(match stored {
                    Some(props) => FindResult {
                        rows: vec![ResultRow {
                            props: self.project(&props, &query.reply),
                            guid,
                        }],
                        total: 1,
                    },
                    None => FindResult::default(),
                })
            }
        }
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>> {
        self.reader.lock().await.mtime()
    }

    /// Retire overlay entries the writer has committed, then rebuild the
    /// cache from whatever is still unconfirmed.
    pub fn reconcile(&self, committed: u64) {
        let mut overlay = self.overlay.lock();
        overlay.log.retain(|entry| entry.seqno > committed);
        let entries: Vec<PendingWrite> = overlay.log.iter().cloned().collect();
        overlay.cache.clear();
        for entry in &entries {
            match &entry.op {
                PendingOp::Store { props, is_new } => {
                    self.apply_store(&mut overlay, &entry.guid, props, *is_new)
                }
                PendingOp::Delete => self.apply_delete(&mut overlay, &entry.guid),
            }
        }
        tracing::debug!(committed, retained = entries.len(), "overlay reconciled");
    }

    /// Runs until the queue reports shutdown: prune and rebuild on every
    /// committed batch, then refresh the read-only handle. A failed reopen
    /// leaves the handle closed for lazy reopen on the next find.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let proxy = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match proxy.queue.wait_for_commit().await {
                    None => break,
                    Some(committed) => {
                        proxy.reconcile(committed);
                        if let Err(err) = proxy.reader.lock().await.reopen() {
                            tracing::warn!(error = %err, "index reopen after commit failed");
                        }
                    }
                }
            }
            tracing::debug!("reconciliation task stopped");
        })
    }

    fn apply_store(&self, overlay: &mut Overlay, guid: &str, props: &Props, is_new: bool) {
        let doc = overlay.cache.entry(guid.to_string()).or_insert_with(|| {
            if is_new {
                CachedDocument::fresh(guid)
            } else {
                // First observation: fix the original term set from the
                // last-known durable snapshot.
                let snapshot = self.storage.get(guid).unwrap_or_default();
                let original = self.registry.term_set(&snapshot);
                CachedDocument::from_snapshot(guid, snapshot, original)
            }
        });
        if doc.deleted {
            // recreated over a pending delete: state restarts from empty
            doc.props.clear();
            doc.deleted = false;
        }
        for (name, value) in props {
            doc.props.insert(name.clone(), value.clone());
        }
        doc.current_terms = self.registry.term_set(&doc.props);
    }

    fn apply_delete(&self, overlay: &mut Overlay, guid: &str) {
        let doc = overlay.cache.entry(guid.to_string()).or_insert_with(|| {
            let snapshot = self.storage.get(guid).unwrap_or_default();
            let original = self.registry.term_set(&snapshot);
            CachedDocument::from_snapshot(guid, snapshot, original)
        });
        doc.props.clear();
        doc.current_terms.clear();
        doc.deleted = true;
    }

    fn project(&self, props: &Props, reply: &[String]) -> Props {
        let mut out = Props::new();
        if reply.is_empty() {
            for (name, value) in props {
                if name == GUID_PROP {
                    continue;
                }
                if let Some(spec) = self.registry.get(name) {
                    out.insert(
                        name.clone(),
                        self.registry.decode_value(
                            spec,
                            value.clone(),
                            &self.config.locale,
                            &self.config.default_locale,
                        ),
                    );
                }
            }
        } else {
            for name in reply {
                if let (Some(spec), Some(value)) = (self.registry.get(name), props.get(name)) {
                    out.insert(
                        name.clone(),
                        self.registry.decode_value(
                            spec,
                            value.clone(),
                            &self.config.locale,
                            &self.config.default_locale,
                        ),
                    );
                }
            }
        }
        out
    }
}

/// Reduce the request's filter predicates to the same (property, value)
/// term language the cache uses.
fn filter_terms(request: &HashMap<String, serde_json::Value>) -> HashMap<String, Vec<String>> {
    request
        .iter()
        .map(|(name, value)| {
            let accepted = request_values(value)
                .into_iter()
                .map(PropertyRegistry::term_value)
                .collect();
            (name.clone(), accepted)
        })
        .collect()
}

/// A term set satisfies the filters when every requested property matches
/// one of its accepted values.
fn matches(terms: &TermSet, filters: &HashMap<String, Vec<String>>) -> bool {
    filters.iter().all(|(prop, accepted)| {
        accepted
            .iter()
            .any(|value| terms.contains(&(prop.clone(), value.clone())))
    })
}

fn compute_diff(overlay: &Overlay, filters: &HashMap<String, Vec<String>>) -> OverlayDiff {
    let mut diff = OverlayDiff::default();
    for doc in overlay.cache.values() {
        if doc.deleted {
            if matches(&doc.original_terms, filters) {
                diff.deletes.insert(doc.guid.clone());
            }
        } else if doc.is_new {
            if matches(&doc.current_terms, filters) {
                diff.adds.push((doc.guid.clone(), doc.props.clone()));
            }
        } else {
            let was_match = matches(&doc.original_terms, filters);
            let is_match = matches(&doc.current_terms, filters);
            match (was_match, is_match) {
                // updated into the filter: the stale index cannot return it
                (false, true) => diff.adds.push((doc.guid.clone(), doc.props.clone())),
                // updated out of the filter: subtract from the raw rows
                (true, false) => {
                    diff.deletes.insert(doc.guid.clone());
                }
                // still matching, but carrying stale non-filter values
                (true, true) => {
                    diff.updates.insert(doc.guid.clone(), doc.props.clone());
                }
                (false, false) => {}
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use crate::schema::registry::PropertySpec;
    use crate::storage::store::MemoryStorage;

    /// Assigns seqnos without a writer behind it.
    struct StubQueue {
        seqno: AtomicU64,
    }

    impl StubQueue {
        fn starting_at(first: u64) -> Arc<Self> {
            Arc::new(StubQueue { seqno: AtomicU64::new(first.saturating_sub(1)) })
        }
    }

    #[async_trait]
    impl WriteQueue for StubQueue {
        async fn put(&self, _op: WriteOp) -> Result<u64> {
            Ok(self.seqno.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn wait_for_commit(&self) -> Option<u64> {
            None
        }

        fn last_committed_seqno(&self) -> u64 {
            0
        }
    }

    fn registry() -> SharedRegistry {
        Arc::new(
            PropertyRegistry::new()
                .with_property(PropertySpec::text("color").slot(1).prefix("C"))
                .with_property(PropertySpec::text("title").slot(2).prefix("T").full_text()),
        )
    }

    fn proxy_with(storage: Arc<MemoryStorage>, first_seqno: u64) -> IndexProxy {
        IndexProxy::new(
            Config::default(),
            registry(),
            storage,
            StubQueue::starting_at(first_seqno),
        )
    }

    fn filters(prop: &str, value: &str) -> HashMap<String, Vec<String>> {
        HashMap::from([(prop.to_string(), vec![value.to_string()])])
    }

    #[tokio::test]
    async fn store_merges_into_cache_before_queue_ack() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("doc-1", Props::from([("color".to_string(), json!("orig"))]))
            .unwrap();
        let proxy = proxy_with(Arc::clone(&storage), 1);

        proxy
            .store("doc-1", Props::from([("title".to_string(), json!("hi"))]), false)
            .await
            .unwrap();

        let merged = proxy.get_cached("doc-1").unwrap();
        assert_eq!(merged.get("color"), Some(&json!("orig")));
        assert_eq!(merged.get("title"), Some(&json!("hi")));
        assert_eq!(proxy.pending_writes(), 1);
    }

    #[tokio::test]
    async fn term_diff_moves_updated_documents_between_filters() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("doc-1", Props::from([("color".to_string(), json!("orig"))]))
            .unwrap();
        let proxy = proxy_with(Arc::clone(&storage), 1);
        proxy
            .store("doc-1", Props::from([("color".to_string(), json!("new"))]), false)
            .await
            .unwrap();

        let overlay = proxy.overlay.lock();
        let gone = compute_diff(&overlay, &filters("color", "orig"));
        assert!(gone.deletes.contains("doc-1"));
        assert!(gone.adds.is_empty());

        let arrived = compute_diff(&overlay, &filters("color", "new"));
        assert_eq!(arrived.adds.len(), 1);
        assert_eq!(arrived.adds[0].1.get("color"), Some(&json!("new")));
        assert!(arrived.deletes.is_empty());
    }

    #[tokio::test]
    async fn unrelated_updates_patch_in_place() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("doc-1", Props::from([("color".to_string(), json!("orig"))]))
            .unwrap();
        let proxy = proxy_with(Arc::clone(&storage), 1);
        proxy
            .store("doc-1", Props::from([("title".to_string(), json!("fresh"))]), false)
            .await
            .unwrap();

        let overlay = proxy.overlay.lock();
        let diff = compute_diff(&overlay, &filters("color", "orig"));
        assert!(diff.adds.is_empty() && diff.deletes.is_empty());
        assert_eq!(diff.updates.get("doc-1").and_then(|p| p.get("title")), Some(&json!("fresh")));
    }

    #[tokio::test]
    async fn pending_delete_subtracts_matches() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("doc-1", Props::from([("color".to_string(), json!("orig"))]))
            .unwrap();
        let proxy = proxy_with(Arc::clone(&storage), 1);
        proxy.delete("doc-1").await.unwrap();

        assert_eq!(proxy.get_cached("doc-1"), None);
        let overlay = proxy.overlay.lock();
        let diff = compute_diff(&overlay, &filters("color", "orig"));
        assert!(diff.deletes.contains("doc-1"));
    }

    #[tokio::test]
    async fn eviction_retires_entries_in_seqno_order() {
        let storage = Arc::new(MemoryStorage::new());
        // queue already handed out seqno 1 to someone else
        let proxy = proxy_with(storage, 2);
        for i in 0..4 {
            proxy
                .store(
                    &format!("doc-{}", i),
                    Props::from([("color".to_string(), json!("c"))]),
                    true,
                )
                .await
                .unwrap();
        }
        assert_eq!(proxy.pending_writes(), 4);

        let mut retained = Vec::new();
        for committed in [1, 3, 4, 5] {
            proxy.reconcile(committed);
            retained.push(proxy.pending_writes());
        }
        assert_eq!(retained, vec![4, 2, 1, 0]);
        assert!(retained.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(proxy.get_cached("doc-3"), None);
    }

    #[tokio::test]
    async fn reconcile_rebuilds_cache_from_unconfirmed_tail() {
        let storage = Arc::new(MemoryStorage::new());
        let proxy = proxy_with(storage, 1);
        proxy
            .store("doc-a", Props::from([("color".to_string(), json!("red"))]), true)
            .await
            .unwrap();
        proxy
            .store("doc-b", Props::from([("color".to_string(), json!("blue"))]), true)
            .await
            .unwrap();

        proxy.reconcile(1); // doc-a committed, doc-b still pending
        assert_eq!(proxy.get_cached("doc-a"), None);
        let b = proxy.get_cached("doc-b").unwrap();
        assert_eq!(b.get("color"), Some(&json!("blue")));
    }
}
