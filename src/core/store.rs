use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FindResult, Props};
use crate::index::hooks::{LifecycleHooks, NoopHooks};
use crate::index::proxy::IndexProxy;
use crate::index::writer::IndexWriter;
use crate::query::types::Query;
use crate::queue::write_queue::{CommitLedger, ProcessWriteQueue, WriteQueue};
use crate::schema::registry::PropertyRegistry;
use crate::storage::store::DocumentStorage;

/// Single-process wiring of the whole store: property registry, durable
/// property storage, index writer with its commit scheduler, in-process
/// write queue, and the read-your-writes index proxy with its reconciler.
///
/// Must be opened inside a tokio runtime; the background tasks live until
/// `close`.
pub struct DocumentStore {
    storage: Arc<dyn DocumentStorage>,
    writer: Arc<IndexWriter>,
    queue: Arc<ProcessWriteQueue>,
    proxy: Arc<IndexProxy>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentStore {
    pub fn open(
        config: Config,
        registry: PropertyRegistry,
        storage: Arc<dyn DocumentStorage>,
    ) -> Result<Self> {
        Self::open_with_hooks(config, registry, storage, Arc::new(NoopHooks))
    }

    pub fn open_with_hooks(
        config: Config,
        registry: PropertyRegistry,
        storage: Arc<dyn DocumentStorage>,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        let (ledger, committed_rx) = CommitLedger::new();
        let callback_ledger = Arc::clone(&ledger);
        let writer = Arc::new(IndexWriter::open(
            config.clone(),
            Arc::clone(&registry),
            hooks,
            Box::new(move || callback_ledger.publish()),
        )?);
        let queue = Arc::new(ProcessWriteQueue::start(
            Arc::clone(&writer),
            ledger,
            committed_rx,
        ));
        let proxy = Arc::new(IndexProxy::new(
            config,
            registry,
            Arc::clone(&storage),
            Arc::clone(&queue) as Arc<dyn WriteQueue>,
        ));
        let reconciler = proxy.spawn_reconciler();
        Ok(DocumentStore {
            storage,
            writer,
            queue,
            proxy,
            reconciler: Mutex::new(Some(reconciler)),
        })
    }

    /// Create a document with a generated guid; it is visible through
    /// `get`/`find` as soon as this returns, well before the index commits.
    pub async fn create(&self, props: Props) -> Result<String> {
        let guid = Uuid::new_v4().to_string();
        self.create_with_guid(&guid, props).await?;
        Ok(guid)
    }

    pub async fn create_with_guid(&self, guid: &str, props: Props) -> Result<()> {
        self.proxy.store(guid, props, true).await?;
        self.persist_merged(guid)
    }

    pub async fn update(&self, guid: &str, props: Props) -> Result<()> {
        self.ensure_exists(guid)?;
        // The proxy seeds the original term set from storage, so it must
        // observe the snapshot before we overwrite it below.
        self.proxy.store(guid, props, false).await?;
        self.persist_merged(guid)
    }

    pub async fn delete(&self, guid: &str) -> Result<()> {
        self.ensure_exists(guid)?;
        self.proxy.delete(guid).await?;
        self.storage.delete(guid)
    }

    /// Current merged property state: pending writes win over storage.
    pub fn get(&self, guid: &str) -> Result<Props> {
        if let Some(props) = self.proxy.get_cached(guid) {
            return Ok(props);
        }
        self.storage
            .get(guid)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("document {} does not exist", guid)))
    }

    pub fn get_cached(&self, guid: &str) -> Option<Props> {
        self.proxy.get_cached(guid)
    }

    pub async fn find(&self, query: &Query) -> Result<FindResult> {
        self.proxy.find(query).await
    }

    /// Flush the index immediately instead of waiting for the scheduler.
    pub async fn commit(&self) -> Result<()> {
        self.writer.commit().await
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>> {
        self.proxy.mtime().await
    }

    pub fn last_committed_seqno(&self) -> u64 {
        self.queue.last_committed_seqno()
    }

    pub fn pending_writes(&self) -> usize {
        self.proxy.pending_writes()
    }

    /// Drain the queue, stop the reconciler, then close the writer with a
    /// final commit.
    pub async fn close(&self) -> Result<()> {
        self.queue.close().await;
        let reconciler = self.reconciler.lock().take();
        if let Some(task) = reconciler {
            let _ = task.await;
        }
        self.writer.close().await
    }

    fn ensure_exists(&self, guid: &str) -> Result<()> {
        if self.proxy.get_cached(guid).is_none() && self.storage.get(guid).is_none() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("document {} does not exist", guid),
            ));
        }
        Ok(())
    }

    fn persist_merged(&self, guid: &str) -> Result<()> {
        if let Some(merged) = self.proxy.get_cached(guid) {
            self.storage.put(guid, merged)?;
        }
        Ok(())
    }
}
