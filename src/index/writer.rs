use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FindResult, Props};
use crate::index::engine::SearchEngine;
use crate::index::hooks::LifecycleHooks;
use crate::index::reader::IndexReader;
use crate::index::COMMIT_SENTINEL;
use crate::query::types::Query;
use crate::schema::registry::SharedRegistry;

/// Zero-argument callback invoked synchronously at the end of every
/// successful commit; the queue layer uses it to publish a new committed
/// sequence number.
pub type CommitCallback = Box<dyn Fn() + Send + Sync>;

/// Write side of the index: extends the reader with store/delete and a
/// background commit scheduler driven by a change-count threshold and an
/// idle timeout.
pub struct IndexWriter {
    inner: Arc<TokioMutex<WriterState>>,
    flush_signal: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    reader: TokioMutex<IndexReader>,
}

struct WriterState {
    engine: SearchEngine,
    handle: Option<tantivy::IndexWriter>,
    pending: usize,
    registry: SharedRegistry,
    config: Config,
    hooks: Arc<dyn LifecycleHooks>,
    on_commit: CommitCallback,
}

impl IndexWriter {
    pub fn open(
        config: Config,
        registry: SharedRegistry,
        hooks: Arc<dyn LifecycleHooks>,
        on_commit: CommitCallback,
    ) -> Result<Self> {
        let engine = open_or_rebuild(&config, &registry)?;
        let inner = Arc::new(TokioMutex::new(WriterState {
            engine,
            handle: None,
            pending: 0,
            registry: Arc::clone(&registry),
            config: config.clone(),
            hooks,
            on_commit,
        }));
        let flush_signal = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = spawn_commit_task(
            Arc::clone(&inner),
            Arc::clone(&flush_signal),
            shutdown_rx,
            Duration::from_secs(config.flush_timeout_secs),
        );
        Ok(IndexWriter {
            inner,
            flush_signal,
            shutdown,
            task: Mutex::new(Some(task)),
            reader: TokioMutex::new(IndexReader::new(config, registry)),
        })
    }

    /// Index one document record. The caller is never blocked on a flush:
    /// reaching the threshold only schedules a commit on the background task.
    pub async fn store(&self, guid: &str, props: &Props, is_new: bool) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.hooks.before_store(guid, props);
        let doc = state.engine.build_doc(guid, props);
        let term = state.engine.guid_term(guid);
        {
            let handle = ensure_handle(&mut state)?;
            handle.delete_term(term);
            handle.add_document(doc)?;
        }
        state.pending += 1;
        tracing::debug!(guid, is_new, pending = state.pending, "indexed document");
        if state.pending >= state.config.flush_threshold {
            self.flush_signal.notify_one();
        }
        state.hooks.after_store(guid);
        Ok(())
    }

    pub async fn delete(&self, guid: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.hooks.before_delete(guid);
        let term = state.engine.guid_term(guid);
        ensure_handle(&mut state)?.delete_term(term);
        state.pending += 1;
        tracing::debug!(guid, pending = state.pending, "removed document");
        if state.pending >= state.config.flush_threshold {
            self.flush_signal.notify_one();
        }
        state.hooks.after_delete(guid);
        Ok(())
    }

    /// Flush immediately and re-arm the idle timer.
    pub async fn commit(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        commit_locked(&mut state)?;
        self.flush_signal.notify_one();
        Ok(())
    }

    /// Final commit, then stop the background task and release the handle.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let mut state = self.inner.lock().await;
        commit_locked(&mut state)?;
        state.handle = None;
        Ok(())
    }

    pub async fn find(&self, query: &Query) -> Result<FindResult> {
        self.reader.lock().await.find(query).await
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>> {
        self.reader.lock().await.mtime()
    }
}

/// Lazily open the writable handle. A handle that cannot be opened means a
/// corrupt store: discard the on-disk files and rebuild instead of failing.
fn ensure_handle(state: &mut WriterState) -> Result<&mut tantivy::IndexWriter> {
    if state.handle.is_none() {
        let handle = match state.engine.writer_handle(state.config.writer_heap_bytes) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(error = %err, "writable handle failed to open, rebuilding index");
                fs::remove_dir_all(&state.config.index_path)?;
                state.engine = open_or_rebuild(&state.config, &state.registry)?;
                state.engine.writer_handle(state.config.writer_heap_bytes)?
            }
        };
        state.handle = Some(handle);
    }
    state
        .handle
        .as_mut()
        .ok_or_else(|| Error::new(ErrorKind::Internal, "writable handle missing".to_string()))
}

fn open_or_rebuild(config: &Config, registry: &SharedRegistry) -> Result<SearchEngine> {
    match SearchEngine::open(&config.index_path, Arc::clone(registry), true) {
        Ok(engine) => Ok(engine),
        Err(err) => {
            tracing::warn!(error = %err, path = ?config.index_path, "index corrupt, rebuilding from scratch");
            fs::remove_dir_all(&config.index_path)?;
            SearchEngine::open(&config.index_path, Arc::clone(registry), true)
        }
    }
}

fn commit_locked(state: &mut WriterState) -> Result<()> {
    if let Some(handle) = state.handle.as_mut() {
        handle.commit()?;
    }
    touch_sentinel(&state.config)?;
    state.pending = 0;
    (state.on_commit)();
    tracing::debug!("index commit complete");
    Ok(())
}

/// The sentinel's modification time is the store's externally visible mtime.
fn touch_sentinel(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.index_path)?;
    fs::write(
        config.index_path.join(COMMIT_SENTINEL),
        Utc::now().to_rfc3339(),
    )?;
    Ok(())
}

/// Timer-or-signal select: the task races the idle timeout against the
/// flush signal and re-arms the timeout whenever the signal fires early.
fn spawn_commit_task(
    inner: Arc<TokioMutex<WriterState>>,
    flush_signal: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    flush_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = flush_signal.notified() => {}
                _ = tokio::time::sleep(flush_timeout) => {}
                _ = shutdown.changed() => break,
            }
            let mut state = inner.lock().await;
            if state.pending > 0 {
                if let Err(err) = commit_locked(&mut state) {
                    tracing::warn!(error = %err, "background commit failed");
                }
            }
        }
    })
}
