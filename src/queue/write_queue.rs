use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Props;
use crate::index::writer::IndexWriter;

#[derive(Debug, Clone)]
pub enum WriteOp {
    Store { guid: String, props: Props, is_new: bool },
    Delete { guid: String },
}

/// Contract between the reader processes and the single writer process.
///
/// Operations for one target store are applied to the index writer in seqno
/// order, eventually. `wait_for_commit` blocks the calling task until the
/// writer has committed at least one new batch since the caller's previous
/// call; `None` means shutdown and the caller must stop waiting without
/// reconciling.
#[async_trait]
pub trait WriteQueue: Send + Sync {
    async fn put(&self, op: WriteOp) -> Result<u64>;
    async fn wait_for_commit(&self) -> Option<u64>;
    fn last_committed_seqno(&self) -> u64;
}

/// Bookkeeping shared between the queue consumer and the writer's commit
/// callback: the highest seqno applied to the writer, and the highest seqno
/// covered by a durable commit.
pub struct CommitLedger {
    applied: AtomicU64,
    committed: AtomicU64,
    committed_tx: watch::Sender<u64>,
}

impl CommitLedger {
    pub fn new() -> (Arc<Self>, watch::Receiver<u64>) {
        let (committed_tx, committed_rx) = watch::channel(0);
        let ledger = Arc::new(CommitLedger {
            applied: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            committed_tx,
        });
        (ledger, committed_rx)
    }

    pub fn mark_applied(&self, seqno: u64) {
        self.applied.store(seqno, Ordering::SeqCst);
    }

    /// Called from the writer's commit callback: everything applied before
    /// the flush is now durable.
    pub fn publish(&self) {
        let seqno = self.applied.load(Ordering::SeqCst);
        self.committed.store(seqno, Ordering::SeqCst);
        let _ = self.committed_tx.send(seqno);
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

enum QueueMsg {
    Op { seqno: u64, op: WriteOp },
    Stop,
}

/// In-process write queue: serializes mutations from any number of tasks
/// into the single index writer, in acceptance order, over an unbounded
/// channel drained by one consumer task.
pub struct ProcessWriteQueue {
    tx: mpsc::UnboundedSender<QueueMsg>,
    seqno: AtomicU64,
    closed: AtomicBool,
    ledger: Arc<CommitLedger>,
    committed_rx: TokioMutex<watch::Receiver<u64>>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessWriteQueue {
    pub fn start(
        writer: Arc<IndexWriter>,
        ledger: Arc<CommitLedger>,
        committed_rx: watch::Receiver<u64>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer_ledger = Arc::clone(&ledger);
        let consumer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    QueueMsg::Op { seqno, op } => {
                        let result = match &op {
                            WriteOp::Store { guid, props, is_new } => {
                                writer.store(guid, props, *is_new).await
                            }
                            WriteOp::Delete { guid } => writer.delete(guid).await,
                        };
                        if let Err(err) = result {
                            tracing::warn!(seqno, error = %err, "write apply failed");
                        }
                        consumer_ledger.mark_applied(seqno);
                    }
                    QueueMsg::Stop => break,
                }
            }
        });
        let (shutdown, _) = watch::channel(false);
        ProcessWriteQueue {
            tx,
            seqno: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ledger,
            committed_rx: TokioMutex::new(committed_rx),
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Stop accepting, drain everything accepted so far, then wake waiters
    /// with the shutdown signal.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(QueueMsg::Stop);
        let task = self.consumer.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
impl WriteQueue for ProcessWriteQueue {
    async fn put(&self, op: WriteOp) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Internal, "write queue closed".to_string()));
        }
        let seqno = self.seqno.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(QueueMsg::Op { seqno, op })
            .map_err(|_| Error::new(ErrorKind::Internal, "write queue consumer gone".to_string()))?;
        Ok(seqno)
    }

    async fn wait_for_commit(&self) -> Option<u64> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return None;
        }
        let mut rx = self.committed_rx.lock().await;
        tokio::select! {
            changed = rx.changed() => match changed {
                Ok(()) => Some(*rx.borrow_and_update()),
                Err(_) => None,
            },
            _ = shutdown.changed() => None,
        }
    }

    fn last_committed_seqno(&self) -> u64 {
        self.ledger.committed()
    }
}
