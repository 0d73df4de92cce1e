pub mod core;
pub mod schema;
pub mod query;
pub mod storage;
pub mod index;
pub mod queue;

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                              QUILLDB STRUCT ARCHITECTURE                                    │
└────────────────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────────── CORE LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                               struct DocumentStore                                  │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ storage: Arc<dyn DocumentStorage>  // Durable per-document property records  │ │    │
│  │  │ writer: Arc<IndexWriter>           // Single writer + commit scheduler       │ │    │
│  │  │ queue: Arc<ProcessWriteQueue>      // Seqno assignment, ordered apply        │ │    │
│  │  │ proxy: Arc<IndexProxy>             // Read-your-writes overlay front         │ │    │
│  │  │ reconciler: JoinHandle             // Drops satisfied overlay entries        │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                              │
│  ┌──────────────────┐  ┌─────────────────────┐  ┌──────────────────────────────────┐       │
│  │ struct Config    │  │ type Props          │  │ struct FindResult                │       │
│  │ • index_path     │  │   HashMap<String,   │  │ • rows: Vec<ResultRow>           │       │
│  │ • flush_threshold│  │   serde_json::Value>│  │ • total: usize (approx, >= rows) │       │
│  │ • flush_timeout  │  └─────────────────────┘  └──────────────────────────────────┘       │
│  │ • max_query_limit│                                                                       │
│  │ • retries/backoff│  ┌─────────────────────┐  ┌──────────────────────────────────┐       │
│  │ • locales        │  │ struct Error        │  │ enum ErrorKind                   │       │
│  └──────────────────┘  │ • kind, context     │  │ NotFound Forbidden Constraint…   │       │
│                        └─────────────────────┘  │ IndexUnavailable QueryError …    │       │
│                                                 └──────────────────────────────────┘       │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── SCHEMA LAYER ─────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────┐  ┌────────────────────────────────────────────────────────┐    │
│  │ struct PropertyRegistry│  │ struct PropertySpec                                    │    │
│  │ • specs: Vec<Spec>     │  │ • name, typecast, slot?, prefix?, boolean, full_text   │    │
│  │ • term_set()           │  │ • localized, readable, writable, write_once, required  │    │
│  │ • validate_store()     │  │ • blob, default                                        │    │
│  │ • validate_request()   │  └────────────────────────────────────────────────────────┘    │
│  └────────────────────────┘   slot 0 is reserved for the guid pseudo-property               │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── INDEX LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────┐  ┌──────────────────────┐  ┌───────────────────────────┐       │
│  │ struct SearchEngine    │  │ struct IndexReader   │  │ struct IndexWriter        │       │
│  │ • tantivy Index        │  │ • engine: Option<>   │  │ • handle: Option<writer>  │       │
│  │ • native_query()       │  │ • find() w/ retry    │  │ • store()/delete()/commit │       │
│  │ • search()/get()       │  │ • mtime()            │  │ • threshold-or-timeout    │       │
│  │ • build_doc()          │  │ • get_cached() = ∅   │  │   commit task (select!)   │       │
│  └────────────────────────┘  └──────────────────────┘  └───────────────────────────┘       │
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                               struct IndexProxy                                     │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ overlay: Mutex<Overlay>           // cache: guid → CachedDocument            │ │    │
│  │  │                                   // log: VecDeque<PendingWrite> (by seqno)  │ │    │
│  │  │ store(): merge cache first, queue second (read-your-writes ordering)         │ │    │
│  │  │ find(): adds/deletes/updates term-diff patch over the raw result             │ │    │
│  │  │ reconcile(): prune log ≤ committed seqno, replay the unconfirmed tail        │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── QUEUE LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────┐  ┌──────────────────────┐  ┌───────────────────────────┐       │
│  │ trait WriteQueue       │  │ struct ProcessWrite  │  │ struct CommitLedger       │       │
│  │ • put() → seqno        │  │ Queue                │  │ • applied / committed     │       │
│  │ • wait_for_commit()    │  │ • mpsc + consumer    │  │ • publish() from the      │       │
│  │ • last_committed_seqno │  │ • watch<committed>   │  │   writer commit callback  │       │
│  └────────────────────────┘  └──────────────────────┘  └───────────────────────────┘       │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── RELATIONSHIPS ────────────────────────────────────────────┐
│                                                                                              │
│  caller ──store/delete──> IndexProxy ──overlay merge (sync)──> cache                        │
│     │                         │                                                             │
│     │                         └──put──> WriteQueue ──apply──> IndexWriter ──commit──>       │
│     │                                                              │                        │
│     └──find──> IndexProxy ──term diff──> IndexReader ──> SearchEngine (tantivy)             │
│                                                                    │                        │
│  CommitLedger <──on_commit callback── IndexWriter ──touch──> mtime sentinel                 │
│       │                                                                                     │
│       └──wait_for_commit──> reconciler ──prune/replay──> overlay ──reopen──> IndexReader    │
│                                                                                              │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
