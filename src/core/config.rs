use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub index_path: PathBuf,

    // IndexWriter commit scheduling
    pub flush_threshold: usize,                 // pending changes before a commit is scheduled
    pub flush_timeout_secs: u64,                // idle interval between background commits
    pub writer_heap_bytes: usize,               // engine writer buffer

    // IndexReader
    pub max_query_limit: usize,                 // server-side clamp on Query.limit
    pub max_retries: usize,                     // reopen attempts on transient index errors
    pub retry_backoff_ms: u64,                  // backoff grows linearly per attempt

    // Localized property fallback
    pub locale: String,
    pub default_locale: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            index_path: PathBuf::from("./data/index"),

            flush_threshold: 160,               // commit after 160 uncommitted mutations
            flush_timeout_secs: 5,              // or every 5 seconds when idle
            writer_heap_bytes: 50 * 1024 * 1024,

            max_query_limit: 1000,
            max_retries: 5,
            retry_backoff_ms: 100,

            locale: "en_US".to_string(),
            default_locale: "en".to_string(),
        }
    }
}
