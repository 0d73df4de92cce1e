use chrono::{DateTime, Utc};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FindResult, Props};
use crate::index::engine::SearchEngine;
use crate::index::COMMIT_SENTINEL;
use crate::query::parser::parse_query;
use crate::query::types::Query;
use crate::schema::registry::SharedRegistry;

/// Read side of the index: builds queries from request predicates plus the
/// free-text string, executes them with bounded retry against transient
/// index-handle errors, and decodes result rows back into property maps.
///
/// The engine handle is opened lazily and dropped on reopen failure so the
/// next find can try again.
pub struct IndexReader {
    config: Config,
    registry: SharedRegistry,
    engine: Option<SearchEngine>,
}

impl IndexReader {
    pub fn new(config: Config, registry: SharedRegistry) -> Self {
        IndexReader {
            config,
            registry,
            engine: None,
        }
    }

    fn ensure(&mut self) -> Result<&SearchEngine> {
        if self.engine.is_none() {
            let engine =
                SearchEngine::open(&self.config.index_path, Arc::clone(&self.registry), false)?;
            self.engine = Some(engine);
        }
        self.engine
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Internal, "index handle missing".to_string()))
    }

    /// Drop and reopen the read-only handle. On failure the handle stays
    /// closed and is reopened lazily by the next find.
    pub fn reopen(&mut self) -> Result<()> {
        self.engine = None;
        self.ensure().map(|_| ())
    }

    pub async fn find(&mut self, query: &Query) -> Result<FindResult> {
        let (offset, limit) = query.page(self.config.max_query_limit);
        self.find_paged(query, offset, limit).await
    }

    /// Page-explicit variant used by the proxy, which raises the limit to
    /// keep a page full after subtracting pending deletes.
    pub(crate) async fn find_paged(
        &mut self,
        query: &Query,
        offset: usize,
        limit: usize,
    ) -> Result<FindResult> {
        self.registry.validate_request(query)?;
        let parsed = parse_query(&self.registry, query);
        let locale = self.config.locale.clone();
        let default_locale = self.config.default_locale.clone();
        let mut attempt = 0;
        loop {
            let outcome = self.ensure().and_then(|engine| {
                engine.search(&parsed, query, offset, limit, &locale, &default_locale)
            });
            match outcome {
                Ok((rows, total)) => return Ok(FindResult { rows, total }),
                Err(err) if err.kind == ErrorKind::QueryError => return Err(err),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        tracing::warn!(error = %err, attempts = attempt, "find failed, retries exhausted");
                        return Err(Error::new(
                            ErrorKind::IndexUnavailable,
                            format!("index unavailable after {} attempts: {}", attempt, err),
                        ));
                    }
                    tracing::debug!(error = %err, attempt, "transient index error, reopening handle");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                    self.engine = None;
                }
            }
        }
    }

    /// Direct point lookup, bypassing query building.
    pub fn get(&mut self, guid: &str) -> Result<Option<Props>> {
        let engine = self.ensure()?;
        engine.get(guid)
    }

    /// Identity in the base reader; the proxy overrides this with its
    /// overlay cache.
    pub fn get_cached(&self, _guid: &str) -> Option<Props> {
        None
    }

    /// Timestamp of the last commit, read off the sentinel file the writer
    /// touches on every successful flush.
    pub fn mtime(&self) -> Result<DateTime<Utc>> {
        let path = self.config.index_path.join(COMMIT_SENTINEL);
        let modified = fs::metadata(&path)?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }
}
