use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, BoostQuery, Occur, Query as NativeQuery, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, TantivyDocument, Term};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Props, ResultRow};
use crate::query::parser::ParsedQuery;
use crate::query::types::{request_values, Query, SortOrder};
use crate::schema::registry::{PropertyRegistry, SharedRegistry, GUID_PROP};

/// Thin adapter around an embedded tantivy index: translates a structured
/// query into the engine's native query tree, performs pagination, sort and
/// grouping, and exposes per-property stored values.
pub struct SearchEngine {
    index: Index,
    reader: tantivy::IndexReader,
    registry: SharedRegistry,
    guid_field: Field,
    term_fields: HashMap<String, Field>,
    text_fields: HashMap<String, Field>,
    value_fields: HashMap<String, Field>,
}

/// A matching document with its guid and full stored value map.
struct RawRow {
    guid: String,
    stored: Props,
}

impl SearchEngine {
    /// Open the index at `path`. With `create` the on-disk index (and its
    /// directory) are created when absent; without it an existing index is
    /// required, as in reader processes.
    pub fn open(path: &Path, registry: SharedRegistry, create: bool) -> Result<Self> {
        let schema = Self::build_schema(&registry);
        let index = if create {
            fs::create_dir_all(path)?;
            let dir = MmapDirectory::open(path).map_err(|err| Error::new(
                ErrorKind::IndexUnavailable,
                format!("cannot open index directory {:?}: {}", path, err),
            ))?;
            Index::open_or_create(dir, schema)?
        } else {
            let dir = MmapDirectory::open(path).map_err(|err| Error::new(
                ErrorKind::IndexUnavailable,
                format!("cannot open index directory {:?}: {}", path, err),
            ))?;
            Index::open(dir)?
        };

        let schema = index.schema();
        let guid_field = schema.get_field(GUID_PROP)?;
        let mut term_fields = HashMap::new();
        let mut text_fields = HashMap::new();
        let mut value_fields = HashMap::new();
        for spec in registry.specs() {
            if let Some(slot) = spec.slot {
                value_fields.insert(spec.name.clone(), schema.get_field(&format!("v{}", slot))?);
            }
            if spec.is_term() {
                let field = if spec.name == GUID_PROP {
                    guid_field
                } else {
                    schema.get_field(&format!("t_{}", spec.name))?
                };
                term_fields.insert(spec.name.clone(), field);
            }
            if spec.full_text {
                text_fields.insert(spec.name.clone(), schema.get_field(&format!("x_{}", spec.name))?);
            }
        }

        let reader = index.reader()?;
        Ok(SearchEngine {
            index,
            reader,
            registry,
            guid_field,
            term_fields,
            text_fields,
            value_fields,
        })
    }

    fn build_schema(registry: &PropertyRegistry) -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field(GUID_PROP, STRING | STORED);
        for spec in registry.specs() {
            if let Some(slot) = spec.slot {
                builder.add_text_field(&format!("v{}", slot), STORED);
            }
            if spec.is_term() && spec.name != GUID_PROP {
                builder.add_text_field(&format!("t_{}", spec.name), STRING);
            }
            if spec.full_text {
                builder.add_text_field(&format!("x_{}", spec.name), TEXT);
            }
        }
        builder.build()
    }

    /// Writable handle for the single writer process.
    pub fn writer_handle(&self, heap_bytes: usize) -> Result<tantivy::IndexWriter> {
        Ok(self.index.writer(heap_bytes)?)
    }

    /// Make the latest commit visible to subsequent searches.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    pub fn guid_term(&self, guid: &str) -> Term {
        Term::from_field_text(self.guid_field, guid)
    }

    /// One indexed record per document: the guid at its reserved slot,
    /// stored values for slot properties, exact terms for prefixed/boolean
    /// properties, and full-text properties fed to the tokenizer.
    pub fn build_doc(&self, guid: &str, props: &Props) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.guid_field, guid);
        if let Some(field) = self.value_fields.get(GUID_PROP) {
            doc.add_text(*field, JsonValue::String(guid.to_string()).to_string());
        }
        for (name, value) in props {
            let Some(spec) = self.registry.get(name) else { continue };
            if spec.name == GUID_PROP {
                continue;
            }
            if spec.slot.is_some() {
                if let (Some(field), Ok(raw)) = (self.value_fields.get(name), serde_json::to_string(value)) {
                    doc.add_text(*field, raw);
                }
            }
            if spec.is_term() {
                if let Some(field) = self.term_fields.get(name) {
                    match value {
                        JsonValue::Array(values) => {
                            for v in values {
                                doc.add_text(*field, PropertyRegistry::term_value(v));
                            }
                        }
                        JsonValue::Object(map) if spec.localized => {
                            for v in map.values() {
                                doc.add_text(*field, PropertyRegistry::term_value(v));
                            }
                        }
                        v => doc.add_text(*field, PropertyRegistry::term_value(v)),
                    }
                }
            }
            if spec.full_text {
                if let Some(field) = self.text_fields.get(name) {
                    doc.add_text(*field, flatten_text(value));
                }
            }
        }
        doc
    }

    /// Per-property OR clauses across requested values, AND-ed together;
    /// boolean-flagged properties form a zero-boost filter clause so they
    /// affect membership but not ranking; leftover free text goes through
    /// the engine's own query parser over the full-text fields.
    fn native_query(&self, parsed: &ParsedQuery) -> Result<Box<dyn NativeQuery>> {
        let mut clauses: Vec<(Occur, Box<dyn NativeQuery>)> = Vec::new();
        let mut filters: Vec<(Occur, Box<dyn NativeQuery>)> = Vec::new();

        for (name, value) in &parsed.request {
            let spec = self.registry.get(name).ok_or_else(|| Error::new(
                ErrorKind::QueryError,
                format!("unknown property {} in request", name),
            ))?;
            let field = self.term_fields.get(name).copied().ok_or_else(|| Error::new(
                ErrorKind::QueryError,
                format!("property {} is not filterable", name),
            ))?;
            let alternatives: Vec<(Occur, Box<dyn NativeQuery>)> = request_values(value)
                .into_iter()
                .map(|v| {
                    let term = Term::from_field_text(field, &PropertyRegistry::term_value(v));
                    let query: Box<dyn NativeQuery> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, query)
                })
                .collect();
            let clause: Box<dyn NativeQuery> = Box::new(BooleanQuery::new(alternatives));
            if spec.boolean {
                filters.push((Occur::Must, clause));
            } else {
                clauses.push((Occur::Must, clause));
            }
        }

        if !filters.is_empty() {
            clauses.push((
                Occur::Must,
                Box::new(BoostQuery::new(Box::new(BooleanQuery::new(filters)), 0.0)),
            ));
        }

        let text = parsed.free_text.trim();
        if !text.is_empty() {
            let fields: Vec<Field> = self.text_fields.values().copied().collect();
            let parser = QueryParser::for_index(&self.index, fields);
            let query = parser.parse_query(text).map_err(|err| Error::new(
                ErrorKind::QueryError,
                format!("cannot parse free text {:?}: {}", text, err),
            ))?;
            clauses.push((Occur::Must, query));
        }

        if clauses.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Execute a parsed query: match, range-filter, order by the requested
    /// sort key (guid ascending as the invariable tiebreak), group, page,
    /// and decode the reply properties.
    pub fn search(
        &self,
        parsed: &ParsedQuery,
        query: &Query,
        offset: usize,
        limit: usize,
        locale: &str,
        default_locale: &str,
    ) -> Result<(Vec<ResultRow>, usize)> {
        let native = self.native_query(parsed)?;
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&*native, &DocSetCollector)?;

        let mut rows = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(row) = self.decode_raw(&doc) else { continue };
            if parsed.ranges.iter().all(|r| {
                row.stored
                    .get(&r.prop)
                    .and_then(JsonValue::as_f64)
                    .is_some_and(|v| v >= r.lo && v <= r.hi)
            }) {
                rows.push(row);
            }
        }

        let order_key = query.order_key();
        let descending = query.sort_order() == SortOrder::Desc;
        rows.sort_by(|a, b| {
            let primary = match order_key {
                Some(key) => {
                    let ord = cmp_stored(a.stored.get(key), b.stored.get(key));
                    if descending { ord.reverse() } else { ord }
                }
                None => Ordering::Equal,
            };
            primary.then_with(|| a.guid.cmp(&b.guid))
        });

        if let Some(group_key) = query.group_by.as_deref() {
            let mut seen = std::collections::HashSet::new();
            rows.retain(|row| {
                let bucket = row
                    .stored
                    .get(group_key)
                    .map(PropertyRegistry::term_value)
                    .unwrap_or_default();
                seen.insert(bucket)
            });
        }

        let total = rows.len();
        let page = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| ResultRow {
                props: self.project(&row.stored, &query.reply, locale, default_locale),
                guid: row.guid,
            })
            .collect();
        Ok((page, total))
    }

    /// Point lookup by guid term; returns the full stored value map.
    pub fn get(&self, guid: &str) -> Result<Option<Props>> {
        let query = TermQuery::new(self.guid_term(guid), IndexRecordOption::Basic);
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&query, &DocSetCollector)?;
        let Some(address) = addresses.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(self.decode_raw(&doc).map(|row| row.stored))
    }

    fn decode_raw(&self, doc: &TantivyDocument) -> Option<RawRow> {
        let guid = doc.get_first(self.guid_field)?.as_str()?.to_string();
        let mut stored = Props::new();
        for spec in self.registry.specs() {
            let Some(field) = self.value_fields.get(&spec.name) else { continue };
            if let Some(raw) = doc.get_first(*field).and_then(|v| v.as_str()) {
                if let Ok(value) = serde_json::from_str(raw) {
                    stored.insert(spec.name.clone(), value);
                }
            }
        }
        Some(RawRow { guid, stored })
    }

    /// Restrict a stored map to the reply list, applying stored-value
    /// deserialization and locale fallback. An empty reply returns every
    /// stored property except the guid pseudo-property.
    fn project(&self, stored: &Props, reply: &[String], locale: &str, default_locale: &str) -> Props {
        let mut props = Props::new();
        if reply.is_empty() {
            for (name, value) in stored {
                if name == GUID_PROP {
                    continue;
                }
                if let Some(spec) = self.registry.get(name) {
                    props.insert(
                        name.clone(),
                        self.registry.decode_value(spec, value.clone(), locale, default_locale),
                    );
                }
            }
        } else {
            for name in reply {
                let (Some(spec), Some(value)) = (self.registry.get(name), stored.get(name)) else {
                    continue;
                };
                props.insert(
                    name.clone(),
                    self.registry.decode_value(spec, value.clone(), locale, default_locale),
                );
            }
        }
        props
    }
}

/// Collapse any value shape to the text handed to the tokenizer.
fn flatten_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(values) => values
            .iter()
            .map(flatten_text)
            .collect::<Vec<_>>()
            .join(" "),
        JsonValue::Object(map) => map
            .values()
            .map(flatten_text)
            .collect::<Vec<_>>()
            .join(" "),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Stored-value ordering: null < bool < number < string; absent sorts first.
fn cmp_stored(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
