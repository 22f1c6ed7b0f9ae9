//! A collection: validated schema, segments, indexes and the write path.
//!
//! Writes are serialized by one mutex. Each batch is validated and
//! analyzed in full before anything is appended, so a bad row rejects the
//! whole batch. A batch is then published under the write side of the
//! visibility lock: the append, the tombstones of replaced or deleted
//! rows and the primary key index all change together. Readers pin the
//! segments under the read side, so every search, count and query sees
//! each write either completely or not at all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{FtsError, Result};
use crate::fts::bm25::Bm25Params;
use crate::fts::stats::QueryStatistics;
use crate::fts::vectorizer::{document_vector, SparseTermVector};
use crate::index::{FieldIndex, IndexParams, IndexSpec};
use crate::metrics;
use crate::query::filter::CompiledFilter;
use crate::query::iterator::{IteratorSource, SearchIterator};
use crate::query::search::{project, resolve_output_fields, HybridSearchRequest, SearchContext, SearchRequest};
use crate::schema::{validate_schema, CollectionSchema, ValidatedSchema};
use crate::segment::{PreparedRow, SegmentId, SegmentSet, SegmentSnapshot};
use crate::types::{DocId, PrimaryKey, Row, SearchResult, WriteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    segment: SegmentId,
    doc: DocId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Upsert,
}

impl WriteOp {
    fn as_str(self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Upsert => "upsert",
        }
    }
}

/// Row and segment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub live_rows: u64,
    pub sealed_segments: usize,
    pub growing_rows: usize,
}

#[derive(Debug)]
pub struct Collection {
    name: String,
    schema: Arc<ValidatedSchema>,
    config: Config,
    segments: RwLock<SegmentSet>,
    indexes: RwLock<HashMap<String, FieldIndex>>,
    locations: DashMap<PrimaryKey, Location>,
    write_lock: Mutex<()>,
    /// Held exclusively while a write is published, shared while pinning.
    visibility: RwLock<()>,
}

impl Collection {
    /// Validate `schema` and create an empty collection.
    pub fn new(name: impl Into<String>, schema: &CollectionSchema, config: Config) -> Result<Self> {
        let name = name.into();
        let schema = validate_schema(schema)?;
        let bm25_fields = schema
            .functions()
            .iter()
            .map(|f| f.output_field.clone())
            .collect();
        info!(
            collection = %name,
            fields = schema.fields().len(),
            functions = schema.functions().len(),
            "created collection"
        );
        Ok(Self {
            name,
            schema: Arc::new(schema),
            config,
            segments: RwLock::new(SegmentSet::new(bm25_fields)),
            indexes: RwLock::new(HashMap::new()),
            locations: DashMap::new(),
            write_lock: Mutex::new(()),
            visibility: RwLock::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ValidatedSchema {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Insert new rows. Fails if any primary key already exists.
    #[instrument(skip(self, rows), fields(collection = %self.name, rows = rows.len()))]
    pub fn insert(&self, rows: Vec<Row>) -> Result<WriteResult> {
        self.write(rows, WriteOp::Insert)
    }

    /// Insert or replace rows by primary key.
    #[instrument(skip(self, rows), fields(collection = %self.name, rows = rows.len()))]
    pub fn upsert(&self, rows: Vec<Row>) -> Result<WriteResult> {
        self.write(rows, WriteOp::Upsert)
    }

    fn write(&self, rows: Vec<Row>, op: WriteOp) -> Result<WriteResult> {
        let _guard = self.write_lock.lock();
        let batch = match self.prepare_batch(rows, op) {
            Ok(batch) => batch,
            Err(e) => {
                metrics::INGEST_BATCHES_REJECTED_TOTAL
                    .with_label_values(&[&self.name])
                    .inc();
                debug!(error = %e, "rejected write batch");
                return Err(e);
            }
        };
        if batch.is_empty() {
            return Ok(WriteResult::default());
        }

        let ids = {
            let _publish = self.visibility.write();
            let (segment, docs) = self.append(&batch)?;
            let mut ids = Vec::with_capacity(batch.len());
            for (prepared, doc) in batch.iter().zip(docs) {
                let previous = self
                    .locations
                    .insert(prepared.key.clone(), Location { segment, doc });
                if let Some(old) = previous {
                    self.tombstone(old);
                }
                ids.push(prepared.key.clone());
            }
            ids
        };

        metrics::ROWS_INGESTED_TOTAL
            .with_label_values(&[&self.name, op.as_str()])
            .inc_by(ids.len() as u64);

        let growing_rows = self.segments.read().growing().len();
        if growing_rows >= self.config.segment.max_growing_rows {
            self.flush()?;
        }
        Ok(WriteResult {
            count: ids.len(),
            ids,
        })
    }

    fn prepare_batch(&self, rows: Vec<Row>, op: WriteOp) -> Result<Vec<PreparedRow>> {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let prepared = PreparedRow::prepare(&self.schema, row)?;
            if !seen.insert(prepared.key.clone()) {
                return Err(FtsError::DuplicatePrimaryKey(prepared.key.to_string()));
            }
            if op == WriteOp::Insert && self.locations.contains_key(&prepared.key) {
                return Err(FtsError::DuplicatePrimaryKey(prepared.key.to_string()));
            }
            batch.push(prepared);
        }
        Ok(batch)
    }

    /// Append to the current growing segment, retrying when it is sealed
    /// underneath us.
    fn append(&self, batch: &[PreparedRow]) -> Result<(SegmentId, Vec<DocId>)> {
        let attempts = self.config.segment.seal_retry_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            let growing = self.segments.read().growing().clone();
            match growing.insert_batch(batch) {
                Ok(docs) => return Ok((growing.id(), docs)),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, attempts, error = %e, "growing segment sealed during write, retrying");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(FtsError::RetriesExhausted {
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn tombstone(&self, location: Location) -> bool {
        let segment = self.segments.read().get(location.segment);
        segment.is_some_and(|s| s.delete(location.doc))
    }

    /// Delete rows by primary key. Unknown keys are ignored.
    #[instrument(skip(self, ids), fields(collection = %self.name, ids = ids.len()))]
    pub fn delete(&self, ids: &[PrimaryKey]) -> Result<WriteResult> {
        let _guard = self.write_lock.lock();
        Ok(self.delete_locked(ids))
    }

    /// Delete every live row matching `expr`.
    #[instrument(skip(self), fields(collection = %self.name))]
    pub fn delete_by_filter(&self, expr: &str) -> Result<WriteResult> {
        let filter = CompiledFilter::from_expr(expr, &self.schema)?;
        let _guard = self.write_lock.lock();
        let mut ids = Vec::new();
        for segment in self.pin() {
            segment.with_view(|view| {
                for doc in filter.select(view) {
                    if let Some(key) = view.key(doc) {
                        ids.push(key.clone());
                    }
                }
            });
        }
        Ok(self.delete_locked(&ids))
    }

    fn delete_locked(&self, ids: &[PrimaryKey]) -> WriteResult {
        let mut deleted = Vec::new();
        let _publish = self.visibility.write();
        for id in ids {
            if let Some((_, location)) = self.locations.remove(id) {
                self.tombstone(location);
                deleted.push(id.clone());
            }
        }
        info!(collection = %self.name, deleted = deleted.len(), "deleted rows");
        WriteResult {
            count: deleted.len(),
            ids: deleted,
        }
    }

    /// Number of live rows (`count(*)`).
    pub fn count(&self) -> u64 {
        self.pin()
            .iter()
            .map(|s| s.with_view(|view| view.live_count()))
            .sum()
    }

    /// Number of live rows matching `expr`.
    pub fn count_where(&self, expr: &str) -> Result<u64> {
        let filter = CompiledFilter::from_expr(expr, &self.schema)?;
        Ok(self
            .pin()
            .iter()
            .map(|s| s.with_view(|view| filter.select(view).len()))
            .sum())
    }

    /// Live rows matching `expr`, in storage order. The primary key is
    /// always returned.
    #[instrument(skip(self, output_fields), fields(collection = %self.name))]
    pub fn query(&self, expr: &str, output_fields: &[&str], limit: Option<usize>) -> Result<Vec<Row>> {
        let filter = CompiledFilter::from_expr(expr, &self.schema)?;
        let fields = self.output_fields(output_fields)?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for segment in self.pin() {
            if out.len() >= limit {
                break;
            }
            segment.with_view(|view| {
                for doc in filter.select(view) {
                    if out.len() >= limit {
                        break;
                    }
                    if let Some(row) = view.row(doc) {
                        out.push(project(row, &fields));
                    }
                }
            });
        }
        metrics::SEARCHES_TOTAL
            .with_label_values(&[&self.name, "query"])
            .inc();
        Ok(out)
    }

    /// Rows by primary key, in the order requested. Missing keys are skipped.
    pub fn get(&self, ids: &[PrimaryKey], output_fields: &[&str]) -> Result<Vec<Row>> {
        let fields = self.output_fields(output_fields)?;
        let _read = self.visibility.read();
        let segments = self.segments.read();
        let mut pinned: HashMap<SegmentId, SegmentSnapshot> = HashMap::new();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(location) = self.locations.get(id).map(|l| *l) else {
                continue;
            };
            if !pinned.contains_key(&location.segment) {
                let Some(segment) = segments.get(location.segment) else {
                    continue;
                };
                pinned.insert(location.segment, segment.pin());
            }
            let row = pinned
                .get(&location.segment)
                .and_then(|s| s.with_view(|view| view.row(location.doc).map(|r| project(r, &fields))));
            if let Some(row) = row {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn output_fields(&self, requested: &[&str]) -> Result<Vec<String>> {
        let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        let mut fields = resolve_output_fields(&self.schema, &requested)?;
        let primary = &self.schema.primary_field().name;
        if !fields.contains(primary) {
            fields.insert(0, primary.clone());
        }
        Ok(fields)
    }

    /// Create an index on `field`. Repeating an identical request is a
    /// no-op; a different request for an indexed field fails.
    #[instrument(skip(self, params), fields(collection = %self.name, field = field))]
    pub fn create_index(&self, field: &str, params: IndexParams) -> Result<()> {
        let spec = IndexSpec::validate(&self.schema, field, &params, &self.config.bm25)?;
        let mut indexes = self.indexes.write();
        if let Some(existing) = indexes.get(field) {
            if existing.spec.declared == params {
                return Ok(());
            }
            return Err(FtsError::InvalidIndexParam {
                param: "index_type".into(),
                reason: format!("field {field} already has a different index"),
            });
        }
        info!(
            index_type = %params.index_type,
            metric_type = %params.metric_type,
            strategy = spec.strategy.as_str(),
            "created index"
        );
        indexes.insert(field.to_string(), FieldIndex::new(spec));
        Ok(())
    }

    /// Index parameters exactly as they were supplied.
    pub fn describe_index(&self, field: &str) -> Result<IndexParams> {
        self.indexes
            .read()
            .get(field)
            .map(|i| i.spec.declared.clone())
            .ok_or_else(|| FtsError::IndexNotFound {
                field: field.to_string(),
            })
    }

    pub fn drop_index(&self, field: &str) -> Result<()> {
        if self.indexes.write().remove(field).is_none() {
            return Err(FtsError::IndexNotFound {
                field: field.to_string(),
            });
        }
        info!(collection = %self.name, field, "dropped index");
        Ok(())
    }

    pub fn list_indexes(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.indexes.read().keys().cloned().collect();
        fields.sort();
        fields
    }

    /// Seal the growing segment. Returns the sealed segment's id, or
    /// `None` when there was nothing to seal.
    #[instrument(skip(self), fields(collection = %self.name))]
    pub fn flush(&self) -> Result<Option<SegmentId>> {
        let start = Instant::now();
        let Some(sealed) = self.segments.write().seal_growing()? else {
            return Ok(None);
        };
        let elapsed = start.elapsed();
        metrics::SEGMENTS_SEALED_TOTAL
            .with_label_values(&[&self.name])
            .inc();
        metrics::SEAL_DURATION
            .with_label_values(&[&self.name])
            .observe(elapsed.as_secs_f64());
        info!(
            segment_id = sealed.id(),
            rows = sealed.len(),
            elapsed_ms = elapsed.as_millis(),
            "sealed growing segment"
        );
        Ok(Some(sealed.id()))
    }

    pub fn stats(&self) -> CollectionStats {
        let pinned = self.pin();
        CollectionStats {
            live_rows: pinned.iter().map(|s| s.with_view(|v| v.live_count())).sum(),
            sealed_segments: pinned.iter().filter(|s| s.is_sealed()).count(),
            growing_rows: pinned
                .iter()
                .filter(|s| !s.is_sealed())
                .map(|s| s.rows() as usize)
                .sum(),
        }
    }

    #[instrument(skip(self, request), fields(collection = %self.name, field = %request.anns_field, nq = request.data.len()))]
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<Vec<SearchResult>>> {
        self.search_with_cancel(request, None)
    }

    /// Search that aborts with `Cancelled` once `cancel` fires.
    pub fn search_with_cancel(
        &self,
        request: &SearchRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<Vec<SearchResult>>> {
        self.timed("search", cancel, |ctx| ctx.search(request))
    }

    #[instrument(skip(self, request), fields(collection = %self.name, requests = request.requests.len()))]
    pub fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<Vec<SearchResult>>> {
        self.hybrid_search_with_cancel(request, None)
    }

    pub fn hybrid_search_with_cancel(
        &self,
        request: &HybridSearchRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<Vec<SearchResult>>> {
        self.timed("hybrid", cancel, |ctx| ctx.hybrid_search(request))
    }

    /// Paged search over the rows visible now. `batch_size` defaults to the
    /// configured iterator batch size; `limit` caps the total number of
    /// results and is otherwise unbounded.
    #[instrument(skip(self, request), fields(collection = %self.name, field = %request.anns_field))]
    pub fn search_iterator(
        &self,
        request: &SearchRequest,
        batch_size: Option<usize>,
        limit: Option<usize>,
    ) -> Result<SearchIterator> {
        self.search_iterator_with_cancel(request, batch_size, limit, None)
    }

    /// Like [`search_iterator`](Self::search_iterator); every batch fails
    /// with `Cancelled` once `cancel` fires.
    pub fn search_iterator_with_cancel(
        &self,
        request: &SearchRequest,
        batch_size: Option<usize>,
        limit: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<SearchIterator> {
        let batch_size = batch_size.unwrap_or(self.config.search.default_iterator_batch_size);
        let indexes: HashMap<String, FieldIndex> = self
            .indexes
            .read()
            .get(&request.anns_field)
            .map(|index| (request.anns_field.clone(), index.clone()))
            .into_iter()
            .collect();
        let source = IteratorSource {
            schema: self.schema.clone(),
            indexes,
            segments: self.pin(),
            config: self.config.search.clone(),
            cancel: cancel.cloned(),
        };
        let opened = SearchIterator::open(source, request, batch_size, limit);
        metrics::SEARCHES_TOTAL
            .with_label_values(&[&self.name, "iterator"])
            .inc();
        if let Err(e) = &opened {
            debug!(error = %e, "search iterator rejected");
        }
        opened
    }

    fn timed<T>(
        &self,
        kind: &str,
        cancel: Option<&CancelToken>,
        run: impl FnOnce(&SearchContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let segments = self.pin();
        let indexes = self.indexes.read();
        let ctx = SearchContext {
            schema: &self.schema,
            indexes: &indexes,
            segments: &segments,
            config: &self.config.search,
            cancel,
        };
        let result = run(&ctx);
        metrics::SEARCHES_TOTAL
            .with_label_values(&[&self.name, kind])
            .inc();
        metrics::SEARCH_DURATION
            .with_label_values(&[&self.name, kind])
            .observe(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(kind, error = %e, "search failed");
        }
        result
    }

    /// BM25 document vector of row `id` in `field`, weighted against the
    /// current corpus average length. `None` if the row does not exist.
    pub fn document_vector(&self, id: &PrimaryKey, field: &str) -> Result<Option<SparseTermVector>> {
        if !self.schema.is_function_output(field) {
            return Err(FtsError::InvalidParameter(format!(
                "field {field} is not a BM25 function output"
            )));
        }
        let params = self
            .indexes
            .read()
            .get(field)
            .map(|i| i.spec.bm25)
            .unwrap_or(Bm25Params {
                k1: self.config.bm25.default_k1,
                b: self.config.bm25.default_b,
            });
        let Some(location) = self.locations.get(id).map(|l| *l) else {
            return Ok(None);
        };

        let mut corpus = QueryStatistics::default();
        let mut terms = None;
        for segment in self.pin() {
            segment.with_view(|view| {
                if let Some(partial) = view.statistics(field, &[]) {
                    corpus.merge(&partial);
                }
                if view.id == location.segment && location.doc < view.len() {
                    terms = view
                        .column(field)
                        .and_then(|c| c.terms.get(location.doc as usize).cloned());
                }
            });
        }
        Ok(terms.map(|t| document_vector(&t, corpus.avg_doc_length(), &params)))
    }

    /// Tokens produced for `text` by the analyzer of `field`. For
    /// multi-analyzer fields `analyzer_name` picks the analyzer with the
    /// usual alias and default fallback.
    pub fn run_analyzer(&self, field: &str, text: &str, analyzer_name: Option<&str>) -> Result<Vec<String>> {
        let analyzer = self
            .schema
            .analyzers()
            .resolve_for_query(field, analyzer_name)
            .ok_or_else(|| FtsError::InvalidParameter(format!("field {field} has no analyzer")))?;
        Ok(analyzer.analyze(text).into_iter().map(|t| t.term).collect())
    }

    /// Pin every segment at one point between two published writes.
    fn pin(&self) -> Vec<SegmentSnapshot> {
        let _read = self.visibility.read();
        self.segments.read().snapshot()
    }
}

/// Shared handle, as held by the catalog.
pub type CollectionRef = Arc<Collection>;
