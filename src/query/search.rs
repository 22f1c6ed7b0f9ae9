//! Ranked search over a snapshot of a collection's segments.
//!
//! Execution runs in two phases. The first visits every segment once to
//! evaluate the filter and, for BM25 fields, to collect corpus statistics
//! for the query terms. The second scores each segment against the merged
//! statistics, so every segment's partial top-k uses the same idf and
//! average length and can be merged exactly. Segments are pinned before
//! the search starts, so both phases see the same rows and tombstones.

use std::collections::{BTreeSet, HashMap, HashSet};

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::error::{FtsError, Result};
use crate::fts::analyzer::Analyzer;
use crate::fts::stats::QueryStatistics;
use crate::fts::traversal::{QueryTerm, Retrieval, ScoreBand};
use crate::fts::vectorizer::{vectorize_query, SparseTermVector};
use crate::index::ann::{AnnRequest, VectorQuery};
use crate::index::params::{FieldKind, MetricType};
use crate::index::FieldIndex;
use crate::query::collector::{Hit, ScoreOrder};
use crate::query::filter::CompiledFilter;
use crate::query::iterator::PageCursor;
use crate::query::rerank::{self, RankedList, Ranker};
use crate::schema::ValidatedSchema;
use crate::segment::{SegmentSnapshot, SegmentView};
use crate::types::{FieldValue, PrimaryKey, SearchResult, SparseVector};

/// One query payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryData {
    Text(String),
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl QueryData {
    fn kind(&self) -> &'static str {
        match self {
            QueryData::Text(_) => "text",
            QueryData::Dense(_) => "dense vector",
            QueryData::Sparse(_) => "sparse vector",
        }
    }
}

impl From<&str> for QueryData {
    fn from(v: &str) -> Self {
        QueryData::Text(v.to_string())
    }
}

impl From<String> for QueryData {
    fn from(v: String) -> Self {
        QueryData::Text(v)
    }
}

impl From<Vec<f32>> for QueryData {
    fn from(v: Vec<f32>) -> Self {
        QueryData::Dense(v)
    }
}

impl From<SparseVector> for QueryData {
    fn from(v: SparseVector) -> Self {
        QueryData::Sparse(v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Must equal the index metric when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    /// Analyzer for query text on multi-analyzer fields. Empty means default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_filter: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub anns_field: String,
    pub data: Vec<QueryData>,
    #[serde(default)]
    pub filter: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub params: SearchParams,
    #[serde(default)]
    pub output_fields: Vec<String>,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    pub fn new(anns_field: impl Into<String>, data: Vec<QueryData>) -> Self {
        Self {
            anns_field: anns_field.into(),
            data,
            filter: String::new(),
            limit: default_limit(),
            offset: 0,
            params: SearchParams::default(),
            output_fields: Vec::new(),
        }
    }

    /// Single text query.
    pub fn text(anns_field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(anns_field, vec![QueryData::Text(text.into())])
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn output_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.output_fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn metric_type(mut self, metric: impl Into<String>) -> Self {
        self.params.metric_type = Some(metric.into());
        self
    }

    pub fn analyzer_name(mut self, name: impl Into<String>) -> Self {
        self.params.analyzer_name = Some(name.into());
        self
    }

    pub fn radius(mut self, radius: f32) -> Self {
        self.params.radius = Some(radius);
        self
    }

    pub fn range_filter(mut self, range_filter: f32) -> Self {
        self.params.range_filter = Some(range_filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchRequest {
    pub requests: Vec<SearchRequest>,
    #[serde(default)]
    pub ranker: Ranker,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub output_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_field: Option<String>,
}

impl HybridSearchRequest {
    pub fn new(requests: Vec<SearchRequest>, ranker: Ranker) -> Self {
        Self {
            requests,
            ranker,
            limit: default_limit(),
            offset: 0,
            output_fields: Vec::new(),
            group_by_field: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn output_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.output_fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by_field = Some(field.into());
        self
    }
}

/// Everything a search reads, borrowed from the owning collection.
pub struct SearchContext<'a> {
    pub schema: &'a ValidatedSchema,
    pub indexes: &'a HashMap<String, FieldIndex>,
    /// Pinned segments of the collection.
    pub segments: &'a [SegmentSnapshot],
    pub config: &'a SearchConfig,
    pub cancel: Option<&'a CancelToken>,
}

/// The slice of a ranking to return: `limit` hits after skipping
/// `offset`, counted from just past `after` when set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window<'c> {
    pub offset: usize,
    pub limit: usize,
    pub after: Option<&'c PageCursor>,
}

/// A request resolved against the schema and its index.
struct Plan<'a> {
    index: &'a FieldIndex,
    metric: MetricType,
    band: ScoreBand,
    filter: CompiledFilter,
    output_fields: Vec<String>,
    analyzer: Option<&'a Analyzer>,
}

/// Per-query input to phase two.
enum Prepared {
    /// Nothing can match: empty analyzed text.
    Empty,
    Terms(SparseTermVector),
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl<'a> SearchContext<'a> {
    /// Results per query, best-first.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<Vec<SearchResult>>> {
        Ok(self.search_ranked(request)?.1)
    }

    /// Like [`search`](Self::search), also returning the metric scores are
    /// expressed in.
    pub fn search_ranked(&self, request: &SearchRequest) -> Result<(MetricType, Vec<Vec<SearchResult>>)> {
        check_window(request.limit, request.offset, self.config.max_topk)?;
        self.execute(
            request,
            Window {
                offset: request.offset,
                limit: request.limit,
                after: None,
            },
        )
    }

    /// One page of a single-query request.
    pub(crate) fn page(&self, request: &SearchRequest, window: Window<'_>) -> Result<Vec<SearchResult>> {
        let (_, mut results) = self.execute(request, window)?;
        Ok(results.pop().unwrap_or_default())
    }

    fn execute(&self, request: &SearchRequest, window: Window<'_>) -> Result<(MetricType, Vec<Vec<SearchResult>>)> {
        let plan = self.plan(request)?;
        let queries = request
            .data
            .iter()
            .map(|q| self.prepare(&plan, request, q))
            .collect::<Result<Vec<_>>>()?;

        // Phase one: candidates and statistics.
        let terms: Vec<u32> = queries
            .iter()
            .filter_map(|q| match q {
                Prepared::Terms(v) => Some(v.iter().map(|(t, _)| t)),
                _ => None,
            })
            .flatten()
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();
        let mut stats = QueryStatistics::default();
        let mut candidates = Vec::with_capacity(self.segments.len());
        for segment in self.segments {
            self.check_cancel()?;
            let allowed = segment.with_view(|view| {
                if !terms.is_empty() {
                    if let Some(partial) = view.statistics(&request.anns_field, &terms) {
                        stats.merge(&partial);
                    }
                }
                plan.filter.select(view)
            });
            candidates.push(allowed);
        }
        debug!(
            field = %request.anns_field,
            segments = self.segments.len(),
            candidates = candidates.iter().map(RoaringBitmap::len).sum::<u64>(),
            corpus_docs = stats.doc_count(),
            "search candidates collected"
        );

        // Phase two: score, merge, window, materialize.
        let k = window.offset.saturating_add(window.limit);
        let after = window.after.map(|c| (c.score, &c.key));
        let mut results = Vec::with_capacity(queries.len());
        for query in &queries {
            let query_terms = match query {
                Prepared::Empty => {
                    results.push(Vec::new());
                    continue;
                }
                Prepared::Terms(vector) => {
                    let weighted: Vec<QueryTerm> = vector
                        .iter()
                        .filter_map(|(term, qtf)| {
                            stats.idf(term).map(|idf| QueryTerm {
                                term,
                                weight: qtf * idf,
                            })
                        })
                        .collect();
                    if weighted.is_empty() {
                        results.push(Vec::new());
                        continue;
                    }
                    weighted
                }
                _ => Vec::new(),
            };

            let mut merged: Vec<(usize, Hit)> = Vec::new();
            for (i, segment) in self.segments.iter().enumerate() {
                self.check_cancel()?;
                let allowed = &candidates[i];
                if allowed.is_empty() {
                    continue;
                }
                let hits = segment.with_view(|view| {
                    self.retrieve(&plan, request, view, query, &query_terms, &stats, allowed, after, k)
                })?;
                merged.extend(hits.into_iter().map(|h| (i, h)));
            }

            let order = plan.metric.order();
            merged.sort_by(|a, b| order.compare((a.1.score, &a.1.key), (b.1.score, &b.1.key)));
            merged.truncate(k);
            let page: Vec<(usize, Hit)> = merged.into_iter().skip(window.offset).collect();
            results.push(self.materialize(&page, &plan.output_fields));
        }
        Ok((plan.metric, results))
    }

    /// Fuse several searches into one ranking per query.
    pub fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<Vec<SearchResult>>> {
        if request.requests.is_empty() {
            return Err(FtsError::InvalidParameter(
                "hybrid search requires at least one search request".into(),
            ));
        }
        check_window(request.limit, request.offset, self.config.max_topk)?;
        request.ranker.validate(request.requests.len())?;
        let output_fields = resolve_output_fields(self.schema, &request.output_fields)?;
        let group_by = request.group_by_field.as_deref();
        if let Some(field) = group_by {
            let ok = self
                .schema
                .field(field)
                .is_some_and(|f| !f.is_vector() && !self.schema.is_function_output(field));
            if !ok {
                return Err(FtsError::InvalidParameter(format!(
                    "group_by_field {field} must be a scalar field"
                )));
            }
        }

        let mut fetch_fields = output_fields.clone();
        if let Some(field) = group_by {
            if !fetch_fields.iter().any(|f| f == field) {
                fetch_fields.push(field.to_string());
            }
        }

        let mut per_request = Vec::with_capacity(request.requests.len());
        for sub in &request.requests {
            let mut sub = sub.clone();
            sub.output_fields = fetch_fields.clone();
            per_request.push(self.search_ranked(&sub)?);
        }
        let nq = per_request[0].1.len();
        if per_request.iter().any(|(_, r)| r.len() != nq) {
            return Err(FtsError::InvalidParameter(
                "all hybrid search requests must carry the same number of queries".into(),
            ));
        }

        let requested: HashSet<&str> = output_fields.iter().map(String::as_str).collect();
        let mut fused_all = Vec::with_capacity(nq);
        for q in 0..nq {
            let lists: Vec<RankedList> = per_request
                .iter()
                .map(|(metric, results)| RankedList {
                    metric: *metric,
                    hits: results[q].clone(),
                })
                .collect();
            let mut fused = rerank::fuse(&lists, &request.ranker, request.limit, request.offset, group_by)?;
            for hit in &mut fused {
                hit.fields.retain(|name, _| requested.contains(name.as_str()));
            }
            fused_all.push(fused);
        }
        Ok(fused_all)
    }

    /// Check that `request` can back a search iterator with batches of
    /// `batch_size`.
    pub fn validate_iterator(&self, request: &SearchRequest, batch_size: usize) -> Result<()> {
        if batch_size == 0 || batch_size > self.config.max_iterator_batch_size {
            return Err(FtsError::InvalidParameter(format!(
                "batch_size must be within [1, {}], got {batch_size}",
                self.config.max_iterator_batch_size
            )));
        }
        if request.data.len() != 1 {
            return Err(FtsError::InvalidParameter(format!(
                "search iterator takes exactly one query, got {}",
                request.data.len()
            )));
        }
        if request.offset > self.config.max_topk {
            return Err(FtsError::InvalidParameter(format!(
                "offset must not exceed {}, got {}",
                self.config.max_topk, request.offset
            )));
        }
        let plan = self.plan(request)?;
        self.prepare(&plan, request, &request.data[0])?;
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    fn plan(&self, request: &SearchRequest) -> Result<Plan<'a>> {
        let field = &request.anns_field;
        if self.schema.field(field).is_none() {
            return Err(FtsError::InvalidParameter(format!("anns_field {field} not found")));
        }
        let index = self
            .indexes
            .get(field)
            .ok_or_else(|| FtsError::IndexNotFound { field: field.clone() })?;
        let metric = index.spec.metric.ok_or_else(|| {
            FtsError::InvalidParameter(format!("field {field} has no vector index"))
        })?;
        if let Some(requested) = request.params.metric_type.as_deref().filter(|m| !m.is_empty()) {
            if MetricType::parse(requested) != Some(metric) {
                return Err(FtsError::InvalidParameter(format!(
                    "metric type {requested} does not match index metric {metric}"
                )));
            }
        }
        let band = score_band(request.params.radius, request.params.range_filter, metric.order())?;
        let filter = CompiledFilter::from_expr(&request.filter, self.schema)?;
        let output_fields = resolve_output_fields(self.schema, &request.output_fields)?;
        let analyzer = match index.spec.kind {
            FieldKind::Bm25Output => {
                let label = request.params.analyzer_name.as_deref().filter(|n| !n.is_empty());
                self.schema
                    .bm25_function_for_output(field)
                    .and_then(|f| self.schema.analyzers().resolve_for_query(&f.input_field, label))
            }
            _ => None,
        };
        Ok(Plan {
            index,
            metric,
            band,
            filter,
            output_fields,
            analyzer,
        })
    }

    fn prepare(&self, plan: &Plan<'_>, request: &SearchRequest, query: &QueryData) -> Result<Prepared> {
        let field = &request.anns_field;
        let unsupported = |reason: String| FtsError::UnsupportedQueryType {
            field: field.clone(),
            reason,
        };
        match (plan.index.spec.kind, query) {
            (FieldKind::Bm25Output, QueryData::Text(text)) => {
                let analyzer = plan.analyzer.ok_or_else(|| {
                    unsupported("BM25 field has no analyzer for query text".to_string())
                })?;
                let vector = vectorize_query(&analyzer.analyze(text));
                Ok(if vector.is_empty() {
                    Prepared::Empty
                } else {
                    Prepared::Terms(vector)
                })
            }
            (FieldKind::Bm25Output, other) => Err(unsupported(format!(
                "BM25 function output fields take raw text, got a {}",
                other.kind()
            ))),
            (FieldKind::Dense { dim }, QueryData::Dense(v)) => {
                if v.len() != dim {
                    return Err(FtsError::InvalidParameter(format!(
                        "query vector has dimension {}, field {field} has {dim}",
                        v.len()
                    )));
                }
                Ok(Prepared::Dense(v.clone()))
            }
            (FieldKind::Sparse, QueryData::Sparse(v)) => Ok(Prepared::Sparse(v.clone())),
            (_, other) => Err(unsupported(format!(
                "{} query is not supported on this field",
                other.kind()
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn retrieve(
        &self,
        plan: &Plan<'_>,
        request: &SearchRequest,
        view: &SegmentView<'_>,
        query: &Prepared,
        terms: &[QueryTerm],
        stats: &QueryStatistics,
        allowed: &RoaringBitmap,
        after: Option<(f32, &PrimaryKey)>,
        k: usize,
    ) -> Result<Vec<Hit>> {
        let spec = &plan.index.spec;
        let vector_query = match query {
            Prepared::Terms(_) => {
                let Some(column) = view.column(&request.anns_field) else {
                    return Ok(Vec::new());
                };
                return Retrieval {
                    index: &column.index,
                    terms,
                    avg_doc_length: stats.avg_doc_length(),
                    params: spec.bm25,
                    allowed,
                    keys: &view.data.keys,
                    band: plan.band,
                    after,
                    cancel: self.cancel,
                    cancel_check_interval: self.config.cancel_check_interval,
                }
                .top_k(spec.strategy, k);
            }
            Prepared::Dense(v) => VectorQuery::Dense(v),
            Prepared::Sparse(v) => VectorQuery::Sparse(v),
            Prepared::Empty => return Ok(Vec::new()),
        };
        let Some(ann) = plan.index.ann.as_ref() else {
            return Ok(Vec::new());
        };
        ann.search(
            &AnnRequest {
                rows: &view.data.rows,
                keys: &view.data.keys,
                field: &request.anns_field,
                query: vector_query,
                metric: plan.metric,
                allowed,
                band: plan.band,
                after,
                cancel: self.cancel,
                cancel_check_interval: self.config.cancel_check_interval,
            },
            k,
        )
    }

    fn materialize(&self, window: &[(usize, Hit)], output_fields: &[String]) -> Vec<SearchResult> {
        let mut out: Vec<Option<SearchResult>> = vec![None; window.len()];
        for (i, segment) in self.segments.iter().enumerate() {
            if !window.iter().any(|(s, _)| *s == i) {
                continue;
            }
            segment.with_view(|view| {
                for (slot, (s, hit)) in window.iter().enumerate() {
                    if *s != i {
                        continue;
                    }
                    let fields = view
                        .row(hit.doc)
                        .map(|row| project(row, output_fields))
                        .unwrap_or_default();
                    out[slot] = Some(SearchResult {
                        id: hit.key.clone(),
                        score: hit.score,
                        fields,
                    });
                }
            });
        }
        out.into_iter().flatten().collect()
    }
}

/// Requested fields of `row`.
pub(crate) fn project(row: &crate::types::Row, fields: &[String]) -> HashMap<String, FieldValue> {
    fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

pub(crate) fn check_window(limit: usize, offset: usize, max_topk: usize) -> Result<()> {
    if limit == 0 {
        return Err(FtsError::InvalidParameter("limit must be positive".into()));
    }
    match offset.checked_add(limit) {
        Some(total) if total <= max_topk => Ok(()),
        _ => Err(FtsError::InvalidParameter(format!(
            "offset + limit must not exceed {max_topk}, got offset {offset} and limit {limit}"
        ))),
    }
}

/// Expand `"*"` and check every name. Function outputs cannot be returned.
pub(crate) fn resolve_output_fields(schema: &ValidatedSchema, requested: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: &str, out: &mut Vec<String>| {
        if !out.iter().any(|f| f == name) {
            out.push(name.to_string());
        }
    };
    for name in requested {
        if name == "*" {
            for field in schema.row_fields() {
                push(&field.name, &mut out);
            }
            continue;
        }
        if schema.field(name).is_none() {
            return Err(FtsError::InvalidParameter(format!("output field {name} not found")));
        }
        if schema.is_function_output(name) {
            return Err(FtsError::InvalidParameter(format!(
                "output field {name} is produced by a function and cannot be returned"
            )));
        }
        push(name, &mut out);
    }
    Ok(out)
}

/// Inclusive band from `radius` and `range_filter`. A lone radius bounds
/// the worse side: a floor for similarities, a ceiling for distances.
fn score_band(radius: Option<f32>, range_filter: Option<f32>, order: ScoreOrder) -> Result<ScoreBand> {
    for v in [radius, range_filter].into_iter().flatten() {
        if !v.is_finite() {
            return Err(FtsError::InvalidParameter(format!("range bound {v} must be finite")));
        }
    }
    match (radius, range_filter) {
        (None, None) => Ok(ScoreBand::default()),
        (None, Some(_)) => Err(FtsError::InvalidParameter(
            "range_filter requires radius".into(),
        )),
        (Some(r), None) => Ok(match order {
            ScoreOrder::HigherIsBetter => ScoreBand {
                min: Some(r),
                max: None,
            },
            ScoreOrder::LowerIsBetter => ScoreBand {
                min: None,
                max: Some(r),
            },
        }),
        (Some(r), Some(f)) => Ok(ScoreBand {
            min: Some(r.min(f)),
            max: Some(r.max(f)),
        }),
    }
}
