//! Growing and sealed segments.
//!
//! A collection holds exactly one [`GrowingSegment`] accepting writes and
//! any number of [`SealedSegment`]s. Sealing freezes the growing
//! segment's rows, postings and statistics into a sealed copy that
//! shares the same tombstone bitmap, so document ordinals and deletes
//! carry over unchanged.
//!
//! Readers never look at a segment directly. They [`pin`](Segment::pin)
//! it first: a [`SegmentSnapshot`] records how many rows the segment held
//! and takes a private copy of its tombstones, so rows appended or
//! deleted afterwards stay invisible to that reader even though the
//! tombstone bitmap itself is shared with later sealed copies.

pub mod growing;
pub mod sealed;

use std::collections::HashMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::error::{FtsError, Result};
use crate::fts::inverted_index::InvertedIndex;
use crate::fts::stats::{CorpusStatistics, QueryStatistics};
use crate::fts::vectorizer::DocumentTerms;
use crate::schema::ValidatedSchema;
use crate::types::{DocId, FieldValue, PrimaryKey, Row};

pub use growing::GrowingSegment;
pub use sealed::SealedSegment;

pub type SegmentId = u64;

/// Postings and statistics of one BM25 output field within a segment.
#[derive(Debug, Clone, Default)]
pub struct Bm25Column {
    /// Term frequencies per document, by ordinal.
    pub terms: Vec<DocumentTerms>,
    pub index: InvertedIndex,
    pub stats: CorpusStatistics,
}

impl Bm25Column {
    fn append(&mut self, terms: &DocumentTerms) -> DocId {
        self.stats.add_document(terms);
        self.terms.push(terms.clone());
        self.index.append(terms)
    }

    /// Statistics for `terms` over the first `rows` documents.
    pub fn partial(&self, terms: &[u32], rows: u32) -> QueryStatistics {
        let mut partial = self.stats.partial(terms);
        for later in self.terms.iter().skip(rows as usize) {
            partial.remove_document(later);
        }
        partial
    }

    /// Rebuilt, compacted copy with frozen statistics.
    fn frozen(&self) -> Self {
        Self {
            terms: self.terms.clone(),
            index: InvertedIndex::build(&self.terms),
            stats: self.stats.clone(),
        }
    }
}

/// Row storage shared by both segment kinds.
#[derive(Debug, Clone, Default)]
pub struct SegmentData {
    pub rows: Vec<Row>,
    pub keys: Vec<PrimaryKey>,
    pub bm25: HashMap<String, Bm25Column>,
}

impl SegmentData {
    fn new<'a>(bm25_fields: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rows: Vec::new(),
            keys: Vec::new(),
            bm25: bm25_fields
                .into_iter()
                .map(|f| (f.to_string(), Bm25Column::default()))
                .collect(),
        }
    }

    fn push(&mut self, prepared: &PreparedRow) -> DocId {
        let doc = self.rows.len() as DocId;
        self.rows.push(prepared.row.clone());
        self.keys.push(prepared.key.clone());
        for (field, terms) in &prepared.terms {
            if let Some(column) = self.bm25.get_mut(field) {
                column.append(terms);
            }
        }
        doc
    }

    fn frozen(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            keys: self.keys.clone(),
            bm25: self
                .bm25
                .iter()
                .map(|(field, column)| (field.clone(), column.frozen()))
                .collect(),
        }
    }
}

/// A validated row with its BM25 terms already computed, ready to be
/// appended to a growing segment.
#[derive(Debug, Clone)]
pub struct PreparedRow {
    pub key: PrimaryKey,
    pub row: Row,
    /// (output field, terms) for every BM25 function.
    pub terms: Vec<(String, DocumentTerms)>,
}

impl PreparedRow {
    /// Validate `row` against `schema` and run every BM25 function over it.
    pub fn prepare(schema: &ValidatedSchema, row: Row) -> Result<Self> {
        let row = schema.validate_row(row)?;
        let key = schema.primary_key(&row)?;
        let mut terms = Vec::with_capacity(schema.functions().len());
        for function in schema.functions() {
            let text = match row.get(&function.input_field) {
                Some(FieldValue::String(s)) => s.as_str(),
                Some(other) => {
                    return Err(FtsError::SchemaTypeMismatch {
                        field: function.input_field.clone(),
                        expected: "VARCHAR".to_string(),
                        actual: other.kind().to_string(),
                    })
                }
                None => {
                    return Err(FtsError::MissingField {
                        field: function.input_field.clone(),
                    })
                }
            };
            let analyzer = schema
                .analyzers()
                .get(&function.input_field)
                .map(|a| a.resolve_for_row(&row))
                .ok_or_else(|| FtsError::InputNotTokenized {
                    function: function.name.clone(),
                    field: function.input_field.clone(),
                })?;
            let tokens = analyzer.analyze(text);
            terms.push((
                function.output_field.clone(),
                DocumentTerms::from_tokens(&tokens),
            ));
        }
        Ok(Self { key, row, terms })
    }
}

/// Read-only view of a pinned segment, valid while its locks are held.
///
/// `data` may hold rows appended after the pin. Only ordinals below
/// `rows` belong to the view.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    pub id: SegmentId,
    pub sealed: bool,
    pub data: &'a SegmentData,
    pub rows: u32,
    pub deleted: &'a RoaringBitmap,
}

impl<'a> SegmentView<'a> {
    pub fn len(&self) -> u32 {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Ordinals of rows that are not deleted.
    pub fn live(&self) -> RoaringBitmap {
        let mut live = RoaringBitmap::new();
        live.insert_range(0..self.len());
        live -= self.deleted;
        live
    }

    pub fn live_count(&self) -> u64 {
        self.live().len()
    }

    pub fn row(&self, doc: DocId) -> Option<&'a Row> {
        if doc >= self.rows {
            return None;
        }
        self.data.rows.get(doc as usize)
    }

    pub fn key(&self, doc: DocId) -> Option<&'a PrimaryKey> {
        if doc >= self.rows {
            return None;
        }
        self.data.keys.get(doc as usize)
    }

    pub fn column(&self, field: &str) -> Option<&'a Bm25Column> {
        self.data.bm25.get(field)
    }

    /// Statistics of `field` for `terms`, as of the pin.
    pub fn statistics(&self, field: &str, terms: &[u32]) -> Option<QueryStatistics> {
        self.column(field).map(|c| c.partial(terms, self.rows))
    }
}

/// Handle to a segment of either kind.
#[derive(Debug, Clone)]
pub enum Segment {
    Growing(Arc<GrowingSegment>),
    Sealed(Arc<SealedSegment>),
}

impl Segment {
    pub fn id(&self) -> SegmentId {
        match self {
            Segment::Growing(s) => s.id(),
            Segment::Sealed(s) => s.id(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Segment::Sealed(_))
    }

    /// Record the current row count and copy the tombstones.
    pub fn pin(&self) -> SegmentSnapshot {
        let (rows, deleted) = match self {
            Segment::Growing(s) => (s.len(), s.tombstones()),
            Segment::Sealed(s) => (s.len(), s.tombstones()),
        };
        SegmentSnapshot {
            segment: self.clone(),
            rows: rows as u32,
            deleted,
        }
    }

    /// Tombstone `doc`. Returns false if it was already deleted.
    pub fn delete(&self, doc: DocId) -> bool {
        match self {
            Segment::Growing(s) => s.delete(doc),
            Segment::Sealed(s) => s.delete(doc),
        }
    }
}

/// A segment as it stood when it was pinned.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    segment: Segment,
    rows: u32,
    deleted: RoaringBitmap,
}

impl SegmentSnapshot {
    pub fn id(&self) -> SegmentId {
        self.segment.id()
    }

    pub fn is_sealed(&self) -> bool {
        self.segment.is_sealed()
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&SegmentView<'_>) -> R) -> R {
        fn view<'a>(
            this: &'a SegmentSnapshot,
            data: &'a SegmentData,
            sealed: bool,
        ) -> SegmentView<'a> {
            SegmentView {
                id: this.segment.id(),
                sealed,
                data,
                rows: this.rows,
                deleted: &this.deleted,
            }
        }
        match &self.segment {
            Segment::Growing(s) => s.with_data(|data| f(&view(self, data, false))),
            Segment::Sealed(s) => f(&view(self, s.data(), true)),
        }
    }
}

/// The segments of one collection. Swapped under the collection's lock.
#[derive(Debug)]
pub struct SegmentSet {
    growing: Arc<GrowingSegment>,
    sealed: Vec<Arc<SealedSegment>>,
    next_id: SegmentId,
    bm25_fields: Vec<String>,
}

impl SegmentSet {
    pub fn new(bm25_fields: Vec<String>) -> Self {
        let growing = Arc::new(GrowingSegment::new(0, bm25_fields.iter().map(String::as_str)));
        Self {
            growing,
            sealed: Vec::new(),
            next_id: 1,
            bm25_fields,
        }
    }

    pub fn growing(&self) -> &Arc<GrowingSegment> {
        &self.growing
    }

    pub fn sealed(&self) -> &[Arc<SealedSegment>] {
        &self.sealed
    }

    /// Every segment, sealed first, growing last.
    pub fn segments(&self) -> Vec<Segment> {
        self.sealed
            .iter()
            .cloned()
            .map(Segment::Sealed)
            .chain(std::iter::once(Segment::Growing(self.growing.clone())))
            .collect()
    }

    /// Pin every segment. Callers must keep writers from publishing while
    /// this runs for the result to be one point in time.
    pub fn snapshot(&self) -> Vec<SegmentSnapshot> {
        self.segments().iter().map(Segment::pin).collect()
    }

    pub fn get(&self, id: SegmentId) -> Option<Segment> {
        if self.growing.id() == id {
            return Some(Segment::Growing(self.growing.clone()));
        }
        self.sealed
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .map(Segment::Sealed)
    }

    /// Seal the growing segment and open a fresh one. An empty growing
    /// segment is left in place and `None` is returned.
    pub fn seal_growing(&mut self) -> Result<Option<Arc<SealedSegment>>> {
        if self.growing.is_empty() {
            return Ok(None);
        }
        let sealed = Arc::new(self.growing.seal()?);
        let next = Arc::new(GrowingSegment::new(
            self.next_id,
            self.bm25_fields.iter().map(String::as_str),
        ));
        self.next_id += 1;
        self.growing = next;
        self.sealed.push(sealed.clone());
        Ok(Some(sealed))
    }
}
