//! Batched iteration over a search.
//!
//! An iterator pins the collection's segments when it is opened and
//! fetches each batch against that snapshot, resuming strictly after the
//! (score, primary key) of the last result it returned. Batches therefore
//! concatenate to one ranking with no gaps or repeats, however many
//! results the search has in total.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::index::FieldIndex;
use crate::query::search::{SearchContext, SearchRequest, Window};
use crate::schema::ValidatedSchema;
use crate::segment::SegmentSnapshot;
use crate::types::{PrimaryKey, SearchResult};

/// Rank position just past the last result returned.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    pub score: f32,
    pub key: PrimaryKey,
}

/// What an open iterator reads: pinned segments plus the schema, index
/// and settings in effect when it was opened.
#[derive(Debug)]
pub struct IteratorSource {
    pub schema: Arc<ValidatedSchema>,
    pub indexes: HashMap<String, FieldIndex>,
    pub segments: Vec<SegmentSnapshot>,
    pub config: SearchConfig,
    pub cancel: Option<CancelToken>,
}

impl IteratorSource {
    fn context(&self) -> SearchContext<'_> {
        SearchContext {
            schema: &self.schema,
            indexes: &self.indexes,
            segments: &self.segments,
            config: &self.config,
            cancel: self.cancel.as_ref(),
        }
    }
}

/// Yields full batches in rank order, then one short (possibly empty)
/// batch, then only empty batches.
#[derive(Debug)]
pub struct SearchIterator {
    source: Option<IteratorSource>,
    request: SearchRequest,
    batch_size: usize,
    /// Results still allowed by the caller's limit.
    remaining: Option<usize>,
    /// Offset still to skip; applied to the first batch only.
    skip: usize,
    cursor: Option<PageCursor>,
}

impl SearchIterator {
    /// Validate `request` and open an iterator over `source`.
    pub fn open(
        source: IteratorSource,
        request: &SearchRequest,
        batch_size: usize,
        limit: Option<usize>,
    ) -> Result<Self> {
        source.context().validate_iterator(request, batch_size)?;
        Ok(Self {
            source: Some(source),
            request: request.clone(),
            batch_size,
            remaining: limit,
            skip: request.offset,
            cursor: None,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Next batch. A failed fetch closes the iterator.
    pub fn next_batch(&mut self) -> Result<Vec<SearchResult>> {
        let take = self
            .remaining
            .map_or(self.batch_size, |r| r.min(self.batch_size));
        let Some(source) = self.source.as_ref() else {
            return Ok(Vec::new());
        };
        if take == 0 {
            self.close();
            return Ok(Vec::new());
        }

        let fetched = source.context().page(
            &self.request,
            Window {
                offset: self.skip,
                limit: take,
                after: self.cursor.as_ref(),
            },
        );
        let batch = match fetched {
            Ok(batch) => batch,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        self.skip = 0;
        if let Some(last) = batch.last() {
            self.cursor = Some(PageCursor {
                score: last.score,
                key: last.id.clone(),
            });
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= batch.len();
        }
        if batch.len() < self.batch_size {
            self.close();
        }
        Ok(batch)
    }

    /// Release the snapshot. Every later batch is empty.
    pub fn close(&mut self) {
        self.source = None;
    }
}

impl Iterator for SearchIterator {
    type Item = Result<Vec<SearchResult>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(batch) if batch.is_empty() => None,
            other => Some(other),
        }
    }
}
