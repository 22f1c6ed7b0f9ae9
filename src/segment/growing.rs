use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;
use tracing::debug;

use crate::error::{FtsError, Result};
use crate::segment::{PreparedRow, SealedSegment, SegmentData, SegmentId};
use crate::types::DocId;

#[derive(Debug)]
struct GrowingState {
    data: SegmentData,
    sealed: bool,
}

/// The mutable segment. Appends and statistics updates happen under one
/// write lock, so a reader never sees a half-applied batch.
#[derive(Debug)]
pub struct GrowingSegment {
    id: SegmentId,
    state: RwLock<GrowingState>,
    deleted: Arc<RwLock<RoaringBitmap>>,
}

impl GrowingSegment {
    pub fn new<'a>(id: SegmentId, bm25_fields: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            id,
            state: RwLock::new(GrowingState {
                data: SegmentData::new(bm25_fields),
                sealed: false,
            }),
            deleted: Arc::new(RwLock::new(RoaringBitmap::new())),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.state.read().data.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.state.read().sealed
    }

    /// Append a batch atomically. Fails with `SegmentSealing`, leaving the
    /// segment untouched, once the segment has been sealed.
    pub fn insert_batch(&self, batch: &[PreparedRow]) -> Result<Vec<DocId>> {
        let mut state = self.state.write();
        if state.sealed {
            return Err(FtsError::SegmentSealing {
                segment_id: self.id,
            });
        }
        Ok(batch.iter().map(|row| state.data.push(row)).collect())
    }

    pub fn delete(&self, doc: DocId) -> bool {
        self.deleted.write().insert(doc)
    }

    pub fn tombstones(&self) -> RoaringBitmap {
        self.deleted.read().clone()
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&SegmentData) -> R) -> R {
        f(&self.state.read().data)
    }

    /// Freeze into a sealed copy. Later inserts fail; the current contents
    /// stay readable for queries still holding this segment.
    pub fn seal(&self) -> Result<SealedSegment> {
        let mut state = self.state.write();
        if state.sealed {
            return Err(FtsError::SegmentSealing {
                segment_id: self.id,
            });
        }
        state.sealed = true;
        debug!(segment_id = self.id, rows = state.data.rows.len(), "freezing growing segment");
        Ok(SealedSegment::new(
            self.id,
            state.data.frozen(),
            self.deleted.clone(),
        ))
    }
}
