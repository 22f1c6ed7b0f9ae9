use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::segment::{SegmentData, SegmentId};
use crate::types::DocId;

/// Immutable segment. Only its tombstones change after sealing.
#[derive(Debug)]
pub struct SealedSegment {
    id: SegmentId,
    data: SegmentData,
    deleted: Arc<RwLock<RoaringBitmap>>,
}

impl SealedSegment {
    pub(crate) fn new(id: SegmentId, data: SegmentData, deleted: Arc<RwLock<RoaringBitmap>>) -> Self {
        Self { id, data, deleted }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.rows.is_empty()
    }

    pub fn delete(&self, doc: DocId) -> bool {
        if doc as usize >= self.data.rows.len() {
            return false;
        }
        self.deleted.write().insert(doc)
    }

    pub fn tombstones(&self) -> RoaringBitmap {
        self.deleted.read().clone()
    }

    pub(crate) fn data(&self) -> &SegmentData {
        &self.data
    }
}
