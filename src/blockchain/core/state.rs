use super::block::Block;
use parking_lot::RwLock;
use std::sync::Arc;

/// The last-block pointer. Height is read off the pointed-to block, so the
/// pair can never be observed out of step.
#[derive(Debug, Default)]
pub struct TipState {
    last: RwLock<Option<Arc<Block>>>,
}

impl TipState {
    pub fn new(last: Option<Block>) -> Self {
        TipState {
            last: RwLock::new(last.map(Arc::new)),
        }
    }

    pub fn last_block(&self) -> Option<Arc<Block>> {
        self.last.read().clone()
    }

    pub fn height(&self) -> Option<u64> {
        self.last.read().as_ref().map(|block| block.height())
    }

    pub fn last_block_timestamp(&self) -> Option<i64> {
        self.last.read().as_ref().map(|block| block.timestamp())
    }

    pub fn last_block_id(&self) -> Option<u64> {
        self.last.read().as_ref().map(|block| block.id)
    }

    pub(crate) fn replace(&self, block: Option<Arc<Block>>) {
        *self.last.write() = block;
    }
}
