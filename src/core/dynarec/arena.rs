use crate::core::dynarec::BlockStep;

/// Append-only bump arena for compiled block bodies. Blocks are never
/// relocated or reclaimed within a session; invalidation merely unreferences
/// them from the cache, so a `BlockRef` handed out once stays valid for the
/// process lifetime.
pub struct CodeArena {
    steps: Vec<BlockStep>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    start: usize,
    len: usize,
}

impl CodeArena {
    pub fn new(capacity: usize) -> Self {
        CodeArena {
            steps: Vec::new(),
            capacity,
        }
    }

    pub fn alloc(&mut self, block: &[BlockStep]) -> BlockRef {
        if self.steps.len() + block.len() > self.capacity {
            panic!(
                "code arena exhausted: {} steps used of {}",
                self.steps.len(),
                self.capacity
            );
        }
        let start = self.steps.len();
        self.steps.extend_from_slice(block);
        BlockRef {
            start,
            len: block.len(),
        }
    }

    pub fn block(&self, r: BlockRef) -> &[BlockStep] {
        &self.steps[r.start..r.start + r.len]
    }

    /// Monotonic allocation cursor.
    pub fn used(&self) -> usize {
        self.steps.len()
    }
}
