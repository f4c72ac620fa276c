use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

static NEXT_BUNDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId(pub u64);

impl BundleId {
    fn next() -> Self {
        Self(NEXT_BUNDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bundle-{}", self.0)
    }
}

/// A block of rows. The engine never looks inside rows; it only needs
/// their count and an estimate of their size.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    rows: Vec<Value>,
    size_bytes: u64,
}

impl Block {
    pub fn new(rows: Vec<Value>) -> Self {
        let size_bytes = rows.iter().map(estimate_row_size).sum();
        Self { rows, size_bytes }
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Value> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Estimated in-memory footprint (JSON-encoded length of the rows).
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

fn estimate_row_size(row: &Value) -> u64 {
    serde_json::to_vec(row).map(|v| v.len() as u64).unwrap_or(0)
}

/// One batch of data moving between operators.
///
/// Bundles are immutable: cloning one duplicates the reference to the
/// underlying blocks, never the rows themselves.
#[derive(Debug, Clone)]
pub struct Bundle {
    id: BundleId,
    blocks: Arc<[Block]>,
    partition: Option<usize>,
    num_rows: usize,
    size_bytes: u64,
}

impl Bundle {
    pub fn new(blocks: Vec<Block>) -> Self {
        let num_rows = blocks.iter().map(Block::num_rows).sum();
        let size_bytes = blocks.iter().map(Block::size_bytes).sum();
        Self {
            id: BundleId::next(),
            blocks: blocks.into(),
            partition: None,
            num_rows,
            size_bytes,
        }
    }

    /// Single-block bundle built from rows.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        Self::new(vec![Block::new(rows)])
    }

    /// Returns a copy tagged with `partition`, sharing the same blocks.
    pub fn with_partition(&self, partition: usize) -> Self {
        Self {
            id: self.id,
            blocks: Arc::clone(&self.blocks),
            partition: Some(partition),
            num_rows: self.num_rows,
            size_bytes: self.size_bytes,
        }
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn partition(&self) -> Option<usize> {
        self.partition
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Iterate over every row of every block, in order.
    pub fn rows(&self) -> impl Iterator<Item = &Value> {
        self.blocks.iter().flat_map(|b| b.rows().iter())
    }

    /// Whether two bundles share the same underlying blocks.
    pub fn shares_blocks(&self, other: &Bundle) -> bool {
        Arc::ptr_eq(&self.blocks, &other.blocks)
    }
}

/// Build one single-block bundle per row list.
pub fn make_bundles(row_lists: Vec<Vec<Value>>) -> Vec<Bundle> {
    row_lists.into_iter().map(Bundle::from_rows).collect()
}
