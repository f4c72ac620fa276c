//! Partition-aware FIFO used for every operator's input and output.
//!
//! One queue is shared (via `Arc`) between the producing operator, which
//! appends to it from the driver thread, and its consumer: either the
//! downstream operator (driver thread) or, for the terminal operator, the
//! caller's output threads, typically one per partition.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use sluice_core::Bundle;

/// Queued bundles keyed by partition tag; `None` holds untagged bundles.
/// Keys are never indices, so any tag is accepted.
#[derive(Debug, Default)]
struct Inner {
    slots: IndexMap<Option<usize>, VecDeque<(u64, Bundle)>>,
    next_seq: u64,
    len: usize,
    memory_usage: u64,
    num_blocks: usize,
}

impl Inner {
    /// Slot whose front bundle is the oldest across all slots.
    fn oldest_slot(&self) -> Option<Option<usize>> {
        self.slots
            .iter()
            .filter_map(|(key, slot)| slot.front().map(|(seq, _)| (*seq, *key)))
            .min()
            .map(|(_, key)| key)
    }

    fn take_front(&mut self, key: Option<usize>) -> Option<Bundle> {
        let (_, bundle) = self.slots.get_mut(&key)?.pop_front()?;
        self.len -= 1;
        self.memory_usage -= bundle.size_bytes();
        self.num_blocks -= bundle.num_blocks();
        Some(bundle)
    }
}

/// Thread-safe, insertion-ordered, multi-partition bundle queue.
///
/// Global order across partitions is insertion order; per-partition order
/// is preserved too and can be consumed independently with
/// [`pop`](Self::pop)`(Some(p))`.
#[derive(Debug, Default)]
pub struct OpBufferQueue {
    inner: Mutex<Inner>,
}

impl OpBufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue with slots pre-allocated for `num_partitions` tagged partitions.
    pub fn with_partitions(num_partitions: usize) -> Self {
        let slots = std::iter::once(None)
            .chain((0..num_partitions).map(Some))
            .map(|key| (key, VecDeque::new()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                slots,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, bundle: Bundle) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.len += 1;
        inner.memory_usage += bundle.size_bytes();
        inner.num_blocks += bundle.num_blocks();
        inner
            .slots
            .entry(bundle.partition())
            .or_default()
            .push_back((seq, bundle));
    }

    /// Whether a bundle tagged `partition` is queued. `None` asks whether
    /// any bundle is queued at all.
    pub fn has_next(&self, partition: Option<usize>) -> bool {
        let inner = self.lock();
        match partition {
            None => inner.len > 0,
            Some(p) => inner
                .slots
                .get(&Some(p))
                .is_some_and(|slot| !slot.is_empty()),
        }
    }

    /// Remove the oldest bundle tagged `partition` (or the oldest bundle
    /// overall for `None`).
    pub fn pop(&self, partition: Option<usize>) -> Option<Bundle> {
        let mut inner = self.lock();
        let key = match partition {
            None => inner.oldest_slot()?,
            Some(p) => Some(p),
        };
        inner.take_front(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by queued bundles.
    pub fn memory_usage(&self) -> u64 {
        self.lock().memory_usage
    }

    pub fn num_blocks(&self) -> usize {
        self.lock().num_blocks
    }

    /// Drop every queued bundle.
    pub fn clear(&self) {
        let mut inner = self.lock();
        for slot in inner.slots.values_mut() {
            slot.clear();
        }
        inner.len = 0;
        inner.memory_usage = 0;
        inner.num_blocks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;
    use sluice_core::make_bundles;

    fn bundle(x: i64) -> Bundle {
        Bundle::from_rows(vec![json!(x)])
    }

    fn value(b: &Bundle) -> i64 {
        b.rows().next().and_then(|v| v.as_i64()).unwrap()
    }

    #[test]
    fn fifo_without_partitions() {
        let q = OpBufferQueue::new();
        assert!(q.is_empty());
        assert!(!q.has_next(None));
        assert!(q.pop(None).is_none());

        for i in 0..3 {
            q.append(bundle(i));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.num_blocks(), 3);
        assert!(q.has_next(None));
        assert_eq!(value(&q.pop(None).unwrap()), 0);
        assert_eq!(value(&q.pop(None).unwrap()), 1);
        assert_eq!(value(&q.pop(None).unwrap()), 2);
        assert!(q.is_empty());
        assert_eq!(q.memory_usage(), 0);
    }

    #[test]
    fn global_order_spans_partitions() {
        let q = OpBufferQueue::new();
        q.append(bundle(0).with_partition(1));
        q.append(bundle(1));
        q.append(bundle(2).with_partition(0));
        q.append(bundle(3).with_partition(1));

        assert!(q.has_next(Some(1)));
        assert!(!q.has_next(Some(5)));
        assert_eq!(value(&q.pop(Some(1)).unwrap()), 0);
        assert_eq!(value(&q.pop(None).unwrap()), 1);
        assert_eq!(value(&q.pop(None).unwrap()), 2);
        assert!(q.pop(Some(0)).is_none());
        assert_eq!(value(&q.pop(Some(1)).unwrap()), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn tracks_memory_usage() {
        let q = OpBufferQueue::with_partitions(2);
        let b = bundle(12345);
        let size = b.size_bytes();
        q.append(b.clone());
        q.append(b);
        assert_eq!(q.memory_usage(), 2 * size);
        q.pop(None);
        assert_eq!(q.memory_usage(), size);
        q.clear();
        assert_eq!(q.memory_usage(), 0);
        assert_eq!(q.len(), 0);
        assert!(!q.has_next(None));
    }

    #[test]
    fn concurrent_pop_per_partition() {
        const NUM_BUNDLES: usize = 5_000;
        const NUM_SPLITS: usize = 8;
        let num_per_split = NUM_BUNDLES / NUM_SPLITS;

        let queue = Arc::new(OpBufferQueue::new());
        let bundles = make_bundles((0..NUM_BUNDLES as i64).map(|i| vec![json!(i)]).collect());
        for (i, b) in bundles.into_iter().enumerate() {
            queue.append(b.with_partition(i % NUM_SPLITS));
        }

        let handles: Vec<_> = (0..NUM_SPLITS)
            .map(|split| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while queue.has_next(Some(split)) {
                        let b = queue.pop(Some(split)).expect("has_next promised a bundle");
                        assert_eq!(b.partition(), Some(split));
                        seen.push(value(&b));
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let seen = handle.join().unwrap();
            assert_eq!(seen.len(), num_per_split);
            // Per-partition order is insertion order.
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            for v in seen {
                assert!(all.insert(v), "bundle {v} popped twice");
            }
        }
        assert_eq!(all.len(), NUM_BUNDLES);
        assert!(queue.is_empty());
    }

    #[test]
    fn accepts_any_partition_tag() {
        let q = OpBufferQueue::with_partitions(2);
        q.append(bundle(0).with_partition(usize::MAX));
        q.append(bundle(1).with_partition(1 << 33));
        q.append(bundle(2));

        assert!(q.has_next(Some(usize::MAX)));
        assert!(!q.has_next(Some(usize::MAX - 1)));
        assert!(q.pop(Some(7)).is_none());
        assert_eq!(value(&q.pop(Some(1 << 33)).unwrap()), 1);
        assert_eq!(value(&q.pop(None).unwrap()), 0);
        assert_eq!(value(&q.pop(None).unwrap()), 2);
        assert!(!q.has_next(Some(usize::MAX)));
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_pop_same_partition_never_duplicates() {
        let queue = Arc::new(OpBufferQueue::new());
        for i in 0..2_000 {
            queue.append(bundle(i).with_partition(0));
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(b) = queue.pop(Some(0)) {
                        seen.push(value(&b));
                    }
                    seen
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for v in handle.join().unwrap() {
                assert!(all.insert(v), "bundle {v} popped twice");
            }
        }
        assert_eq!(all.len(), 2_000);
    }
}
