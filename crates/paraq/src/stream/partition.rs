//! Splitting sources into partitions.

use std::collections::VecDeque;
use std::sync::Arc;

use paraq_error::Result;
use parking_lot::Mutex;

use super::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::Element;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::IndexedResults;
use crate::runtime::context::QueryContext;

/// Number of consecutive elements in one stripe when striping.
pub const STRIPE_SIZE: usize = 16;

/// Largest chunk grabbed from a shared iterator at once.
pub const MAX_CHUNK_SIZE: usize = 512;

/// Partition random access results into one stream per degree of
/// parallelism.
///
/// Uses contiguous ranges unless the context prefers striping. Keys are the
/// element indices.
pub fn partition_indexed<T: Element>(
    results: Arc<dyn IndexedResults<T>>,
    cx: &QueryContext,
) -> Result<PartitionedStream<T>> {
    let partitions = cx.degree_of_parallelism();
    let len = results.len();

    let enumerators: Vec<BoxedEnumerator<T>> = if cx.prefer_striping() {
        (0..partitions)
            .map(|partition| {
                Box::new(StripedEnumerator::new(results.clone(), partition, partitions)) as _
            })
            .collect()
    } else {
        (0..partitions)
            .map(|partition| {
                let (start, end) = range_for_partition(len, partition, partitions);
                Box::new(RangeEnumerator {
                    results: results.clone(),
                    next: start,
                    end,
                }) as _
            })
            .collect()
    };

    PartitionedStream::try_new(enumerators, KeyComparer::Natural, OrdinalIndexState::Indexible)
}

/// Compute the half open range of indices handled by a partition.
///
/// Ranges are contiguous and sized as evenly as possible, with earlier
/// partitions getting the remainder.
pub fn range_for_partition(len: usize, partition: usize, partitions: usize) -> (usize, usize) {
    let base = len / partitions;
    let rem = len % partitions;
    let start = partition * base + partition.min(rem);
    let size = base + usize::from(partition < rem);
    (start, start + size)
}

struct RangeEnumerator<T> {
    results: Arc<dyn IndexedResults<T>>,
    next: usize,
    end: usize,
}

impl<T: Element> QueryOperatorEnumerator<T> for RangeEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.next >= self.end {
            return Ok(None);
        }
        let idx = self.next;
        self.next += 1;
        Ok(Some((self.results.get(idx), OrderKey::Index(idx))))
    }
}

/// Hands out stripes `partition`, `partition + step`, ... of `STRIPE_SIZE`
/// elements each.
struct StripedEnumerator<T> {
    results: Arc<dyn IndexedResults<T>>,
    len: usize,
    stripe: usize,
    step: usize,
    next: usize,
    stripe_end: usize,
}

impl<T> StripedEnumerator<T> {
    fn new(results: Arc<dyn IndexedResults<T>>, partition: usize, partitions: usize) -> Self {
        let len = results.len();
        let next = partition.saturating_mul(STRIPE_SIZE);
        StripedEnumerator {
            results,
            len,
            stripe: partition,
            step: partitions,
            next,
            stripe_end: next.saturating_add(STRIPE_SIZE).min(len),
        }
    }
}

impl<T: Element> QueryOperatorEnumerator<T> for StripedEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.next >= self.stripe_end {
            if self.next >= self.len {
                return Ok(None);
            }
            self.stripe += self.step;
            self.next = self.stripe.saturating_mul(STRIPE_SIZE);
            if self.next >= self.len {
                return Ok(None);
            }
            self.stripe_end = self.next.saturating_add(STRIPE_SIZE).min(self.len);
        }
        let idx = self.next;
        self.next += 1;
        Ok(Some((self.results.get(idx), OrderKey::Index(idx))))
    }
}

/// Partition a source iterator by having partitions grab chunks of elements
/// from a shared cursor.
///
/// Chunks start small and double up to `MAX_CHUNK_SIZE`, so short sources
/// still spread across partitions. Keys are the element's position in the
/// source.
pub fn partition_chunked<I>(iter: I, cx: &QueryContext) -> Result<PartitionedStream<I::Item>>
where
    I: Iterator + Send + 'static,
    I::Item: Element,
{
    let cursor = Arc::new(Mutex::new(ChunkCursor {
        iter,
        next_index: 0,
        exhausted: false,
    }));

    let enumerators = (0..cx.degree_of_parallelism())
        .map(|_| {
            Box::new(ChunkEnumerator {
                cursor: cursor.clone(),
                chunk: VecDeque::new(),
                chunk_size: 1,
            }) as BoxedEnumerator<I::Item>
        })
        .collect();

    PartitionedStream::try_new(enumerators, KeyComparer::Natural, OrdinalIndexState::Correct)
}

struct ChunkCursor<I> {
    iter: I,
    next_index: usize,
    exhausted: bool,
}

struct ChunkEnumerator<I: Iterator> {
    cursor: Arc<Mutex<ChunkCursor<I>>>,
    chunk: VecDeque<(I::Item, usize)>,
    chunk_size: usize,
}

impl<I> ChunkEnumerator<I>
where
    I: Iterator,
{
    fn fill_chunk(&mut self) {
        let mut cursor = self.cursor.lock();
        if cursor.exhausted {
            return;
        }
        for _ in 0..self.chunk_size {
            match cursor.iter.next() {
                Some(item) => {
                    let idx = cursor.next_index;
                    cursor.next_index += 1;
                    self.chunk.push_back((item, idx));
                }
                None => {
                    cursor.exhausted = true;
                    break;
                }
            }
        }
        self.chunk_size = (self.chunk_size * 2).min(MAX_CHUNK_SIZE);
    }
}

impl<I> QueryOperatorEnumerator<I::Item> for ChunkEnumerator<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    fn move_next(&mut self) -> Result<Option<(I::Item, OrderKey)>> {
        if self.chunk.is_empty() {
            self.fill_chunk();
        }
        Ok(self
            .chunk
            .pop_front()
            .map(|(item, idx)| (item, OrderKey::Index(idx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::source::ListSource;
    use crate::testutil::{drain_stream, test_context};

    #[test]
    fn ranges_cover_everything() {
        assert_eq!((0, 3), range_for_partition(6, 0, 2));
        assert_eq!((3, 6), range_for_partition(6, 1, 2));

        // 10 / 4 => 3, 3, 2, 2
        assert_eq!((0, 3), range_for_partition(10, 0, 4));
        assert_eq!((3, 6), range_for_partition(10, 1, 4));
        assert_eq!((6, 8), range_for_partition(10, 2, 4));
        assert_eq!((8, 10), range_for_partition(10, 3, 4));

        assert_eq!((0, 0), range_for_partition(0, 2, 4));
    }

    #[test]
    fn range_partitions_have_index_keys() {
        let cx = test_context(2, false);
        let source = Arc::new(ListSource::new(vec![5, 3, 8, 1, 9, 2]));
        let stream = partition_indexed(source, &cx).unwrap();

        assert_eq!(OrdinalIndexState::Indexible, stream.ordinal_index_state());
        let parts = drain_stream(stream);
        assert_eq!(
            vec![
                vec![(5, OrderKey::Index(0)), (3, OrderKey::Index(1)), (8, OrderKey::Index(2))],
                vec![(1, OrderKey::Index(3)), (9, OrderKey::Index(4)), (2, OrderKey::Index(5))],
            ],
            parts
        );
    }

    #[test]
    fn striped_partitions_interleave() {
        let cx = test_context(2, true);
        let source = Arc::new(ListSource::new((0..40).collect::<Vec<usize>>()));
        let parts = drain_stream(partition_indexed(source, &cx).unwrap());

        let first: Vec<_> = parts[0].iter().map(|(v, _)| *v).collect();
        let second: Vec<_> = parts[1].iter().map(|(v, _)| *v).collect();

        let expected_first: Vec<usize> = (0..16).chain(32..40).collect();
        let expected_second: Vec<usize> = (16..32).collect();
        assert_eq!(expected_first, first);
        assert_eq!(expected_second, second);
    }

    #[test]
    fn striped_more_partitions_than_stripes() {
        let cx = test_context(4, true);
        let source = Arc::new(ListSource::new(vec![1, 2, 3]));
        let parts = drain_stream(partition_indexed(source, &cx).unwrap());
        assert_eq!(3, parts[0].len());
        assert!(parts[1..].iter().all(|p| p.is_empty()));
    }

    #[test]
    fn chunked_keys_are_positions() {
        let cx = test_context(3, false);
        let stream = partition_chunked((0..100).map(|v| v * 2), &cx).unwrap();
        assert_eq!(OrdinalIndexState::Correct, stream.ordinal_index_state());

        let mut all: Vec<_> = drain_stream(stream).into_iter().flatten().collect();
        all.sort_by_key(|(_, key)| key.as_index());
        for (idx, (value, key)) in all.into_iter().enumerate() {
            assert_eq!(OrderKey::Index(idx), key);
            assert_eq!(idx * 2, value);
        }
    }
}
