use paraq_error::Result;
use tracing::trace;

use super::partition_for_hash;
use crate::Element;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, BufferedEnumerator, PartitionedStream};

/// Redistribute a stream so that elements with equal hashes land in the same
/// output partition.
///
/// Every input partition is drained on the scheduler, bucketing its elements
/// by `hash(element) % partitions`. Output partition `p` then holds bucket
/// `p` from every input partition, in input partition order. This is a
/// pipeline breaker: all input has been consumed by the time this returns.
///
/// When `preserve_order` is set, elements keep their order keys and the
/// input's comparer. Otherwise keys are dropped.
pub fn hash_repartition<T, H>(
    input: PartitionedStream<T>,
    hash: H,
    preserve_order: bool,
    cx: &QueryContext,
) -> Result<PartitionedStream<T>>
where
    T: Element,
    H: Fn(&T) -> u64 + Sync,
{
    let (partitions, comparer, _) = input.into_parts();
    let num_partitions = partitions.len();

    let scheduler = cx.scheduler()?;
    let buckets_per_input =
        scheduler.run_partitions(partitions, cx.cancellation(), |partition, mut source| {
            let mut poller = cx.cancellation().poller();
            let mut buckets: Vec<Vec<(T, OrderKey)>> =
                (0..num_partitions).map(|_| Vec::new()).collect();

            while let Some((element, key)) = source.move_next()? {
                poller.tick()?;
                let output = partition_for_hash(hash(&element), num_partitions);
                let key = if preserve_order { key } else { OrderKey::None };
                buckets[output].push((element, key));
            }

            trace!(
                partition,
                sizes = ?buckets.iter().map(Vec::len).collect::<Vec<_>>(),
                "bucketed input partition"
            );

            Ok(buckets)
        })?;

    let mut outputs: Vec<Vec<(T, OrderKey)>> = (0..num_partitions).map(|_| Vec::new()).collect();
    for buckets in buckets_per_input {
        for (output, bucket) in buckets.into_iter().enumerate() {
            outputs[output].extend(bucket);
        }
    }

    let partitions = outputs
        .into_iter()
        .map(|items| Box::new(BufferedEnumerator::new(items)) as BoxedEnumerator<T>)
        .collect();

    let comparer = if preserve_order {
        comparer
    } else {
        KeyComparer::Natural
    };

    PartitionedStream::try_new(partitions, comparer, OrdinalIndexState::Shuffled)
}
