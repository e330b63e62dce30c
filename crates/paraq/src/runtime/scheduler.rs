use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use paraq_error::{DbError, ErrorKind, OptionExt, Result, ResultExt};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use super::cancel::MergedCancellation;

/// Runs partitions of a query, one task per partition.
///
/// The pool has exactly as many threads as the degree of parallelism.
/// Partitions may block waiting on each other (barriers in Take, First,
/// etc), so every partition must be running at the same time for a query to
/// make progress.
pub struct PartitionScheduler {
    pool: ThreadPool,
}

impl fmt::Debug for PartitionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionScheduler")
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl PartitionScheduler {
    pub fn try_new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .thread_name(|idx| format!("paraq_partition_{idx}"))
            .num_threads(num_threads)
            .build()
            .context("Failed to build partition thread pool")?;

        debug!(num_threads, "created partition scheduler");

        Ok(PartitionScheduler { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` once per input, each on its own thread, waiting for all of them
    /// to complete.
    ///
    /// Outputs are returned in input order. The first error (including a
    /// panic in user code) trips the internal cancellation so the remaining
    /// partitions stop early, and is what gets returned.
    pub fn run_partitions<I, O, F>(
        &self,
        inputs: Vec<I>,
        cancellation: &MergedCancellation,
        f: F,
    ) -> Result<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> Result<O> + Sync,
    {
        if inputs.len() > self.num_threads() {
            return Err(DbError::internal("More partitions than scheduler threads")
                .with_field("partitions", inputs.len())
                .with_field("threads", self.num_threads()));
        }

        let errors = ErrorSink::default();
        let outputs: Vec<Mutex<Option<O>>> = inputs.iter().map(|_| Mutex::new(None)).collect();

        self.pool.scope(|scope| {
            for (partition, input) in inputs.into_iter().enumerate() {
                let f = &f;
                let errors = &errors;
                let outputs = &outputs;

                scope.spawn(move |_| {
                    trace!(partition, "partition task started");
                    let result = panic::catch_unwind(AssertUnwindSafe(|| f(partition, input)))
                        .unwrap_or_else(|payload| {
                            Err(panic_error(payload).with_field("partition", partition))
                        });

                    match result {
                        Ok(output) => *outputs[partition].lock() = Some(output),
                        Err(e) => {
                            trace!(partition, %e, "partition task failed");
                            errors.set_error(e);
                            cancellation.cancel_internal();
                        }
                    }
                });
            }
        });

        if let Some(error) = errors.take_error() {
            return Err(error);
        }

        outputs
            .into_iter()
            .map(|output| output.into_inner().required("partition output"))
            .collect()
    }
}

/// Holds the error to report for a set of partitions.
#[derive(Debug, Default)]
struct ErrorSink {
    error: Mutex<Option<DbError>>,
}

impl ErrorSink {
    /// Keeps the first error. A real failure replaces a cancellation since
    /// peers get canceled as a consequence of the failure.
    fn set_error(&self, error: DbError) {
        let mut current = self.error.lock();
        match current.as_ref() {
            None => *current = Some(error),
            Some(existing) if existing.is_canceled() && !error.is_canceled() => {
                *current = Some(error)
            }
            Some(_) => (),
        }
    }

    fn take_error(&self) -> Option<DbError> {
        self.error.lock().take()
    }
}

/// Run `f` on the calling thread, converting a panic into a user code error.
pub(crate) fn catch_user_panic<O>(f: impl FnOnce() -> Result<O>) -> Result<O> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_error(payload)))
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> DbError {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    DbError::with_kind(ErrorKind::UserCode, format!("User code panicked: {msg}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::countdown::CountdownEvent;

    #[test]
    fn outputs_in_partition_order() {
        let scheduler = PartitionScheduler::try_new(4).unwrap();
        let cancel = MergedCancellation::new([]);

        let out = scheduler
            .run_partitions(vec![1, 2, 3, 4], &cancel, |p, v| Ok((p, v * 10)))
            .unwrap();

        assert_eq!(vec![(0, 10), (1, 20), (2, 30), (3, 40)], out);
    }

    #[test]
    fn partitions_run_concurrently() {
        // Each partition waits for all others. Only completes if every
        // partition has its own thread.
        let scheduler = PartitionScheduler::try_new(3).unwrap();
        let cancel = MergedCancellation::new([]);
        let event = Arc::new(CountdownEvent::new(3));

        let out = scheduler
            .run_partitions(vec![(); 3], &cancel, |_, _| {
                event.signal();
                event.wait(&cancel)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(3, out.len());
    }

    #[test]
    fn panic_becomes_user_code_error() {
        let scheduler = PartitionScheduler::try_new(2).unwrap();
        let cancel = MergedCancellation::new([]);

        let err = scheduler
            .run_partitions(vec![0, 1], &cancel, |_, v| {
                if v == 1 {
                    panic!("bad delegate");
                }
                Ok(v)
            })
            .unwrap_err();

        assert_eq!(ErrorKind::UserCode, err.kind());
        assert!(err.get_msg().contains("bad delegate"));
        assert!(cancel.is_canceled());
    }

    #[test]
    fn failure_wins_over_induced_cancellation() {
        let scheduler = PartitionScheduler::try_new(2).unwrap();
        let cancel = MergedCancellation::new([]);
        let event = Arc::new(CountdownEvent::new(1));

        let err = scheduler
            .run_partitions(vec![0, 1], &cancel, |p, _| {
                if p == 0 {
                    return Err(DbError::new("partition failed"));
                }
                // Never signaled, only released by cancellation.
                event.wait(&cancel)?;
                Ok(())
            })
            .unwrap_err();

        assert_eq!("partition failed", err.get_msg());
    }

    #[test]
    fn panic_on_calling_thread_becomes_user_code_error() {
        let err = catch_user_panic(|| -> Result<()> { panic!("bad key selector") }).unwrap_err();
        assert_eq!(ErrorKind::UserCode, err.kind());
        assert!(err.get_msg().contains("bad key selector"));

        assert_eq!(3, catch_user_panic(|| Ok(3)).unwrap());
    }

    #[test]
    fn too_many_partitions() {
        let scheduler = PartitionScheduler::try_new(1).unwrap();
        let cancel = MergedCancellation::new([]);
        let err = scheduler
            .run_partitions(vec![1, 2], &cancel, |_, v| Ok(v))
            .unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
    }
}
