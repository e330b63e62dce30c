use std::sync::Arc;

use paraq_error::Result;
use parking_lot::Mutex;

use super::cancel::MergedCancellation;
use super::scheduler::PartitionScheduler;
use crate::config::settings::QuerySettings;

/// Per-execution state handed to every operator while opening and
/// partitioning a query.
///
/// A new context is created each time a query is executed.
#[derive(Debug, Clone)]
pub struct QueryContext {
    degree_of_parallelism: usize,
    prefer_striping: bool,
    cancellation: MergedCancellation,
    /// Created on first use. Sequential executions never need it.
    scheduler: Arc<Mutex<Option<Arc<PartitionScheduler>>>>,
}

impl QueryContext {
    pub fn try_new(settings: &QuerySettings) -> Result<Self> {
        let degree_of_parallelism = settings.resolved_degree_of_parallelism()?;
        Ok(QueryContext {
            degree_of_parallelism,
            prefer_striping: settings.prefer_striping,
            cancellation: MergedCancellation::new(settings.cancellation_tokens().iter().cloned()),
            scheduler: Arc::new(Mutex::new(None)),
        })
    }

    /// Number of partitions every stream in this execution is split into.
    pub fn degree_of_parallelism(&self) -> usize {
        self.degree_of_parallelism
    }

    pub fn prefer_striping(&self) -> bool {
        self.prefer_striping
    }

    pub fn cancellation(&self) -> &MergedCancellation {
        &self.cancellation
    }

    pub fn scheduler(&self) -> Result<Arc<PartitionScheduler>> {
        let mut scheduler = self.scheduler.lock();
        if let Some(scheduler) = scheduler.as_ref() {
            return Ok(scheduler.clone());
        }
        let created = Arc::new(PartitionScheduler::try_new(self.degree_of_parallelism)?);
        *scheduler = Some(created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cancel::CancellationToken;

    #[test]
    fn scheduler_is_shared_across_clones() {
        let settings = QuerySettings::default().with_degree_of_parallelism(Some(3));
        let cx = QueryContext::try_new(&settings).unwrap();
        let cloned = cx.clone();

        let a = cx.scheduler().unwrap();
        let b = cloned.scheduler().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(3, a.num_threads());
    }

    #[test]
    fn picks_up_caller_tokens() {
        let token = CancellationToken::new();
        let settings = QuerySettings::default().with_cancellation(token.clone());
        let cx = QueryContext::try_new(&settings).unwrap();

        cx.cancellation().check().unwrap();
        token.cancel();
        assert!(cx.cancellation().check().is_err());
    }
}
