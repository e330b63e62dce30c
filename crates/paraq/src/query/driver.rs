//! Executes an operator tree.

use std::sync::Arc;

use paraq_error::Result;
use tracing::debug;

use super::QueryOperator;
use crate::Element;
use crate::config::settings::{ExecutionMode, QuerySettings};
use crate::runtime::context::QueryContext;
use crate::runtime::scheduler::catch_user_panic;
use crate::stream::merge::execute_and_collect;

/// Execute the query rooted at `root` to completion.
///
/// Every call creates a fresh context, so a query may be executed any number
/// of times. A panic in a user delegate is returned as a user code error
/// regardless of execution mode, and a query canceled before completion never
/// returns its results.
pub fn execute<T: Element>(root: &Arc<dyn QueryOperator<T>>, settings: &QuerySettings) -> Result<Vec<T>> {
    let cx = QueryContext::try_new(settings)?;
    cx.cancellation().check()?;

    let out = catch_user_panic(|| {
        if should_run_sequential(root.as_ref(), settings.execution_mode) {
            debug!(mode = %settings.execution_mode, "executing query sequentially");
            return collect_sequential(root.as_ref(), &cx);
        }
        collect_parallel(root, &cx)
    })?;

    cx.cancellation().check()?;
    Ok(out)
}

fn collect_parallel<T: Element>(root: &Arc<dyn QueryOperator<T>>, cx: &QueryContext) -> Result<Vec<T>> {
    let preserve_order = root.output_ordered();
    debug!(
        degree_of_parallelism = cx.degree_of_parallelism(),
        state = %root.ordinal_index_state(),
        preserve_order,
        "executing query"
    );

    let results = root.clone().open(cx)?;
    let stream = results.give_partitioned_stream(cx)?;
    execute_and_collect(stream, cx, preserve_order)
}

fn should_run_sequential<T: Element>(root: &dyn QueryOperator<T>, mode: ExecutionMode) -> bool {
    match mode {
        ExecutionMode::ForceSequential => true,
        ExecutionMode::ForceParallelism => false,
        ExecutionMode::Default => root.limits_parallelism(),
    }
}

fn collect_sequential<T: Element>(root: &dyn QueryOperator<T>, cx: &QueryContext) -> Result<Vec<T>> {
    let mut poller = cx.cancellation().poller();
    let mut out = Vec::new();
    for item in root.as_sequential(cx)? {
        poller.tick()?;
        out.push(item?);
    }
    Ok(out)
}
