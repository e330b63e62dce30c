use std::collections::BTreeMap;
use std::time::Instant;

use clap::Parser;
use logutil::LogFormat;
use paraq::{ExecutionMode, ParallelQuery, QuerySettings};
use paraq_error::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{Level, info};

#[derive(Parser)]
#[clap(name = "bench_standard")]
struct Arguments {
    /// Number of times to run each benchmark.
    #[clap(long, short, default_value = "5")]
    count: usize,
    /// Number of input elements.
    #[clap(long, short, default_value = "1000000")]
    size: usize,
    /// Degree of parallelism. Overrides `PARAQ_DEGREE_OF_PARALLELISM`.
    #[clap(long)]
    dop: Option<usize>,
    /// Run every benchmark sequentially for comparison.
    #[clap(long)]
    sequential: bool,
    #[clap(long, default_value = "text")]
    log_format: LogFormat,
    /// Pattern to match benchmark names to run.
    #[clap()]
    pattern: Option<String>,
}

type Workload = fn(&ParallelQuery<i64>) -> Result<usize>;

const BENCHMARKS: &[(&str, Workload)] = &[
    ("filter_map_count", filter_map_count),
    ("sum", sum),
    ("order_by", order_by),
    ("order_by_then_by", order_by_then_by),
    ("group_by", group_by),
    ("distinct", distinct),
    ("ordered_take", ordered_take),
    ("ordered_skip_while", ordered_skip_while),
    ("first_where", first_where),
    ("any", any),
    ("intersect", intersect),
];

fn filter_map_count(q: &ParallelQuery<i64>) -> Result<usize> {
    q.filter(|v| v % 3 == 0).map(|v| v * 2).count()
}

fn sum(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.sum()? as usize)
}

fn order_by(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.order_by(|v| *v).to_vec()?.len())
}

fn order_by_then_by(q: &ParallelQuery<i64>) -> Result<usize> {
    let sorted = q.order_by(|v| v % 100).then_by_descending(|v| *v);
    Ok(sorted.to_vec()?.len())
}

fn group_by(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.group_by(|v| v % 1024).to_vec()?.len())
}

fn distinct(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.distinct().to_vec()?.len())
}

fn ordered_take(q: &ParallelQuery<i64>) -> Result<usize> {
    let taken = q.as_ordered().filter(|v| v % 2 == 0).take(1000);
    Ok(taken.to_vec()?.len())
}

fn ordered_skip_while(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.as_ordered().skip_while(|v| *v < 1_000_000).to_vec()?.len())
}

fn first_where(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.first_where(|v| *v == 42)?.map_or(0, |_| 1))
}

fn any(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(usize::from(q.any(|v| *v < 0)?))
}

fn intersect(q: &ParallelQuery<i64>) -> Result<usize> {
    Ok(q.intersect(&q.map(|v| v / 2)).to_vec()?.len())
}

pub fn main() -> Result<()> {
    let args = Arguments::parse();
    logutil::configure_global_logger(Level::INFO, args.log_format);

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let input: Vec<i64> = (0..args.size).map(|_| rng.random_range(0..10_000_000)).collect();

    let mut settings = QuerySettings::from_env()?;
    if args.dop.is_some() {
        settings.degree_of_parallelism = args.dop;
    }
    if args.sequential {
        settings.execution_mode = ExecutionMode::ForceSequential;
    }
    let query = ParallelQuery::from_vec(input).with_settings(settings);

    // Times keyed by benchmark name. BTree for sorted output.
    let mut all_times: BTreeMap<&str, Vec<u128>> = BTreeMap::new();

    for &(name, workload) in BENCHMARKS {
        if let Some(pattern) = &args.pattern {
            if !name.contains(pattern.as_str()) {
                continue;
            }
        }

        info!(%name, "running benchmark");
        let mut times = Vec::with_capacity(args.count);
        for _ in 0..args.count {
            let start = Instant::now();
            let rows = workload(&query)?;
            let elapsed = start.elapsed().as_millis();
            info!(%name, rows, elapsed_ms = elapsed as u64, "benchmark iteration complete");
            times.push(elapsed);
        }
        all_times.insert(name, times);
    }

    println!("{:<40}\t{:>7}\t{:>14}", "benchmark_name", "count", "time_ms");
    for (name, times) in &all_times {
        for (idx, time) in times.iter().enumerate() {
            println!("{:<40}\t{:>7}\t{:>14}", name, idx + 1, time);
        }
    }

    Ok(())
}
