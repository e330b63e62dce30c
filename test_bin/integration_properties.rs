use std::collections::HashMap;

use paraq::{ExecutionMode, ParallelQuery};
use paraq_error::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DOPS: [usize; 4] = [1, 2, 3, 8];

fn random_input(seed: u64, len: usize, max: i64) -> Vec<i64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(0..max)).collect()
}

fn parallel(values: Vec<i64>, dop: usize) -> ParallelQuery<i64> {
    ParallelQuery::from_vec(values)
        .with_degree_of_parallelism(dop)
        .unwrap()
        .with_execution_mode(ExecutionMode::ForceParallelism)
}

#[test]
fn take_skip_complementary() -> Result<()> {
    logutil::init_test();
    let values = random_input(1, 257, 1000);

    for dop in DOPS {
        for k in [0, 1, 17, 128, 256, 257, 300] {
            let q = parallel(values.clone(), dop).as_ordered();
            let mut out = q.take(k).to_vec()?;
            out.extend(q.skip(k).to_vec()?);
            assert_eq!(values, out, "dop: {dop}, k: {k}");
        }
    }
    Ok(())
}

#[test]
fn take_skip_complementary_after_filter() -> Result<()> {
    let values = random_input(2, 500, 100);
    let expected: Vec<_> = values.iter().copied().filter(|v| v % 2 == 0).collect();

    for dop in DOPS {
        let q = parallel(values.clone(), dop).as_ordered().filter(|v| v % 2 == 0);
        let mut out = q.take(40).to_vec()?;
        out.extend(q.skip(40).to_vec()?);
        assert_eq!(expected, out, "dop: {dop}");
    }
    Ok(())
}

#[test]
fn sort_totality_with_then_by() -> Result<()> {
    let values: Vec<(i64, i64)> = random_input(3, 400, 10)
        .into_iter()
        .zip(random_input(4, 400, 50))
        .collect();

    for dop in DOPS {
        let out = ParallelQuery::from_vec(values.clone())
            .with_degree_of_parallelism(dop)?
            .order_by(|v| v.0)
            .then_by_descending(|v| v.1)
            .to_vec()?;

        assert_eq!(values.len(), out.len());
        for pair in out.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.0 < b.0 || (a.0 == b.0 && a.1 >= b.1), "{a:?} before {b:?}");
        }
    }
    Ok(())
}

#[test]
fn distinct_idempotent() -> Result<()> {
    let values = random_input(5, 1000, 64);

    for dop in DOPS {
        let once = parallel(values.clone(), dop).as_ordered().distinct();
        let twice = once.distinct();

        let once = once.to_vec()?;
        assert_eq!(once, twice.to_vec()?);

        let mut deduped = once.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(once.len(), deduped.len());

        let mut expected = values.clone();
        expected.sort();
        expected.dedup();
        assert_eq!(expected, deduped);
    }
    Ok(())
}

#[test]
fn group_by_complete() -> Result<()> {
    let values = random_input(6, 1000, 1000);

    for dop in DOPS {
        let groups = parallel(values.clone(), dop)
            .as_ordered()
            .group_by(|v| v % 7)
            .to_vec()?;

        let mut seen: HashMap<i64, Vec<i64>> = HashMap::new();
        for group in groups {
            let (key, elements) = group.into_parts();
            assert!(seen.insert(key, elements).is_none(), "key {key} repeated");
        }

        for (key, elements) in &seen {
            let expected: Vec<_> = values.iter().copied().filter(|v| v % 7 == *key).collect();
            assert_eq!(&expected, elements, "dop: {dop}, key: {key}");
        }
        assert_eq!(values.len(), seen.values().map(|g| g.len()).sum::<usize>());
    }
    Ok(())
}

#[test]
fn parallel_matches_sequential() -> Result<()> {
    let values = random_input(7, 2000, 500);
    let other = random_input(8, 300, 500);

    let build = |q: ParallelQuery<i64>| {
        let other = ParallelQuery::from_vec(other.clone());
        q.as_ordered()
            .filter(|v| v % 5 != 0)
            .map(|v| v * 3)
            .union(&other.map(|v| v * 3))
            .skip_while(|v| *v < 100)
            .take(700)
    };

    let expected = build(ParallelQuery::from_vec(values.clone()).as_sequential()).to_vec()?;
    for dop in DOPS {
        let out = build(parallel(values.clone(), dop)).to_vec()?;
        assert_eq!(expected, out, "dop: {dop}");
    }
    Ok(())
}

#[test]
fn first_deterministic() -> Result<()> {
    let mut values = random_input(9, 5000, 1000);
    values[3210] = 5000;
    values[4000] = 5000;

    for _ in 0..20 {
        let q = ParallelQuery::from_vec(values.clone())
            .map_indexed(|idx, v| (idx, v))
            .with_degree_of_parallelism(8)?;
        let found = q.first_where(|(_, v)| *v == 5000)?;
        assert_eq!(Some((3210, 5000)), found);
    }
    Ok(())
}
