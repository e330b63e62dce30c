use paraq::{ExecutionMode, ParallelQuery};
use paraq_error::{ErrorKind, Result};

fn input() -> ParallelQuery<i32> {
    ParallelQuery::from_vec(vec![5, 3, 8, 1, 9, 2])
        .with_degree_of_parallelism(2)
        .unwrap()
        .with_execution_mode(ExecutionMode::ForceParallelism)
}

fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
    v.sort();
    v
}

#[test]
fn filter_matches_as_multiset() -> Result<()> {
    logutil::init_test();
    let out = input().filter(|v| *v > 2).to_vec()?;
    assert_eq!(vec![3, 5, 8, 9], sorted(out));
    Ok(())
}

#[test]
fn ordered_filter_preserves_order() -> Result<()> {
    let out = input().as_ordered().filter(|v| *v > 2).to_vec()?;
    assert_eq!(vec![5, 3, 8, 9], out);
    Ok(())
}

#[test]
fn order_by_sorts() -> Result<()> {
    let out = input().order_by(|v| *v).to_vec()?;
    assert_eq!(vec![1, 2, 3, 5, 8, 9], out);
    Ok(())
}

#[test]
fn take_on_unsorted_input_uses_lowest_indices() -> Result<()> {
    let out = input().as_ordered().take(3).to_vec()?;
    assert_eq!(vec![5, 3, 8], out);

    let out = input().take(3).to_vec()?;
    assert_eq!(vec![3, 5, 8], sorted(out));
    Ok(())
}

#[test]
fn group_by_parity() -> Result<()> {
    let groups = input().group_by(|v| v % 2).to_vec()?;
    assert_eq!(2, groups.len());

    let mut groups: Vec<_> = groups.into_iter().map(|g| g.into_parts()).collect();
    groups.sort_by_key(|(k, _)| *k);

    assert_eq!(0, groups[0].0);
    assert_eq!(vec![2, 8], sorted(groups[0].1.clone()));
    assert_eq!(1, groups[1].0);
    assert_eq!(vec![1, 3, 5, 9], sorted(groups[1].1.clone()));
    Ok(())
}

#[test]
fn ordered_group_by_keeps_relative_order() -> Result<()> {
    let groups = input().as_ordered().group_by(|v| v % 2).to_vec()?;
    let groups: Vec<_> = groups.into_iter().map(|g| g.into_parts()).collect();
    assert_eq!(vec![(1, vec![5, 3, 1, 9]), (0, vec![8, 2])], groups);
    Ok(())
}

#[test]
fn first_and_single() -> Result<()> {
    let q = input().as_ordered();
    assert_eq!(8, q.first_where(|v| v % 2 == 0)?.unwrap());
    assert_eq!(2, q.last_where(|v| v % 2 == 0)?.unwrap());
    assert_eq!(Some(9), q.single_where(|v| *v > 8)?);
    assert_eq!(None, q.single_where(|v| *v > 100)?);

    let err = q.single_where(|v| *v > 4).unwrap_err();
    assert_eq!(ErrorKind::MoreThanOneElement, err.kind());

    let err = q.filter(|v| *v > 100).single().unwrap_err();
    assert_eq!(ErrorKind::NoElements, err.kind());
    Ok(())
}

#[test]
fn quantifiers_and_aggregates() -> Result<()> {
    let q = input();
    assert!(q.any(|v| *v == 9)?);
    assert!(!q.all(|v| *v > 1)?);
    assert!(q.contains(8)?);
    assert_eq!(6, q.count()?);
    assert_eq!(28, q.sum()?);
    assert_eq!(Some(1), q.min()?);
    assert_eq!(Some(9), q.max()?);
    Ok(())
}

#[test]
fn chained_query_reads_like_sequential() -> Result<()> {
    let q = ParallelQuery::range(0, 10_000)
        .with_degree_of_parallelism(4)?
        .as_ordered()
        .filter(|v| v % 3 == 0)
        .map(|v| v * 2)
        .skip(10)
        .take(5);

    assert_eq!(vec![60, 66, 72, 78, 84], q.to_vec()?);
    Ok(())
}
