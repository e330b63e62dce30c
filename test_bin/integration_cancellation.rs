use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use paraq::{CancellationToken, ExecutionMode, ParallelQuery};
use paraq_error::ErrorKind;

#[test]
fn cancel_from_another_thread() {
    logutil::init_test();

    let token = CancellationToken::new();
    let processed = Arc::new(AtomicUsize::new(0));

    let q = {
        let processed = processed.clone();
        ParallelQuery::range(0, 1_000_000)
            .with_degree_of_parallelism(4)
            .unwrap()
            .with_cancellation(token.clone())
            .map(move |v| {
                processed.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_micros(100));
                v
            })
    };

    let canceler = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let start = Instant::now();
    let err = q.count().unwrap_err();
    canceler.join().unwrap();

    assert_eq!(ErrorKind::Canceled, err.kind());
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(processed.load(Ordering::Relaxed) < 1_000_000);
}

#[test]
fn cancel_before_execution() {
    let token = CancellationToken::new();
    token.cancel();

    let q = ParallelQuery::range(0, 1000).with_cancellation(token);
    let err = q.to_vec().unwrap_err();
    assert!(err.is_canceled());
}

#[test]
fn cancel_during_barrier_operators() {
    let token = CancellationToken::new();
    let q = ParallelQuery::range(0, 200_000)
        .with_degree_of_parallelism(4)
        .unwrap()
        .with_cancellation(token.clone())
        .as_ordered()
        .map(|v| {
            thread::sleep(Duration::from_micros(50));
            v
        })
        .take_while(|v| *v >= 0);

    let canceler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });

    let err = q.to_vec().unwrap_err();
    canceler.join().unwrap();
    assert_eq!(ErrorKind::Canceled, err.kind());
}

#[test]
fn panic_in_delegate_fails_query() {
    let q = ParallelQuery::range(0, 1000)
        .with_degree_of_parallelism(4)
        .unwrap()
        .with_execution_mode(ExecutionMode::ForceParallelism)
        .map(|v| {
            if v == 777 {
                panic!("bad element");
            }
            v
        });

    let err = q.to_vec().unwrap_err();
    assert_eq!(ErrorKind::UserCode, err.kind());
}

#[test]
fn cancel_sequential_query_while_filtering() {
    logutil::init_test();

    let modes = [ExecutionMode::ForceSequential, ExecutionMode::Default];
    for mode in modes {
        let token = CancellationToken::new();
        let processed = Arc::new(AtomicUsize::new(0));

        // Indexed filter after a filter keeps default mode on the calling
        // thread.
        let q = {
            let processed = processed.clone();
            ParallelQuery::range(0, 20_000)
                .with_cancellation(token.clone())
                .with_execution_mode(mode)
                .as_ordered()
                .filter(|v| v % 2 == 0)
                .filter_indexed(move |_, _| {
                    processed.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(Duration::from_micros(100));
                    false
                })
        };

        let canceler = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let err = q.to_vec().unwrap_err();
        canceler.join().unwrap();

        assert_eq!(ErrorKind::Canceled, err.kind(), "mode: {mode}");
        assert!(processed.load(Ordering::Relaxed) < 10_000, "mode: {mode}");
    }
}

#[test]
fn panic_in_delegate_fails_query_in_every_mode() {
    let q = ParallelQuery::from_vec((0..100).collect::<Vec<i64>>())
        .with_degree_of_parallelism(4)
        .unwrap()
        .as_ordered()
        .filter(|v| v % 2 == 0)
        .filter_indexed(|_, idx| {
            if idx == 40 {
                panic!("bad index");
            }
            true
        });

    let modes = [
        ExecutionMode::Default,
        ExecutionMode::ForceSequential,
        ExecutionMode::ForceParallelism,
    ];
    for mode in modes {
        let err = q.with_execution_mode(mode).to_vec().unwrap_err();
        assert_eq!(ErrorKind::UserCode, err.kind(), "mode: {mode}");
        assert!(err.get_msg().contains("bad index"), "mode: {mode}");
    }
}
