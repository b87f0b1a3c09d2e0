use std::sync::Arc;
use std::thread;

use surge_metrics::{MetricKind, Registry};

const THREADS: u64 = 16;
const ADDS_PER_THREAD: u64 = 5_000;

fn registry() -> Arc<Registry> {
    let r = Arc::new(Registry::new());
    for (name, kind) in [
        ("requests", MetricKind::Counter),
        ("success", MetricKind::Rate),
        ("latency", MetricKind::Trend),
    ] {
        r.register(name, kind).unwrap_or_else(|e| panic!("{e}"));
    }
    r
}

#[test]
fn concurrent_named_adds_are_never_lost() {
    let r = registry();

    thread::scope(|s| {
        for t in 0..THREADS {
            let r = r.clone();
            s.spawn(move || {
                for i in 0..ADDS_PER_THREAD {
                    r.counter_add("requests", 2).unwrap_or_else(|e| panic!("{e}"));
                    r.rate_add("success", i % 4 != 0)
                        .unwrap_or_else(|e| panic!("{e}"));
                    r.trend_add("latency", (t * ADDS_PER_THREAD + i) as f64)
                        .unwrap_or_else(|e| panic!("{e}"));
                }
            });
        }
    });

    let snap = r.snapshot();
    let total = THREADS * ADDS_PER_THREAD;

    assert_eq!(snap.counter("requests"), Some(total * 2));
    assert_eq!(snap.rate("success"), Some((total * 3 / 4, total)));

    let latency = snap
        .trend("latency")
        .unwrap_or_else(|| panic!("missing latency trend"));
    assert_eq!(latency.count(), total);
    assert_eq!(latency.min(), Some(0.0));
    assert_eq!(latency.max(), Some((total - 1) as f64));

    // Every value was recorded exactly once.
    for (expected, got) in latency.samples().iter().enumerate() {
        assert_eq!(*got, expected as f64);
    }
}

#[test]
fn handles_and_named_adds_share_state() {
    let r = registry();
    let counter = r.counter("requests").unwrap_or_else(|e| panic!("{e}"));

    thread::scope(|s| {
        for _ in 0..THREADS {
            let counter = counter.clone();
            let r = r.clone();
            s.spawn(move || {
                for _ in 0..ADDS_PER_THREAD {
                    counter.add(1);
                    r.counter_add("requests", 1).unwrap_or_else(|e| panic!("{e}"));
                }
            });
        }
    });

    assert_eq!(
        r.snapshot().counter("requests"),
        Some(THREADS * ADDS_PER_THREAD * 2)
    );
}

#[test]
fn concurrent_registration_yields_one_metric() {
    let r = Arc::new(Registry::new());

    let ids: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let r = r.clone();
                s.spawn(move || r.register("shared", MetricKind::Counter))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| panic!("thread panicked"))
                    .unwrap_or_else(|e| panic!("{e}"))
            })
            .collect()
    });

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(r.len(), 1);
}
